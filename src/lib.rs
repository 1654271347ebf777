//! Bunnylol core: a loopback HTTP command router that resolves browser-address-bar
//! queries through sandboxed scripted plugins into redirect URLs.
//!
//! The HTTP surface, plugin registry, resolver, and scripting sandbox are implemented
//! here as a library so both the [`bunnylold`](../bin/bunnylold) binary and the stable
//! `serve` entry point below can drive them. Everything that writes to disk for the
//! user's sake (plugins, configuration) lives outside this crate's control; the core
//! only reads it.

pub mod config;
pub mod constants;
pub mod events;
pub mod http;
pub mod logging;
pub mod registry;
pub mod resolver;
pub mod script;

use std::net::SocketAddr;
use std::sync::Arc;

use events::TracingEventSink;

/// Exit code for a clean shutdown.
pub const EXIT_OK: i32 = 0;
/// Exit code when the loopback listener could not be bound.
pub const EXIT_BIND_ERROR: i32 = 1;
/// Exit code when the configuration file exists but fails to parse.
pub const EXIT_CONFIG_ERROR: i32 = 2;
/// Exit code for any other fatal startup failure.
pub const EXIT_FATAL: i32 = 3;

/// Builds the [`http::AppState`] the server runs against: loads configuration from
/// `config_path` (or the default XDG location if `None`), applies `port_override` on top
/// of whatever `server.port` says, and constructs the initial plugin registry.
pub fn build_app_state(
    config_path: Option<std::path::PathBuf>,
    port_override: Option<u16>,
) -> Result<(http::AppState, SocketAddr), config::ConfigError> {
    let resolved_path = config_path.or_else(config::default_config_path);

    let mut cfg = match &resolved_path {
        Some(path) => config::load_config(path)?,
        None => config::Config::default(),
    };

    if let Some(port) = port_override {
        cfg.server.port = port;
    }

    let addr = SocketAddr::from(([127, 0, 0, 1], cfg.server.port));
    let sink = Arc::new(TracingEventSink);
    let state = http::AppState::new(cfg, resolved_path, sink, constants::DEFAULT_CONTEXT_POOL_SIZE);

    Ok((state, addr))
}

/// The stable C ABI entry point external callers (the menu-bar shell) use to start the
/// core: blocks until the server shuts down. Returns one of the `EXIT_*` codes above.
///
/// # Safety
/// This function is `extern "C"` so it can be called from non-Rust hosts; it takes no
/// pointers and performs no unsafe operations itself, but callers must invoke it from a
/// context where starting a Tokio runtime and binding a TCP listener is permitted.
#[no_mangle]
pub extern "C" fn serve(port: u16) -> i32 {
    let (state, addr) = match build_app_state(None, Some(port)) {
        Ok(pair) => pair,
        Err(_) => return EXIT_CONFIG_ERROR,
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(_) => return EXIT_FATAL,
    };

    match runtime.block_on(http::serve(addr, state)) {
        Ok(()) => EXIT_OK,
        Err(_) => EXIT_BIND_ERROR,
    }
}
