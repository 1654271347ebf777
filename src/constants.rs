//! Compile-time constants and defaults shared across the crate.

#[allow(dead_code)] // available for the Server header and diagnostics
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DEFAULT_SERVER_HEADER: &str = concat!("bunnylol/", env!("CARGO_PKG_VERSION"));

/// Port the HTTP Frontend binds to when the configuration file omits `server.port`.
pub const DEFAULT_PORT: u16 = 8085;

/// Per-plugin invocation ceiling when the configuration omits `plugin_timeout_ms`.
pub const DEFAULT_PLUGIN_TIMEOUT_MS: u64 = 200;

/// Search engine used for the fallback redirect when the configuration omits `default_search`.
pub const DEFAULT_SEARCH_ENGINE: &str = "google";

/// Number of pooled execution contexts kept per plugin.
pub const DEFAULT_CONTEXT_POOL_SIZE: usize = 4;

/// How long a request waits for a free execution context before falling back.
pub const CONTEXT_CHECKOUT_TIMEOUT_MS: u64 = 100;

/// Extension recognized for plugin source files.
pub const PLUGIN_FILE_EXTENSION: &str = "lua";

/// Directory name, relative to the XDG data/config roots, holding plugins and configuration.
pub const APP_DIR_NAME: &str = "bunnylol";
