//! Process-wide logging bootstrap.
//!
//! The core never writes logs to disk itself (that responsibility belongs to whatever
//! external collaborator installs a `tracing_subscriber::Layer`); this module only wires
//! up the default terminal subscriber and tracks the `--verbose` flag the way the rest of
//! the crate expects to query it.

use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

static VERBOSE: OnceLock<bool> = OnceLock::new();

/// Installs the default `tracing` subscriber and records the verbosity flag.
///
/// Call once, before any other module emits a `tracing` event. A second call is a
/// programmer error and panics, matching the discipline the verbosity flag itself relies
/// on (`is_verbose` assumes `init_logging` ran exactly once).
pub fn init_logging(verbose: bool) {
    VERBOSE
        .set(verbose)
        .expect("init_logging called multiple times");

    let default_filter = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

pub fn is_verbose() -> bool {
    *VERBOSE.get().unwrap_or(&false)
}
