//! The Event Sink: a narrow, pushable interface external collaborators subscribe to.
//!
//! The core never reads its own events back and never persists them; it only emits
//! `tracing` events through the default `EventSink` implementation. Anything that wants
//! durable logs installs a `tracing_subscriber::Layer` of its own.

use std::path::PathBuf;

/// One occurrence the core wants to surface to whatever is watching.
#[derive(Debug, Clone)]
pub enum Event {
    /// A plugin was discovered, loaded, and its metadata accepted.
    PluginLoaded { path: PathBuf, bindings: Vec<String> },
    /// A plugin candidate failed to load or failed `info()`.
    PluginLoadError { path: PathBuf, reason: String },
    /// Two or more plugins claim the same binding; only the first is active.
    PluginShadowed {
        binding: String,
        active: PathBuf,
        shadowed: PathBuf,
    },
    /// Resolution of a query failed inside the plugin; the fallback was taken.
    ResolveError {
        binding: String,
        kind: ResolveErrorKind,
        detail: String,
    },
    /// A request was handled; emitted after the response is computed.
    RequestTraced {
        query: String,
        binding: Option<String>,
        outcome: &'static str,
    },
}

/// Mirrors the error-kind table in the Resolver's contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveErrorKind {
    Load,
    Info,
    Process,
    Timeout,
    BadOutput,
}

impl std::fmt::Display for ResolveErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResolveErrorKind::Load => "load",
            ResolveErrorKind::Info => "info",
            ResolveErrorKind::Process => "process",
            ResolveErrorKind::Timeout => "timeout",
            ResolveErrorKind::BadOutput => "bad_output",
        };
        f.write_str(s)
    }
}

/// Something that accepts core events. Implementations must not block the caller for long;
/// the core invokes this synchronously on the request path.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// The sink installed when nothing more specific is configured: every event becomes a
/// structured `tracing` event at a level matching its severity.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: Event) {
        match event {
            Event::PluginLoaded { path, bindings } => {
                tracing::info!(path = %path.display(), bindings = ?bindings, "plugin loaded");
            }
            Event::PluginLoadError { path, reason } => {
                tracing::warn!(path = %path.display(), reason = %reason, "plugin load failed");
            }
            Event::PluginShadowed {
                binding,
                active,
                shadowed,
            } => {
                tracing::warn!(
                    binding = %binding,
                    active = %active.display(),
                    shadowed = %shadowed.display(),
                    "binding claimed by multiple plugins"
                );
            }
            Event::ResolveError {
                binding,
                kind,
                detail,
            } => {
                tracing::warn!(binding = %binding, kind = %kind, detail = %detail, "resolve error, falling back");
            }
            Event::RequestTraced {
                query,
                binding,
                outcome,
            } => {
                tracing::debug!(query = %query, binding = ?binding, outcome = %outcome, "request traced");
            }
        }
    }
}
