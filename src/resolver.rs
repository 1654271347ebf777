//! The Resolver (§4.C): turns a raw query string into a redirect target.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::events::{Event, EventSink, ResolveErrorKind};
use crate::registry::Registry;
use crate::script::{host_api, ProcessError};

/// Where a resolved query should send the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Redirect(String),
    /// Empty query: land on the bindings index instead of redirecting through it.
    Index,
}

pub struct Resolver {
    registry: Arc<Registry>,
    sink: Arc<dyn EventSink>,
}

impl Resolver {
    pub fn new(registry: Arc<Registry>, sink: Arc<dyn EventSink>) -> Self {
        Self { registry, sink }
    }

    /// Resolves `raw_query` (already URL-decoded by the HTTP Frontend) against `config`
    /// and the registry's current snapshot.
    pub async fn resolve(&self, raw_query: &str, config: &Config) -> Outcome {
        let q = raw_query.trim();
        if q.is_empty() {
            return Outcome::Index;
        }

        let q = expand_alias(q, &config.aliases);
        let (token, _tail) = split_first_token(&q);
        let binding = token.to_lowercase();

        let snapshot = self.registry.current();
        let Some(plugin) = snapshot.resolve(&binding) else {
            self.sink.emit(Event::RequestTraced {
                query: q.clone(),
                binding: None,
                outcome: "fallback",
            });
            return Outcome::Redirect(fallback_url(&q, config));
        };

        match plugin.process(&q).await {
            Ok(url) if is_acceptable_url(&url) => {
                self.sink.emit(Event::RequestTraced {
                    query: q.clone(),
                    binding: Some(binding),
                    outcome: "resolved",
                });
                Outcome::Redirect(url)
            }
            Ok(bad_url) => {
                self.sink.emit(Event::ResolveError {
                    binding: binding.clone(),
                    kind: ResolveErrorKind::BadOutput,
                    detail: bad_url,
                });
                Outcome::Redirect(fallback_url(&q, config))
            }
            Err(err) => {
                let kind = match &err {
                    ProcessError::Timeout => ResolveErrorKind::Timeout,
                    ProcessError::NotAString => ResolveErrorKind::BadOutput,
                    ProcessError::Script(_) => ResolveErrorKind::Process,
                };
                self.sink.emit(Event::ResolveError {
                    binding,
                    kind,
                    detail: err.to_string(),
                });
                Outcome::Redirect(fallback_url(&q, config))
            }
        }
    }
}

/// Splits `q` into its first whitespace-separated token and the remainder (including its
/// own leading whitespace), e.g. `"gh facebook/react"` -> `("gh", " facebook/react")`.
fn split_first_token(q: &str) -> (&str, &str) {
    match q.find(|c: char| c.is_whitespace()) {
        Some(idx) => (&q[..idx], &q[idx..]),
        None => (q, ""),
    }
}

/// Expands a static alias at most once (§4.C step 4). An alias whose own expansion starts
/// with another alias binding is not re-expanded, which rules out cycles by construction.
fn expand_alias(q: &str, aliases: &HashMap<String, String>) -> String {
    let (token, tail) = split_first_token(q);
    match aliases.get(&token.to_lowercase()) {
        Some(expansion) => format!("{expansion}{tail}"),
        None => q.to_string(),
    }
}

fn is_acceptable_url(url: &str) -> bool {
    url.starts_with('/') || url::Url::parse(url).map(|u| !u.scheme().is_empty() && u.host().is_some()).unwrap_or(false)
}

fn fallback_url(q: &str, config: &Config) -> String {
    config.search_url(&host_api::url_encode(q))
}
