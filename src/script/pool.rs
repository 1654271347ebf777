//! Per-plugin execution context pool (§5): contexts are not thread-safe, so each request
//! checks one out for the duration of a single `process`/`info` call and returns it.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;

use super::{LoadError, PluginContext};
use crate::constants::{CONTEXT_CHECKOUT_TIMEOUT_MS, DEFAULT_CONTEXT_POOL_SIZE};

/// Bounded pool of execution contexts for a single plugin. New contexts are constructed
/// lazily, up to `cap`; once `cap` are outstanding, a checkout queues for a short timeout
/// before giving up (the caller then falls back per §4.C step 7).
pub struct ContextPool {
    source_path: PathBuf,
    script_timeout: Duration,
    idle: Mutex<Vec<PluginContext>>,
    permits: Arc<Semaphore>,
}

impl ContextPool {
    pub fn new(source_path: PathBuf, script_timeout: Duration) -> Self {
        Self::with_capacity(source_path, script_timeout, DEFAULT_CONTEXT_POOL_SIZE)
    }

    pub fn with_capacity(source_path: PathBuf, script_timeout: Duration, cap: usize) -> Self {
        Self {
            source_path,
            script_timeout,
            idle: Mutex::new(Vec::new()),
            permits: Arc::new(Semaphore::new(cap)),
        }
    }

    /// Checks out a context, constructing one if the pool is below capacity and none are
    /// idle. Returns a [`Lease`] that returns the context to the pool when dropped.
    pub async fn checkout(self: &Arc<Self>) -> Result<Lease, LoadError> {
        let permit = timeout(
            Duration::from_millis(CONTEXT_CHECKOUT_TIMEOUT_MS),
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        .map_err(|_| LoadError::Resource("no free execution context".to_string()))?
        .expect("semaphore closed unexpectedly");

        let idle_context = self.idle.lock().expect("pool mutex poisoned").pop();

        let context = match idle_context {
            Some(context) => context,
            None => {
                let source_path = self.source_path.clone();
                let script_timeout = self.script_timeout;
                tokio::task::spawn_blocking(move || PluginContext::load(&source_path, script_timeout))
                    .await
                    .map_err(|e| LoadError::Resource(e.to_string()))??
            }
        };

        Ok(Lease {
            pool: Arc::clone(self),
            context: Some(context),
            _permit: permit,
        })
    }
}

/// An exclusive, temporary hold on one [`PluginContext`]. Dereferences to it; returns it
/// to the pool's idle list on drop.
pub struct Lease {
    pool: Arc<ContextPool>,
    context: Option<PluginContext>,
    _permit: OwnedSemaphorePermit,
}

impl std::ops::Deref for Lease {
    type Target = PluginContext;

    fn deref(&self) -> &PluginContext {
        self.context.as_ref().expect("context taken before drop")
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(context) = self.context.take() {
            self.pool
                .idle
                .lock()
                .expect("pool mutex poisoned")
                .push(context);
        }
    }
}
