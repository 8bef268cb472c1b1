//! Graceful shutdown coordination.
//!
//! Long-lived components register a [`Closer`] with an injected [`Lifecycle`]
//! when they start. [`ShutdownRegistry`] is the standard implementation: on
//! shutdown it closes components in reverse registration order, bounding each
//! close with a timeout.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;

/// Default bound on a single component's close
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Something that can be shut down gracefully
#[async_trait]
pub trait Closer: Send + Sync {
    /// Stop and wait for in-flight work; must tolerate repeated calls
    async fn close(&self);
}

/// Registration point for components needing graceful shutdown
pub trait Lifecycle: Send + Sync {
    fn register(&self, name: &str, closer: Arc<dyn Closer>);
}

/// Lifecycle that ignores registrations, for callers closing components themselves
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLifecycle;

impl Lifecycle for NoopLifecycle {
    fn register(&self, _name: &str, _closer: Arc<dyn Closer>) {}
}

/// Ordered set of closers run on shutdown
pub struct ShutdownRegistry {
    closers: Mutex<Vec<(String, Arc<dyn Closer>)>>,
    timeout: Duration,
}

impl ShutdownRegistry {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_CLOSE_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            closers: Mutex::new(Vec::new()),
            timeout,
        }
    }

    /// Names of registered components, in registration order
    pub fn names(&self) -> Vec<String> {
        self.closers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.closers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every registered component, newest first.
    ///
    /// Returns the names of components that did not finish within the
    /// timeout. The registry is empty afterwards.
    pub async fn shutdown(&self) -> Vec<String> {
        let closers = std::mem::take(&mut *self.closers.lock().unwrap_or_else(|e| e.into_inner()));
        let mut timed_out = Vec::new();

        for (name, closer) in closers.into_iter().rev() {
            info!(component = %name, "Closing component");
            if tokio::time::timeout(self.timeout, closer.close()).await.is_err() {
                warn!(
                    component = %name,
                    timeout_secs = self.timeout.as_secs(),
                    "Component did not close in time"
                );
                timed_out.push(name);
            }
        }

        timed_out
    }
}

impl Default for ShutdownRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle for ShutdownRegistry {
    fn register(&self, name: &str, closer: Arc<dyn Closer>) {
        self.closers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((name.to_string(), closer));
    }
}

/// Resolve on SIGINT (Ctrl+C) or, on Unix, SIGTERM
pub async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Received SIGINT (Ctrl+C), shutting down");
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C, shutting down");
    }

    Ok(())
}
