//! Lifecycle hooks.
//!
//! Observers implement [`SessionListener`] and are invoked in registration
//! order at each phase of an exchange. A listener that returns an error or
//! panics is logged and skipped; it never takes the connection down.

use async_trait::async_trait;
use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::error::ProxyError;
use crate::http::response::Response;
use crate::proxy::session::Session;

/// What to do after a forwarding attempt failed.
#[derive(Debug, Clone)]
pub enum FailureAction {
    /// Send the request again after waiting.
    Retry(Duration),
    /// Answer the client with this response instead.
    Respond(Response),
}

/// Observer of session lifecycle events. Every method defaults to doing
/// nothing.
#[async_trait]
pub trait SessionListener: Send + Sync {
    async fn before_request(&self, _session: &mut Session) -> anyhow::Result<()> {
        Ok(())
    }

    async fn after_request(&self, _session: &mut Session) -> anyhow::Result<()> {
        Ok(())
    }

    async fn before_response(&self, _session: &mut Session) -> anyhow::Result<()> {
        Ok(())
    }

    async fn after_response(&self, _session: &mut Session) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called after attempt number `attempt` (starting at 1) failed.
    async fn request_failed(
        &self,
        _session: &mut Session,
        _error: &ProxyError,
        _attempt: u32,
    ) -> anyhow::Result<Option<FailureAction>> {
        Ok(None)
    }

    /// `session` is `None` when the request could not even be parsed.
    async fn session_failed(&self, _session: Option<&Session>, _error: &ProxyError) -> anyhow::Result<()> {
        Ok(())
    }

    async fn tunnel_established(&self, _session: &mut Session) -> anyhow::Result<()> {
        Ok(())
    }

    /// Response body bytes sent to the client so far.
    async fn session_progress(&self, _session: &Session, _bytes_sent: u64) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Ordered set of registered listeners.
#[derive(Clone, Default)]
pub struct Hooks {
    listeners: Vec<Arc<dyn SessionListener>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, listener: Arc<dyn SessionListener>) {
        self.listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub async fn before_request(&self, session: &mut Session) {
        for listener in &self.listeners {
            isolate("before_request", listener.before_request(session)).await;
        }
    }

    pub async fn after_request(&self, session: &mut Session) {
        for listener in &self.listeners {
            isolate("after_request", listener.after_request(session)).await;
        }
    }

    pub async fn before_response(&self, session: &mut Session) {
        for listener in &self.listeners {
            isolate("before_response", listener.before_response(session)).await;
        }
    }

    pub async fn after_response(&self, session: &mut Session) {
        for listener in &self.listeners {
            isolate("after_response", listener.after_response(session)).await;
        }
    }

    /// Asks each listener in turn; the first one to decide wins.
    pub async fn request_failed(
        &self,
        session: &mut Session,
        error: &ProxyError,
        attempt: u32,
    ) -> Option<FailureAction> {
        for listener in &self.listeners {
            let decision = isolate("request_failed", listener.request_failed(session, error, attempt)).await;
            if let Some(Some(action)) = decision {
                return Some(action);
            }
        }
        None
    }

    pub async fn session_failed(&self, session: Option<&Session>, error: &ProxyError) {
        for listener in &self.listeners {
            isolate("session_failed", listener.session_failed(session, error)).await;
        }
    }

    pub async fn tunnel_established(&self, session: &mut Session) {
        for listener in &self.listeners {
            isolate("tunnel_established", listener.tunnel_established(session)).await;
        }
    }

    pub async fn session_progress(&self, session: &Session, bytes_sent: u64) {
        for listener in &self.listeners {
            isolate("session_progress", listener.session_progress(session, bytes_sent)).await;
        }
    }
}

/// Runs one hook, turning an error or a panic into a warning.
async fn isolate<T, F>(phase: &'static str, hook: F) -> Option<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match AssertUnwindSafe(hook).catch_unwind().await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            warn!(phase, error = %e, "lifecycle hook failed");
            None
        }
        Err(_) => {
            warn!(phase, "lifecycle hook panicked");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn errors_and_panics_are_contained() {
        let failing = async { anyhow::bail!("boom") };
        assert!(isolate::<(), _>("test", failing).await.is_none());

        let panicking = async {
            if true {
                panic!("hook bug");
            }
            Ok(())
        };
        assert!(isolate::<(), _>("test", panicking).await.is_none());

        assert_eq!(isolate("test", async { Ok(7) }).await, Some(7));
    }
}
