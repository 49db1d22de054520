//! Lifecycle base embedded by every transport connection

use crate::completion::{CompletionChain, Drain};
use crate::error::{HookError, LifecycleError};
use crate::id::ConnectionId;
use crate::lifecycle::{CloseToken, CompletionWatcher, ConnectionLifecycle};
use std::future::Future;
use tracing::debug;

/// Identity, lifecycle signals and shutdown hooks for one connection
#[derive(Debug)]
pub struct TransportBase {
    id: ConnectionId,
    lifecycle: ConnectionLifecycle,
    chain: CompletionChain,
}

impl TransportBase {
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            lifecycle: ConnectionLifecycle::new(),
            chain: CompletionChain::new(id),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn lifecycle(&self) -> &ConnectionLifecycle {
        &self.lifecycle
    }

    pub fn chain(&self) -> &CompletionChain {
        &self.chain
    }

    pub fn request_close(&self) {
        debug!("Connection {} close requested", self.id);
        self.lifecycle.request_close();
    }

    pub fn close_requested(&self) -> CloseToken {
        self.lifecycle.close_requested()
    }

    pub fn notify_connection_closed(&self) {
        debug!("Connection {} transport closed", self.id);
        self.lifecycle.notify_connection_closed();
    }

    pub fn connection_closed(&self) -> CloseToken {
        self.lifecycle.connection_closed()
    }

    pub fn execution(&self) -> CompletionWatcher {
        self.lifecycle.execution()
    }

    pub fn on_completed<F, S, Fut>(&self, callback: F, state: S) -> Result<(), LifecycleError>
    where
        F: FnOnce(S) -> Fut + Send + 'static,
        S: Send + 'static,
        Fut: Future<Output = Result<(), HookError>> + Send + 'static,
    {
        self.chain.on_completed(callback, state)
    }

    pub fn fire_on_completed(&self) -> Result<Drain, LifecycleError> {
        self.chain.fire_on_completed()
    }

    /// Resolve the completion gate. Call after output has drained.
    pub fn complete(&self) -> bool {
        let resolved = self.lifecycle.complete();
        if resolved {
            debug!("Connection {} completed", self.id);
        }
        resolved
    }

    /// Drain the shutdown hooks, then complete.
    ///
    /// Fails without completing if the chain was already drained.
    pub async fn teardown(&self) -> Result<(), LifecycleError> {
        self.fire_on_completed()?.await;
        self.complete();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tracing_test::traced_test;

    #[tokio::test]
    async fn test_teardown_drains_before_completing() {
        let base = Arc::new(TransportBase::new(ConnectionId::from(0xBEEF)));
        let seen = Arc::new(Mutex::new(None));

        base.on_completed(
            |(base, seen): (Arc<TransportBase>, Arc<Mutex<Option<bool>>>)| async move {
                *seen.lock() = Some(base.lifecycle().is_completed());
                Ok::<(), HookError>(())
            },
            (Arc::clone(&base), Arc::clone(&seen)),
        )
        .unwrap();

        base.teardown().await.unwrap();

        assert_eq!(*seen.lock(), Some(false));
        assert!(base.lifecycle().is_completed());
        assert!(base.execution().wait().await);
    }

    #[tokio::test]
    async fn test_second_teardown_fails() {
        let base = TransportBase::new(ConnectionId::next());
        base.teardown().await.unwrap();
        assert_eq!(base.teardown().await, Err(LifecycleError::AlreadyCompleting));
        assert!(!base.complete());
    }

    #[test]
    fn test_request_close_after_complete() {
        let base = TransportBase::new(ConnectionId::next());
        assert!(base.complete());
        base.request_close();
        assert!(!base.close_requested().is_requested());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_hook_failure_logged_with_connection_id() {
        let base = TransportBase::new(ConnectionId::from(0xBEEF));
        base.on_completed(|()| async { Err::<(), HookError>("flush timed out".into()) }, ())
            .unwrap();

        base.teardown().await.unwrap();

        assert!(logs_contain("Connection BEEF completion hook"));
        assert!(logs_contain("flush timed out"));
        assert!(base.lifecycle().is_completed());
    }
}
