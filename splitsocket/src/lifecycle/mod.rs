//! Connection lifecycle signals
//!
//! Close intent and teardown completion are tracked separately: requesting a
//! close never resolves the completion gate by itself.

pub mod gate;
pub mod signal;

pub use gate::{CompletionGate, CompletionWatcher};
pub use signal::{CloseSignal, CloseToken};

/// Close-request signaling and the completion gate for one connection
#[derive(Debug, Default)]
pub struct ConnectionLifecycle {
    close_requested: CloseSignal,
    connection_closed: CloseSignal,
    gate: CompletionGate,
}

impl ConnectionLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the connection to close. Safe to call repeatedly or after `complete()`.
    pub fn request_close(&self) {
        self.close_requested.signal();
    }

    /// Token flipped by [`ConnectionLifecycle::request_close`]
    pub fn close_requested(&self) -> CloseToken {
        self.close_requested.token()
    }

    /// Mark the underlying transport as gone. Called by transport implementations.
    pub fn notify_connection_closed(&self) {
        self.connection_closed.signal();
    }

    /// Token flipped when the transport reports the connection closed
    pub fn connection_closed(&self) -> CloseToken {
        self.connection_closed.token()
    }

    /// Resolve the completion gate and release the close signals.
    ///
    /// Call once output has fully drained. Returns `true` only for the call
    /// that resolved the gate.
    pub fn complete(&self) -> bool {
        let resolved = self.gate.resolve();
        self.close_requested.dispose();
        self.connection_closed.dispose();
        resolved
    }

    pub fn is_completed(&self) -> bool {
        self.gate.is_resolved()
    }

    /// Watcher resolving once [`ConnectionLifecycle::complete`] has run
    pub fn execution(&self) -> CompletionWatcher {
        self.gate.watch()
    }
}
