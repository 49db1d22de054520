//! Single-resolution completion gate

use tokio::sync::watch;

/// Resolves at most once; every watcher observes the same resolution
#[derive(Debug)]
pub struct CompletionGate {
    tx: watch::Sender<bool>,
}

impl CompletionGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Resolve the gate. Returns `true` only for the call that resolved it.
    pub fn resolve(&self) -> bool {
        self.tx.send_if_modified(|done| {
            if *done {
                false
            } else {
                *done = true;
                true
            }
        })
    }

    pub fn is_resolved(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn watch(&self) -> CompletionWatcher {
        CompletionWatcher {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for CompletionGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Awaitable view of a [`CompletionGate`]
#[derive(Debug, Clone)]
pub struct CompletionWatcher {
    rx: watch::Receiver<bool>,
}

impl CompletionWatcher {
    pub fn is_completed(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for the gate to resolve.
    ///
    /// Returns `false` if the gate was dropped without ever resolving.
    pub async fn wait(mut self) -> bool {
        self.rx.wait_for(|done| *done).await.is_ok()
    }
}
