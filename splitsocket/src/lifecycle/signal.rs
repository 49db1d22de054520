//! One-shot close signal

use std::sync::atomic::{AtomicU8, Ordering};
use tokio_util::sync::CancellationToken;

const IDLE: u8 = 0;
const SIGNALED: u8 = 1;
const DISPOSED: u8 = 2;

/// A close signal that can be flipped once and disposed once.
///
/// Signaling after disposal is a no-op. Observers hold [`CloseToken`]s and
/// cannot flip the signal themselves.
#[derive(Debug)]
pub struct CloseSignal {
    state: AtomicU8,
    token: CancellationToken,
}

impl CloseSignal {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(IDLE),
            token: CancellationToken::new(),
        }
    }

    /// Flip the signal. Returns `true` only for the call that flipped it.
    pub fn signal(&self) -> bool {
        match self
            .state
            .compare_exchange(IDLE, SIGNALED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                self.token.cancel();
                true
            }
            Err(_) => false,
        }
    }

    /// Release the signal. Returns `true` only for the first call.
    pub fn dispose(&self) -> bool {
        self.state.swap(DISPOSED, Ordering::AcqRel) != DISPOSED
    }

    pub fn is_signaled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_disposed(&self) -> bool {
        self.state.load(Ordering::Acquire) == DISPOSED
    }

    /// Read-only view for observers such as I/O loops
    pub fn token(&self) -> CloseToken {
        CloseToken(self.token.clone())
    }
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of a [`CloseSignal`]
#[derive(Debug, Clone)]
pub struct CloseToken(CancellationToken);

impl CloseToken {
    pub fn is_requested(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Resolves once the signal has been flipped
    pub async fn requested(&self) {
        self.0.cancelled().await
    }

    /// Owned variant of [`CloseToken::requested`] for spawned tasks
    pub async fn into_requested(self) {
        self.0.cancelled_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_signal_is_one_shot() {
        let signal = CloseSignal::new();
        assert!(!signal.is_signaled());
        assert!(signal.signal());
        assert!(!signal.signal());
        assert!(signal.is_signaled());
    }

    #[test]
    fn test_signal_after_dispose_is_noop() {
        let signal = CloseSignal::new();
        assert!(signal.dispose());
        assert!(!signal.dispose());
        assert!(!signal.signal());
        assert!(!signal.is_signaled());
        assert!(signal.is_disposed());
    }

    #[test]
    fn test_dispose_keeps_signaled_state() {
        let signal = CloseSignal::new();
        let token = signal.token();
        signal.signal();
        signal.dispose();
        assert!(signal.is_signaled());
        assert!(token.is_requested());
    }

    #[tokio::test]
    async fn test_token_wakes_observers() {
        let signal = Arc::new(CloseSignal::new());
        let token = signal.token();

        let observer = tokio::spawn(token.into_requested());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!observer.is_finished());

        signal.signal();
        tokio::time::timeout(Duration::from_secs(1), observer)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_signal_and_dispose() {
        let signal = Arc::new(CloseSignal::new());

        let mut handles = Vec::new();
        for i in 0..16 {
            let signal = Arc::clone(&signal);
            handles.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    signal.signal()
                } else {
                    signal.dispose()
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(signal.is_disposed());
        assert!(!signal.signal());
    }
}
