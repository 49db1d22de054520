//! Error types

use thiserror::Error;

/// Failure reported by a shutdown hook. Logged by the drain, never returned.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Misuse of the connection lifecycle
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    /// Registration or drain attempted after the completion chain started draining
    #[error("the connection is already completing or has completed")]
    AlreadyCompleting,
}

/// Reason a connection was force-terminated out of band
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ConnectionAborted {
    message: String,
}

impl ConnectionAborted {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Default for ConnectionAborted {
    fn default() -> Self {
        Self::new("The connection was aborted by the application via TransportBase::abort().")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_completing_message() {
        assert_eq!(
            LifecycleError::AlreadyCompleting.to_string(),
            "the connection is already completing or has completed"
        );
    }

    #[test]
    fn test_abort_reason_display() {
        let reason = ConnectionAborted::new("peer reset");
        assert_eq!(reason.to_string(), "peer reset");
        assert_eq!(reason.message(), "peer reset");
        assert!(ConnectionAborted::default().message().contains("abort()"));
    }
}
