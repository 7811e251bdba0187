//! Transport error taxonomy
//!
//! Errors crossing the transport boundary are classified as retryable
//! (network blips, timeouts) or terminal (authentication, malformed
//! filters). Retryable failures are handled inside the engine; terminal
//! failures are surfaced to caller error callbacks.

use thiserror::Error;

/// Errors produced at the real-time transport boundary
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Network-level failure reaching or keeping the transport alive
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Channel subscription timed out waiting for the server
    #[error("subscription timed out: {0}")]
    TimedOut(String),

    /// Credentials rejected or expired
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The server rejected the subscription itself, e.g. a malformed filter
    #[error("subscription failed: {0}")]
    SubscriptionFailed(String),
}

impl TransportError {
    /// Whether the failure is expected to clear on its own
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectionFailed(_) | TransportError::TimedOut(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(TransportError::ConnectionFailed("reset".into()).is_retryable());
        assert!(TransportError::TimedOut("no ack".into()).is_retryable());
        assert!(!TransportError::AuthFailed("expired token".into()).is_retryable());
        assert!(!TransportError::SubscriptionFailed("bad filter".into()).is_retryable());
    }

    #[test]
    fn test_display() {
        let e = TransportError::AuthFailed("expired token".into());
        assert_eq!(e.to_string(), "authentication failed: expired token");
    }
}
