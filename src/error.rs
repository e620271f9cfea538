//! Error types for entity-feed

use std::time::Duration;

use thiserror::Error;

use crate::transport::SubscriptionId;

/// Result type alias for entity-feed operations
pub type Result<T> = std::result::Result<T, FeedError>;

/// Main error type for entity-feed
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Registration of subscription {id} failed: {message}")]
    Registration { id: SubscriptionId, message: String },

    #[error("Timed out after {0:?} waiting for first page")]
    Timeout(Duration),

    #[error("Subscription cancelled")]
    Cancelled,

    #[error("Listener already holds an active subscription; stop it first")]
    SubscriptionActive,

    #[error("Listener has no subscription")]
    NoSubscription,

    #[error("Invalid subscription state: expected {expected}, was {actual}")]
    InvalidState {
        expected: &'static str,
        actual: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl FeedError {
    /// Check if error is retryable
    ///
    /// Retrying is the transport's business; callers use this to decide
    /// whether re-preparing the listener is worth it.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FeedError::Transport(_) | FeedError::Registration { .. } | FeedError::Timeout(_)
        )
    }

    /// Short machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            FeedError::Transport(_) => "transport",
            FeedError::Registration { .. } => "registration",
            FeedError::Timeout(_) => "timeout",
            FeedError::Cancelled => "cancelled",
            FeedError::SubscriptionActive => "subscription_active",
            FeedError::NoSubscription => "no_subscription",
            FeedError::InvalidState { .. } => "invalid_state",
            FeedError::Serialization(_) => "serialization",
            FeedError::Config(_) => "config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(FeedError::Transport("closed".into()).is_retryable());
        assert!(FeedError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!FeedError::SubscriptionActive.is_retryable());
        assert!(!FeedError::Cancelled.is_retryable());
    }

    #[test]
    fn test_display() {
        let err = FeedError::Registration {
            id: 7,
            message: "rejected".into(),
        };
        assert_eq!(
            err.to_string(),
            "Registration of subscription 7 failed: rejected"
        );
        assert_eq!(err.code(), "registration");
    }
}
