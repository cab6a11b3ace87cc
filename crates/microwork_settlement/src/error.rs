//! Error types for the settlement pipeline.

use microwork_core::Credits;
use thiserror::Error;

/// Result type for settlement operations.
pub type SettlementResult<T> = Result<T, SettlementError>;

/// Errors that can occur while registering accounts or settling payouts.
#[derive(Debug, Error)]
pub enum SettlementError {
    /// The payment provider refused or failed an operation.
    #[error("payment provider error: {description}")]
    Provider {
        /// Human-readable provider message.
        description: String,
    },

    /// A payout was requested beyond the worker's verified balance.
    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance {
        /// Amount requested.
        requested: Credits,
        /// Verified balance available.
        available: Credits,
    },

    /// An account status change that the lifecycle does not allow.
    #[error("invalid account transition from {from} to {to}")]
    InvalidTransition {
        /// Status the account was actually in.
        from: String,
        /// Status the caller tried to move to.
        to: String,
    },

    /// Store error.
    #[error("store error: {0}")]
    Core(#[from] microwork_core::CoreError),

    /// The settlement queue has shut down.
    #[error("settlement queue closed")]
    QueueClosed,
}

impl SettlementError {
    /// Creates a provider error.
    pub fn provider(description: impl Into<String>) -> Self {
        Self::Provider {
            description: description.into(),
        }
    }

    /// Returns true if retrying the operation may succeed.
    ///
    /// Provider failures are typically transient (timeouts, rate limits);
    /// everything else reflects local state and will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SettlementError::Provider { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_provider_errors_are_retryable() {
        assert!(SettlementError::provider("gateway timeout").is_retryable());
        assert!(!SettlementError::InsufficientBalance {
            requested: 10.0,
            available: 1.0
        }
        .is_retryable());
        assert!(!SettlementError::QueueClosed.is_retryable());
    }
}
