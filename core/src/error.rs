//! Saga error taxonomy.

use crate::payment::{PaymentId, PaymentStatus};
use thiserror::Error;

/// Errors produced by the saga components.
///
/// Each variant maps to one caller-visible outcome. The web layer turns these
/// into HTTP responses; the webhook path never surfaces
/// [`SagaError::DownstreamSync`] to the gateway.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SagaError {
    /// Missing or malformed input. The caller's fault, never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The payment provider failed. No local state was mutated.
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// Unknown payment or session id.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation illegal for the record's current status.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Webhook signature mismatch.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Refund attempted with no recoverable gateway reference.
    #[error("Irrecoverable: {0}")]
    Irrecoverable(String),

    /// Order confirmation failed after the payment succeeded.
    #[error("Downstream sync error: {0}")]
    DownstreamSync(String),

    /// Persistence failure.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl SagaError {
    /// Build an [`SagaError::InvalidState`] for an operation on a record in `status`.
    #[must_use]
    pub fn invalid_state(id: &PaymentId, status: PaymentStatus, operation: &str) -> Self {
        Self::InvalidState(format!("cannot {operation} payment {id} in status {status}"))
    }

    /// Whether retrying the same call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Gateway(_) | Self::DownstreamSync(_) | Self::Storage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SagaError::invalid_state(&PaymentId::from("P1"), PaymentStatus::Pending, "refund");
        assert_eq!(
            err.to_string(),
            "Invalid state: cannot refund payment P1 in status pending"
        );
    }

    #[test]
    fn test_retryable() {
        assert!(SagaError::Gateway("timeout".into()).is_retryable());
        assert!(!SagaError::Validation("missing orderId".into()).is_retryable());
        assert!(!SagaError::Authentication("bad signature".into()).is_retryable());
    }
}
