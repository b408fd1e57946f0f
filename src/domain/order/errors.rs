use uuid::Uuid;

use super::access::{Action, Role};
use super::value_objects::{OrderId, OrderStatus};

// ============================================================================
// Order Errors - per-request failure taxonomy
// ============================================================================
//
// Every variant is recoverable by the caller; none is process-fatal.
// Internal failures expose only a correlation id, the cause is logged.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrderError {
    #[error("Invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("Order not found with id: {0}")]
    NotFound(OrderId),

    #[error("Illegal status transition from {from} to {to}")]
    Transition { from: OrderStatus, to: OrderStatus },

    #[error("Version conflict on order {id}: expected version {expected}, current is {actual}")]
    Conflict { id: OrderId, expected: i64, actual: i64 },

    #[error("Event {event_id} could not be published: {reason}")]
    Publish { event_id: Uuid, reason: String },

    #[error("Role {role} may not perform {action}")]
    Forbidden { action: Action, role: Role },

    #[error("Internal error (correlation id {correlation_id})")]
    Internal { correlation_id: Uuid },
}

impl OrderError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        OrderError::Validation { field, reason: reason.into() }
    }

    /// Wrap an unexpected failure. The full error is logged against a fresh
    /// correlation id; only the id travels back to the caller.
    pub fn internal(error: impl std::fmt::Display) -> Self {
        let correlation_id = Uuid::new_v4();
        tracing::error!(
            correlation_id = %correlation_id,
            error = %error,
            "Unexpected failure in order lifecycle"
        );
        OrderError::Internal { correlation_id }
    }

    /// Stable machine-readable code for rendering responses
    pub fn code(&self) -> &'static str {
        match self {
            OrderError::Validation { .. } => "VALIDATION_FAILED",
            OrderError::NotFound(_) => "ORDER_NOT_FOUND",
            OrderError::Transition { .. } => "INVALID_TRANSITION",
            OrderError::Conflict { .. } => "VERSION_CONFLICT",
            OrderError::Publish { .. } => "EVENT_PUBLISH_FAILED",
            OrderError::Forbidden { .. } => "FORBIDDEN",
            OrderError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Only a version conflict is worth retrying, and only after a fresh read.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OrderError::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let id = OrderId::generate();
        assert_eq!(OrderError::NotFound(id).code(), "ORDER_NOT_FOUND");
        assert_eq!(OrderError::validation("customerName", "required").code(), "VALIDATION_FAILED");
        assert_eq!(
            OrderError::Transition { from: OrderStatus::Pending, to: OrderStatus::Delivered }.code(),
            "INVALID_TRANSITION"
        );
    }

    #[test]
    fn test_only_conflicts_are_retryable() {
        let id = OrderId::generate();
        assert!(OrderError::Conflict { id, expected: 1, actual: 2 }.is_retryable());
        assert!(!OrderError::NotFound(id).is_retryable());
        assert!(!OrderError::internal("boom").is_retryable());
    }

    #[test]
    fn test_internal_error_hides_cause() {
        let err = OrderError::internal("connection reset by peer at 10.0.0.3");
        let message = err.to_string();
        assert!(message.starts_with("Internal error (correlation id"));
        assert!(!message.contains("10.0.0.3"));
    }

    #[test]
    fn test_transition_message_names_both_statuses() {
        let err = OrderError::Transition { from: OrderStatus::Pending, to: OrderStatus::Delivered };
        assert_eq!(err.to_string(), "Illegal status transition from PENDING to DELIVERED");
    }
}
