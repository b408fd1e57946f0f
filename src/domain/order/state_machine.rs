use super::errors::OrderError;
use super::value_objects::OrderStatus;

// ============================================================================
// Order State Machine
// ============================================================================
//
//   PENDING → CONFIRMED → PREPARING → READY → IN_TRANSIT → DELIVERED
//      └──────────┴───────────┴─────────┴──────────┴──→ CANCELLED
//
//   DELIVERED → REFUNDED
//   CANCELLED → REFUNDED
//
// The edge table below is the only place transitions are defined.
//
// ============================================================================

use OrderStatus::*;

pub const ALLOWED_TRANSITIONS: &[(OrderStatus, OrderStatus)] = &[
    // Happy path, one step at a time
    (Pending, Confirmed),
    (Confirmed, Preparing),
    (Preparing, Ready),
    (Ready, InTransit),
    (InTransit, Delivered),
    // Cancellation from any non-terminal status
    (Pending, Cancelled),
    (Confirmed, Cancelled),
    (Preparing, Cancelled),
    (Ready, Cancelled),
    (InTransit, Cancelled),
    // Refunds
    (Delivered, Refunded),
    (Cancelled, Refunded),
];

pub fn is_allowed(from: OrderStatus, to: OrderStatus) -> bool {
    ALLOWED_TRANSITIONS.contains(&(from, to))
}

/// Validate a requested status change. Pure: never touches the store.
pub fn transition(current: OrderStatus, requested: OrderStatus) -> Result<OrderStatus, OrderError> {
    if is_allowed(current, requested) {
        Ok(requested)
    } else {
        Err(OrderError::Transition { from: current, to: requested })
    }
}

/// Statuses reachable in one step from `from`
pub fn next_statuses(from: OrderStatus) -> impl Iterator<Item = OrderStatus> {
    ALLOWED_TRANSITIONS
        .iter()
        .filter(move |(source, _)| *source == from)
        .map(|(_, target)| *target)
}
