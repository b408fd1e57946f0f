use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use std::fmt;

use super::record::Order;
use super::value_objects::{OrderId, OrderStatus};

// ============================================================================
// Order Events - immutable facts derived from committed mutations
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderEventType {
    Created,
    StatusChanged,
    Deleted,
}

impl OrderEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderEventType::Created => "CREATED",
            OrderEventType::StatusChanged => "STATUS_CHANGED",
            OrderEventType::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for OrderEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One logical event per committed mutation.
///
/// `event_id` identifies the logical event, not the delivery attempt: every
/// retry and every outbox replay carries the same id so consumers can
/// deduplicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderEvent {
    pub event_id: Uuid,
    pub order_id: OrderId,
    pub event_type: OrderEventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<OrderStatus>,
    pub order_snapshot: Order,
    pub timestamp: DateTime<Utc>,
}

impl OrderEvent {
    fn new(event_type: OrderEventType, snapshot: &Order) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            order_id: snapshot.id,
            event_type,
            previous_status: None,
            order_snapshot: snapshot.clone(),
            timestamp: Utc::now(),
        }
    }

    pub fn created(order: &Order) -> Self {
        Self::new(OrderEventType::Created, order)
    }

    pub fn status_changed(previous_status: OrderStatus, order: &Order) -> Self {
        Self {
            previous_status: Some(previous_status),
            ..Self::new(OrderEventType::StatusChanged, order)
        }
    }

    /// `snapshot` is the record as it was just before removal
    pub fn deleted(snapshot: &Order) -> Self {
        Self::new(OrderEventType::Deleted, snapshot)
    }

    /// Partition key on the event stream; keeps one order's events in order
    pub fn partition_key(&self) -> String {
        self.order_id.to_string()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::NewOrder;
    use rust_decimal::Decimal;

    fn order() -> Order {
        let new_order = NewOrder::new("Alice", Decimal::new(10000, 2)).validated().unwrap();
        Order::from_new(OrderId::generate(), new_order, Utc::now())
    }

    #[test]
    fn test_each_event_gets_its_own_id() {
        let order = order();
        let a = OrderEvent::created(&order);
        let b = OrderEvent::created(&order);
        assert_ne!(a.event_id, b.event_id);
        assert_eq!(a.order_id, order.id);
    }

    #[test]
    fn test_status_changed_carries_previous_status() {
        let mut order = order();
        order.status = OrderStatus::Confirmed;
        let event = OrderEvent::status_changed(OrderStatus::Pending, &order);

        assert_eq!(event.event_type, OrderEventType::StatusChanged);
        assert_eq!(event.previous_status, Some(OrderStatus::Pending));
        assert_eq!(event.order_snapshot.status, OrderStatus::Confirmed);
    }

    #[test]
    fn test_wire_format() {
        let order = order();
        let event = OrderEvent::deleted(&order);
        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();

        assert_eq!(json["eventType"], "DELETED");
        assert_eq!(json["orderId"], order.id.to_string());
        assert_eq!(json["eventId"], event.event_id.to_string());
        assert_eq!(json["orderSnapshot"]["customerName"], "Alice");
        assert!(json.get("previousStatus").is_none());
        assert_eq!(event.partition_key(), order.id.to_string());
    }

    #[test]
    fn test_decoding_preserves_event_id() {
        let event = OrderEvent::created(&order());
        let decoded = OrderEvent::from_json(&event.to_json().unwrap()).unwrap();
        assert_eq!(decoded, event);
    }
}
