use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::order::OrderEvent;
use crate::utils::IsTransient;

/// One record as it goes onto the topic
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub topic: String,
    /// Partition key, the order id
    pub key: String,
    pub payload: String,
    /// Carried as the `event_id` header so consumers can deduplicate
    pub event_id: Uuid,
}

impl OutboundMessage {
    pub fn from_event(topic: &str, event: &OrderEvent) -> serde_json::Result<Self> {
        Ok(Self {
            topic: topic.to_string(),
            key: event.partition_key(),
            payload: event.to_json()?,
            event_id: event.event_id,
        })
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SinkError {
    #[error("transient sink failure: {0}")]
    Transient(String),

    #[error("sink rejected message: {0}")]
    Permanent(String),

    #[error("circuit breaker open for {0}")]
    CircuitOpen(&'static str),
}

impl IsTransient for SinkError {
    /// An open breaker is not retried in-line; the event goes to the outbox
    fn is_transient(&self) -> bool {
        matches!(self, SinkError::Transient(_))
    }
}

/// Destination for serialized order events
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<(), SinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{NewOrder, Order, OrderId};
    use chrono::Utc;
    use rust_decimal::Decimal;

    #[test]
    fn test_message_keys_by_order_and_keeps_event_id() {
        let new_order = NewOrder::new("Alice", Decimal::ONE).validated().unwrap();
        let order = Order::from_new(OrderId::generate(), new_order, Utc::now());
        let event = OrderEvent::created(&order);

        let message = OutboundMessage::from_event("order-events", &event).unwrap();

        assert_eq!(message.topic, "order-events");
        assert_eq!(message.key, order.id.to_string());
        assert_eq!(message.event_id, event.event_id);
        assert_eq!(OrderEvent::from_json(&message.payload).unwrap(), event);
    }

    #[test]
    fn test_only_transient_errors_are_retried() {
        assert!(SinkError::Transient("timeout".into()).is_transient());
        assert!(!SinkError::Permanent("too large".into()).is_transient());
        assert!(!SinkError::CircuitOpen("redpanda").is_transient());
    }
}
