use anyhow::Result;
use async_trait::async_trait;
use futures_util::StreamExt;
use kameo::actor::ActorRef;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::Message;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::actors::{HealthMonitorActor, HealthStatus, UpdateHealth};
use crate::config::{ConsumerConfig, RedpandaConfig};
use crate::domain::order::{OrderEvent, OrderEventType};
use crate::metrics::Metrics;
use super::DELIVERY_TARGET;

// ============================================================================
// Order Event Consumer
// ============================================================================
//
// Reads order events back from the topic and hands each one to an
// `OrderEventHandler` according to its type. Delivery is at-least-once,
// so the same event id can arrive more than once (publish retries, outbox
// replays, rebalances). The dispatcher remembers recently handled ids and
// treats a repeat as a no-op.
//
// ============================================================================

const HEALTH_COMPONENT: &str = "consumer";

/// Reaction to each kind of order event
#[async_trait]
pub trait OrderEventHandler: Send + Sync {
    async fn on_created(&self, event: &OrderEvent) -> Result<()>;
    async fn on_status_changed(&self, event: &OrderEvent) -> Result<()>;
    async fn on_deleted(&self, event: &OrderEvent) -> Result<()>;
}

/// Default handler: records each event in the log
pub struct LoggingEventHandler;

#[async_trait]
impl OrderEventHandler for LoggingEventHandler {
    async fn on_created(&self, event: &OrderEvent) -> Result<()> {
        tracing::info!(
            order_id = %event.order_id,
            customer = %event.order_snapshot.customer_name,
            amount = %event.order_snapshot.total_amount,
            "📥 Order created"
        );
        Ok(())
    }

    async fn on_status_changed(&self, event: &OrderEvent) -> Result<()> {
        tracing::info!(
            order_id = %event.order_id,
            from = ?event.previous_status,
            to = %event.order_snapshot.status,
            version = event.order_snapshot.version,
            "📥 Order status changed"
        );
        Ok(())
    }

    async fn on_deleted(&self, event: &OrderEvent) -> Result<()> {
        tracing::info!(order_id = %event.order_id, "📥 Order deleted");
        Ok(())
    }
}

/// Bounded memory of handled event ids; the oldest id is forgotten first
#[derive(Debug)]
pub struct SeenEvents {
    capacity: usize,
    order: VecDeque<Uuid>,
    ids: HashSet<Uuid>,
}

impl SeenEvents {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
        }
    }

    pub fn contains(&self, event_id: &Uuid) -> bool {
        self.ids.contains(event_id)
    }

    /// Returns false when the id was already remembered
    pub fn insert(&mut self, event_id: Uuid) -> bool {
        if !self.ids.insert(event_id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.ids.remove(&evicted);
            }
        }
        self.order.push_back(event_id);
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Handled(OrderEventType),
    /// Already handled under this event id; nothing was done
    Duplicate(OrderEventType),
}

#[derive(Debug, thiserror::Error)]
pub enum ConsumeError {
    #[error("undecodable order event: {0}")]
    Decode(String),

    #[error("handler failed for event {event_id}: {reason}")]
    Handler { event_id: Uuid, reason: String },
}

pub struct EventDispatcher {
    handler: Arc<dyn OrderEventHandler>,
    seen: Mutex<SeenEvents>,
    metrics: Option<Arc<Metrics>>,
}

impl EventDispatcher {
    pub fn new(handler: Arc<dyn OrderEventHandler>, dedup_capacity: usize) -> Self {
        Self {
            handler,
            seen: Mutex::new(SeenEvents::new(dedup_capacity)),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Handle an event once per event id. A failed handler leaves the id
    /// unmarked so a redelivery is handled again.
    pub async fn dispatch(&self, event: &OrderEvent) -> Result<ConsumeOutcome, ConsumeError> {
        let mut seen = self.seen.lock().await;
        let event_type = event.event_type;

        if seen.contains(&event.event_id) {
            tracing::debug!(order_id = %event.order_id, event_id = %event.event_id, "Skipping duplicate event");
            self.record(event_type, "duplicate");
            return Ok(ConsumeOutcome::Duplicate(event_type));
        }

        let handled = match event_type {
            OrderEventType::Created => self.handler.on_created(event).await,
            OrderEventType::StatusChanged => self.handler.on_status_changed(event).await,
            OrderEventType::Deleted => self.handler.on_deleted(event).await,
        };

        if let Err(e) = handled {
            self.record(event_type, "failed");
            return Err(ConsumeError::Handler { event_id: event.event_id, reason: e.to_string() });
        }

        seen.insert(event.event_id);
        self.record(event_type, "handled");
        Ok(ConsumeOutcome::Handled(event_type))
    }

    /// Decode a raw topic payload and dispatch it
    pub async fn dispatch_payload(&self, payload: &[u8]) -> Result<ConsumeOutcome, ConsumeError> {
        let event = std::str::from_utf8(payload)
            .map_err(|e| e.to_string())
            .and_then(|text| OrderEvent::from_json(text).map_err(|e| e.to_string()))
            .map_err(ConsumeError::Decode)?;

        self.dispatch(&event).await
    }

    fn record(&self, event_type: OrderEventType, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_consumed(event_type.as_str(), outcome);
        }
    }
}

// ============================================================================
// Redpanda consumer
// ============================================================================

pub struct RedpandaConsumer {
    consumer: StreamConsumer,
    topic: String,
    group_id: String,
    health: Option<ActorRef<HealthMonitorActor>>,
}

impl RedpandaConsumer {
    /// Offsets are committed by hand, after the event is dealt with
    pub fn new(redpanda: &RedpandaConfig, config: &ConsumerConfig) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &redpanda.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()?;

        consumer.subscribe(&[redpanda.topic.as_str()])?;

        Ok(Self {
            consumer,
            topic: redpanda.topic.clone(),
            group_id: config.group_id.clone(),
            health: None,
        })
    }

    /// Report stream errors to the health monitor
    pub fn with_health(mut self, monitor: ActorRef<HealthMonitorActor>) -> Self {
        self.health = Some(monitor);
        self
    }

    pub fn spawn(self, dispatcher: Arc<EventDispatcher>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(dispatcher).await })
    }

    async fn run(self, dispatcher: Arc<EventDispatcher>) {
        tracing::info!(topic = %self.topic, group_id = %self.group_id, "📥 Order event consumer started");
        self.report(HealthStatus::Healthy).await;

        let mut stream = self.consumer.stream();
        let mut degraded = false;

        while let Some(next) = stream.next().await {
            let message = match next {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(topic = %self.topic, error = %e, "Failed to receive order event");
                    if !degraded {
                        degraded = true;
                        self.report(HealthStatus::Degraded(format!("receive failed: {}", e))).await;
                    }
                    continue;
                }
            };

            if degraded {
                degraded = false;
                self.report(HealthStatus::Healthy).await;
            }

            let outcome = match message.payload() {
                Some(payload) => dispatcher.dispatch_payload(payload).await,
                None => Err(ConsumeError::Decode("message has no payload".into())),
            };

            match outcome {
                Ok(_) => {}
                // Undecodable messages are committed and skipped
                Err(e @ ConsumeError::Decode(_)) => {
                    tracing::error!(
                        target: DELIVERY_TARGET,
                        partition = message.partition(),
                        offset = message.offset(),
                        error = %e,
                        "Skipping undecodable order event"
                    );
                }
                Err(e @ ConsumeError::Handler { .. }) => {
                    tracing::warn!(
                        partition = message.partition(),
                        offset = message.offset(),
                        error = %e,
                        "Order event handler failed, leaving offset uncommitted"
                    );
                    continue;
                }
            }

            if let Err(e) = self.consumer.commit_message(&message, CommitMode::Async) {
                tracing::warn!(
                    partition = message.partition(),
                    offset = message.offset(),
                    error = %e,
                    "Failed to commit offset (event may be redelivered)"
                );
            }
        }

        tracing::info!(topic = %self.topic, "Order event consumer stopped");
    }

    async fn report(&self, status: HealthStatus) {
        if let Some(monitor) = &self.health {
            let update = UpdateHealth { component: HEALTH_COMPONENT.to_string(), status };
            if let Err(e) = monitor.tell(update).await {
                tracing::debug!(error = ?e, "Health monitor unavailable");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{NewOrder, Order, OrderId, OrderStatus};
    use chrono::Utc;
    use rust_decimal::Decimal;

    #[derive(Default)]
    struct RecordingHandler {
        handled: Mutex<Vec<(OrderEventType, Uuid)>>,
        fail_next: Mutex<bool>,
    }

    impl RecordingHandler {
        async fn record(&self, event: &OrderEvent) -> Result<()> {
            let mut fail = self.fail_next.lock().await;
            if *fail {
                *fail = false;
                anyhow::bail!("downstream unavailable");
            }
            self.handled.lock().await.push((event.event_type, event.event_id));
            Ok(())
        }
    }

    #[async_trait]
    impl OrderEventHandler for RecordingHandler {
        async fn on_created(&self, event: &OrderEvent) -> Result<()> {
            self.record(event).await
        }

        async fn on_status_changed(&self, event: &OrderEvent) -> Result<()> {
            self.record(event).await
        }

        async fn on_deleted(&self, event: &OrderEvent) -> Result<()> {
            self.record(event).await
        }
    }

    fn order() -> Order {
        let new_order = NewOrder::new("Alice", Decimal::new(10000, 2)).validated().unwrap();
        Order::from_new(OrderId::generate(), new_order, Utc::now())
    }

    #[tokio::test]
    async fn test_replayed_event_id_is_handled_once() {
        let handler = Arc::new(RecordingHandler::default());
        let metrics = Arc::new(Metrics::new().unwrap());
        let dispatcher = EventDispatcher::new(handler.clone(), 100).with_metrics(metrics.clone());
        let event = OrderEvent::created(&order());
        let payload = event.to_json().unwrap();

        let first = dispatcher.dispatch_payload(payload.as_bytes()).await.unwrap();
        let replay = dispatcher.dispatch_payload(payload.as_bytes()).await.unwrap();

        assert_eq!(first, ConsumeOutcome::Handled(OrderEventType::Created));
        assert_eq!(replay, ConsumeOutcome::Duplicate(OrderEventType::Created));
        assert_eq!(handler.handled.lock().await.len(), 1);
        assert_eq!(metrics.events_consumed.with_label_values(&["CREATED", "duplicate"]).get(), 1);
    }

    #[tokio::test]
    async fn test_dispatches_by_event_type() {
        let handler = Arc::new(RecordingHandler::default());
        let dispatcher = EventDispatcher::new(handler.clone(), 100);
        let order = order();
        let mut confirmed = order.clone();
        confirmed.status = OrderStatus::Confirmed;
        confirmed.version = 1;

        for event in [
            OrderEvent::created(&order),
            OrderEvent::status_changed(OrderStatus::Pending, &confirmed),
            OrderEvent::deleted(&confirmed),
        ] {
            dispatcher.dispatch(&event).await.unwrap();
        }

        let kinds: Vec<_> = handler.handled.lock().await.iter().map(|(kind, _)| *kind).collect();
        assert_eq!(
            kinds,
            vec![OrderEventType::Created, OrderEventType::StatusChanged, OrderEventType::Deleted]
        );
    }

    #[tokio::test]
    async fn test_failed_handler_allows_redelivery() {
        let handler = Arc::new(RecordingHandler::default());
        let dispatcher = EventDispatcher::new(handler.clone(), 100);
        let event = OrderEvent::created(&order());
        *handler.fail_next.lock().await = true;

        let failed = dispatcher.dispatch(&event).await;
        assert!(matches!(failed, Err(ConsumeError::Handler { event_id, .. }) if event_id == event.event_id));

        let retried = dispatcher.dispatch(&event).await.unwrap();
        assert_eq!(retried, ConsumeOutcome::Handled(OrderEventType::Created));
        assert_eq!(handler.handled.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_rejected() {
        let dispatcher = EventDispatcher::new(Arc::new(LoggingEventHandler), 10);

        assert!(matches!(dispatcher.dispatch_payload(b"{not json").await, Err(ConsumeError::Decode(_))));
        assert!(matches!(dispatcher.dispatch_payload(&[0xff, 0xfe]).await, Err(ConsumeError::Decode(_))));
    }

    #[test]
    fn test_seen_set_forgets_oldest_ids_beyond_capacity() {
        let mut seen = SeenEvents::new(2);
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        assert!(seen.insert(a));
        assert!(seen.insert(b));
        assert!(!seen.insert(a));
        assert!(seen.insert(c));

        assert_eq!(seen.order.len(), 2);
        assert!(!seen.contains(&a));
        assert!(seen.contains(&b) && seen.contains(&c));
    }
}
