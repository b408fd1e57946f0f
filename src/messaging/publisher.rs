use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::domain::order::{OrderError, OrderEvent, OrderId};
use crate::metrics::Metrics;
use crate::utils::{retry_on_transient, RetryConfig, RetryResult};
use super::outbox::PendingEventStore;
use super::DELIVERY_TARGET;
use super::sink::{EventSink, OutboundMessage};

// ============================================================================
// Partitioned Event Publisher
// ============================================================================
//
// One worker task per partition. An event is routed by its order id, so
// every event of one order is handled by the same worker, first in first
// out. A worker:
//
// 1. Parks the event behind the order's backlog if the outbox has one
// 2. Otherwise sends it with bounded exponential backoff (transient errors)
// 3. Parks it in the outbox when the retries run out or the sink refuses it
//
// A caller that stops waiting (publish timeout) does not cancel the work;
// the worker finishes and parks the event if needed.
//
// ============================================================================

/// Broker acknowledgement of a delivered event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub event_id: Uuid,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PublishError {
    #[error("event {event_id} parked in outbox after {attempts} attempts: {reason}")]
    Parked { event_id: Uuid, attempts: u32, reason: String },

    #[error("event {event_id} queued behind undelivered events of order {order_id}")]
    Deferred { event_id: Uuid, order_id: OrderId },

    #[error("event {event_id} could not be encoded: {reason}")]
    Encode { event_id: Uuid, reason: String },

    #[error("event {event_id} was neither delivered nor parked: {reason}")]
    Lost { event_id: Uuid, reason: String },

    #[error("publisher stopped before event {event_id} was handled")]
    Closed { event_id: Uuid },
}

impl PublishError {
    pub fn event_id(&self) -> Uuid {
        match self {
            PublishError::Parked { event_id, .. }
            | PublishError::Deferred { event_id, .. }
            | PublishError::Encode { event_id, .. }
            | PublishError::Lost { event_id, .. }
            | PublishError::Closed { event_id } => *event_id,
        }
    }

    /// Metrics label
    pub fn outcome(&self) -> &'static str {
        match self {
            PublishError::Parked { .. } => "parked",
            PublishError::Deferred { .. } => "deferred",
            PublishError::Encode { .. } => "encode_failed",
            PublishError::Lost { .. } => "lost",
            PublishError::Closed { .. } => "closed",
        }
    }
}

impl From<PublishError> for OrderError {
    fn from(error: PublishError) -> Self {
        OrderError::Publish { event_id: error.event_id(), reason: error.to_string() }
    }
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &OrderEvent) -> Result<Ack, PublishError>;
}

#[derive(Debug, Clone)]
pub struct PublisherSettings {
    pub topic: String,
    pub partition_workers: usize,
    pub retry: RetryConfig,
}

struct PublishJob {
    event: OrderEvent,
    reply: oneshot::Sender<Result<Ack, PublishError>>,
}

/// Lanes are unbounded so handing a job over never suspends: once
/// `publish` has been polled past the hand-over, dropping it (publish
/// timeout) cannot lose the event.
pub struct PartitionedPublisher {
    lanes: Vec<mpsc::UnboundedSender<PublishJob>>,
}

impl PartitionedPublisher {
    /// Spawn the partition workers on the current runtime
    pub fn spawn(
        sink: Arc<dyn EventSink>,
        outbox: Arc<dyn PendingEventStore>,
        settings: PublisherSettings,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        let partitions = settings.partition_workers.max(1);
        let mut lanes = Vec::with_capacity(partitions);

        for partition in 0..partitions {
            let (tx, rx) = mpsc::unbounded_channel();
            let worker = PartitionWorker {
                partition,
                topic: settings.topic.clone(),
                retry: settings.retry.clone(),
                sink: sink.clone(),
                outbox: outbox.clone(),
                metrics: metrics.clone(),
            };
            tokio::spawn(worker.run(rx));
            lanes.push(tx);
        }

        tracing::info!(partitions = partitions, topic = %settings.topic, "📤 Partitioned publisher started");
        Self { lanes }
    }
}

#[async_trait]
impl EventPublisher for PartitionedPublisher {
    async fn publish(&self, event: &OrderEvent) -> Result<Ack, PublishError> {
        let lane = &self.lanes[event.order_id.partition(self.lanes.len())];
        let (reply, receipt) = oneshot::channel();

        lane.send(PublishJob { event: event.clone(), reply })
            .map_err(|_| PublishError::Closed { event_id: event.event_id })?;

        receipt
            .await
            .map_err(|_| PublishError::Closed { event_id: event.event_id })?
    }
}

struct PartitionWorker {
    partition: usize,
    topic: String,
    retry: RetryConfig,
    sink: Arc<dyn EventSink>,
    outbox: Arc<dyn PendingEventStore>,
    metrics: Option<Arc<Metrics>>,
}

impl PartitionWorker {
    async fn run(self, mut jobs: mpsc::UnboundedReceiver<PublishJob>) {
        tracing::debug!(partition = self.partition, "Partition worker started");

        while let Some(job) = jobs.recv().await {
            let result = self.deliver(&job.event).await;

            if let Some(metrics) = &self.metrics {
                let outcome = match &result {
                    Ok(_) => "delivered",
                    Err(e) => e.outcome(),
                };
                metrics.record_publish(job.event.event_type.as_str(), outcome);
            }

            // the caller may have timed out already
            let _ = job.reply.send(result);
        }

        tracing::debug!(partition = self.partition, "Partition worker stopped");
    }

    async fn deliver(&self, event: &OrderEvent) -> Result<Ack, PublishError> {
        match self.outbox.has_pending(event.order_id).await {
            Ok(true) => {
                self.park(event, 0, "order has undelivered events").await?;
                return Err(PublishError::Deferred { event_id: event.event_id, order_id: event.order_id });
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(target: DELIVERY_TARGET, order_id = %event.order_id, error = %e, "Outbox lookup failed, sending directly");
            }
        }

        let message = OutboundMessage::from_event(&self.topic, event)
            .map_err(|e| PublishError::Encode { event_id: event.event_id, reason: e.to_string() })?;

        let sink = &self.sink;
        let metrics = self.metrics.as_deref();
        let message = &message;
        let outcome = retry_on_transient(&self.retry, move |attempt| {
            if let Some(metrics) = metrics {
                metrics.record_retry_attempt("publish", attempt);
            }
            sink.send(message)
        })
        .await;

        let attempts = outcome.attempts();
        match outcome {
            RetryResult::Success { .. } => {
                tracing::info!(
                    partition = self.partition,
                    order_id = %event.order_id,
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    attempts = attempts,
                    "✅ Published order event"
                );
                Ok(Ack { event_id: event.event_id, attempts })
            }
            RetryResult::Exhausted { error, .. } | RetryResult::PermanentFailure { error, .. } => {
                let reason = error.to_string();
                self.park(event, attempts, &reason).await?;
                Err(PublishError::Parked { event_id: event.event_id, attempts, reason })
            }
        }
    }

    async fn park(&self, event: &OrderEvent, attempts: u32, reason: &str) -> Result<(), PublishError> {
        match self.outbox.enqueue(event, attempts, reason).await {
            Ok(()) => {
                tracing::warn!(
                    target: DELIVERY_TARGET,
                    order_id = %event.order_id,
                    event_id = %event.event_id,
                    reason = %reason,
                    "📥 Event parked in outbox"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    target: DELIVERY_TARGET,
                    order_id = %event.order_id,
                    event_id = %event.event_id,
                    payload = ?event.to_json().ok(),
                    error = %e,
                    "❌ Event could not be parked, manual replay required"
                );
                Err(PublishError::Lost { event_id: event.event_id, reason: e.to_string() })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{NewOrder, Order, OrderStatus};
    use crate::messaging::{InMemoryPendingEvents, InMemorySink, SinkError};
    use chrono::Utc;
    use rust_decimal::Decimal;
    use std::time::Duration;

    fn settings(partitions: usize) -> PublisherSettings {
        PublisherSettings {
            topic: "order-events".into(),
            partition_workers: partitions,
            retry: RetryConfig {
                max_attempts: 3,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                multiplier: 2.0,
            },
        }
    }

    fn order() -> Order {
        let new_order = NewOrder::new("Alice", Decimal::new(10000, 2)).validated().unwrap();
        Order::from_new(OrderId::generate(), new_order, Utc::now())
    }

    fn setup(partitions: usize) -> (Arc<InMemorySink>, Arc<InMemoryPendingEvents>, PartitionedPublisher) {
        let sink = Arc::new(InMemorySink::new());
        let outbox = Arc::new(InMemoryPendingEvents::new());
        let publisher = PartitionedPublisher::spawn(sink.clone(), outbox.clone(), settings(partitions), None);
        (sink, outbox, publisher)
    }

    #[tokio::test]
    async fn test_delivers_with_event_id_and_order_key() {
        let (sink, _, publisher) = setup(3);
        let order = order();
        let event = OrderEvent::created(&order);

        let ack = publisher.publish(&event).await.unwrap();

        assert_eq!(ack, Ack { event_id: event.event_id, attempts: 1 });
        let delivered = sink.delivered().await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].key, order.id.to_string());
        assert_eq!(delivered[0].event_id, event.event_id);
    }

    #[tokio::test]
    async fn test_retries_reuse_the_same_event_id() {
        let (sink, _, publisher) = setup(1);
        sink.fail_next(2, SinkError::Transient("leader not available".into())).await;
        let event = OrderEvent::created(&order());

        let ack = publisher.publish(&event).await.unwrap();

        assert_eq!(ack.attempts, 3);
        assert_eq!(sink.attempts(), 3);
        let delivered = sink.delivered().await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].event_id, event.event_id);
    }

    #[tokio::test]
    async fn test_exhausted_retries_park_the_event() {
        let (sink, outbox, publisher) = setup(1);
        sink.fail_always(Some(SinkError::Transient("broker down".into()))).await;
        let event = OrderEvent::created(&order());

        let error = publisher.publish(&event).await.unwrap_err();

        assert!(matches!(error, PublishError::Parked { attempts: 3, .. }));
        assert_eq!(error.event_id(), event.event_id);
        let pending = outbox.oldest(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].event_id(), event.event_id);
    }

    #[tokio::test]
    async fn test_permanent_failure_parks_without_retry() {
        let (sink, outbox, publisher) = setup(1);
        sink.fail_next(1, SinkError::Permanent("message too large".into())).await;

        let error = publisher.publish(&OrderEvent::created(&order())).await.unwrap_err();

        assert!(matches!(error, PublishError::Parked { attempts: 1, .. }));
        assert_eq!(sink.attempts(), 1);
        assert_eq!(outbox.depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_newer_event_waits_behind_backlog() {
        let (sink, outbox, publisher) = setup(3);
        let order = order();
        let created = OrderEvent::created(&order);

        sink.fail_always(Some(SinkError::Transient("broker down".into()))).await;
        assert!(publisher.publish(&created).await.is_err());
        sink.fail_always(None).await;

        let mut confirmed = order.clone();
        confirmed.status = OrderStatus::Confirmed;
        let changed = OrderEvent::status_changed(OrderStatus::Pending, &confirmed);
        let error = publisher.publish(&changed).await.unwrap_err();

        assert!(matches!(error, PublishError::Deferred { .. }));
        assert!(sink.delivered().await.is_empty());

        let backlog: Vec<Uuid> = outbox.oldest(10).await.unwrap().iter().map(|p| p.event_id()).collect();
        assert_eq!(backlog, vec![created.event_id, changed.event_id]);
    }

    #[tokio::test]
    async fn test_events_of_one_order_arrive_in_order_across_partitions() {
        let (sink, _, publisher) = setup(3);
        let publisher = Arc::new(publisher);
        let orders: Vec<Order> = (0..6).map(|_| order()).collect();

        let mut handles = Vec::new();
        for order in orders.clone() {
            let publisher = publisher.clone();
            handles.push(tokio::spawn(async move {
                let mut current = order.clone();
                publisher.publish(&OrderEvent::created(&current)).await.unwrap();
                for status in [OrderStatus::Confirmed, OrderStatus::Preparing, OrderStatus::Ready] {
                    let previous = current.status;
                    current.status = status;
                    current.version += 1;
                    publisher.publish(&OrderEvent::status_changed(previous, &current)).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let delivered = sink.delivered().await;
        assert_eq!(delivered.len(), 24);
        for order in orders {
            let versions: Vec<i64> = delivered
                .iter()
                .filter(|m| m.key == order.id.to_string())
                .map(|m| OrderEvent::from_json(&m.payload).unwrap().order_snapshot.version)
                .collect();
            assert_eq!(versions, vec![0, 1, 2, 3]);
        }
    }

    #[test]
    fn test_publish_error_maps_to_order_error() {
        let event_id = Uuid::new_v4();
        let error: OrderError = PublishError::Closed { event_id }.into();
        assert_eq!(error.code(), "EVENT_PUBLISH_FAILED");
    }
}
