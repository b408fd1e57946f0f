use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

use order_lifecycle::domain::order::{
    NewOrder, Order, OrderError, OrderEvent, OrderEventType, OrderId, OrderLifecycleEngine, OrderStatus,
    Page, Principal,
};
use order_lifecycle::messaging::{
    DrainReport, InMemoryPendingEvents, InMemorySink, OutboxForwarder, PartitionedPublisher,
    PendingEventStore, PublisherSettings, SinkError,
};
use order_lifecycle::store::{InMemoryOrderStore, OrderMutator, OrderStore};
use order_lifecycle::utils::RetryConfig;

const TOPIC: &str = "order-events";

struct Harness {
    sink: Arc<InMemorySink>,
    outbox: Arc<InMemoryPendingEvents>,
    engine: OrderLifecycleEngine,
}

impl Harness {
    fn new() -> Self {
        Self::build(Arc::new(InMemoryOrderStore::new()), Duration::from_secs(1))
    }

    fn build(store: Arc<dyn OrderStore>, publish_timeout: Duration) -> Self {
        let sink = Arc::new(InMemorySink::new());
        let outbox = Arc::new(InMemoryPendingEvents::new());
        let publisher = PartitionedPublisher::spawn(
            sink.clone(),
            outbox.clone(),
            PublisherSettings {
                topic: TOPIC.into(),
                partition_workers: 3,
                retry: RetryConfig {
                    max_attempts: 3,
                    initial_delay: Duration::from_millis(1),
                    max_delay: Duration::from_millis(5),
                    multiplier: 2.0,
                },
            },
            None,
        );
        let engine = OrderLifecycleEngine::new(store, Arc::new(publisher))
            .with_publish_timeout(publish_timeout);

        Self { sink, outbox, engine }
    }

    fn forwarder(&self) -> OutboxForwarder {
        OutboxForwarder::new(
            self.outbox.clone(),
            self.sink.clone(),
            TOPIC,
            100,
            Duration::from_millis(10),
        )
    }

    async fn published(&self) -> Vec<OrderEvent> {
        self.sink
            .delivered()
            .await
            .iter()
            .map(|message| OrderEvent::from_json(&message.payload).unwrap())
            .collect()
    }
}

/// Holds the first `readers` calls to `get` until all of them have arrived,
/// so concurrent updaters are guaranteed to read the same version
struct GatedStore {
    inner: InMemoryOrderStore,
    gate: Barrier,
    readers: usize,
    reads: AtomicUsize,
}

impl GatedStore {
    fn new(readers: usize) -> Self {
        Self {
            inner: InMemoryOrderStore::new(),
            gate: Barrier::new(readers),
            readers,
            reads: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl OrderStore for GatedStore {
    async fn insert(&self, new_order: NewOrder) -> Result<Order, OrderError> {
        self.inner.insert(new_order).await
    }

    async fn get(&self, id: OrderId) -> Result<Order, OrderError> {
        let order = self.inner.get(id).await?;
        if self.reads.fetch_add(1, Ordering::SeqCst) < self.readers {
            self.gate.wait().await;
        }
        Ok(order)
    }

    async fn compare_and_swap(
        &self,
        id: OrderId,
        expected_version: i64,
        mutator: OrderMutator,
    ) -> Result<Order, OrderError> {
        self.inner.compare_and_swap(id, expected_version, mutator).await
    }

    async fn delete(&self, id: OrderId) -> Result<Order, OrderError> {
        self.inner.delete(id).await
    }

    async fn query_by_status(&self, status: OrderStatus, page: Page) -> Result<Vec<Order>, OrderError> {
        self.inner.query_by_status(status, page).await
    }

    async fn query_by_customer(&self, name_prefix: &str, page: Page) -> Result<Vec<Order>, OrderError> {
        self.inner.query_by_customer(name_prefix, page).await
    }
}

fn alice() -> NewOrder {
    NewOrder::new("Alice", Decimal::new(10000, 2))
}

#[tokio::test]
async fn test_order_walks_through_its_lifecycle() {
    let harness = Harness::new();
    let admin = Principal::admin("ops");

    let created = harness.engine.create_order(&admin, alice()).await.unwrap();
    assert!(!created.is_degraded());
    assert_eq!(created.order.version, 0);
    let id = created.order.id;

    let confirmed = harness
        .engine
        .update_status(&admin, id, OrderStatus::Confirmed, Some(0))
        .await
        .unwrap();
    assert_eq!(confirmed.order.version, 1);

    let skipped = harness.engine.update_status(&admin, id, OrderStatus::Delivered, None).await;
    assert!(matches!(skipped, Err(OrderError::Transition { .. })));

    harness.engine.delete_order(&admin, id).await.unwrap();
    assert_eq!(harness.engine.get_order(&admin, id).await, Err(OrderError::NotFound(id)));

    let published = harness.published().await;
    let kinds: Vec<_> = published.iter().map(|e| e.event_type).collect();
    assert_eq!(
        kinds,
        vec![OrderEventType::Created, OrderEventType::StatusChanged, OrderEventType::Deleted]
    );
    assert!(published.iter().all(|e| e.order_id == id));
    assert!(harness
        .sink
        .delivered()
        .await
        .iter()
        .all(|m| m.key == id.to_string() && m.topic == TOPIC));
}

#[tokio::test]
async fn test_broker_outage_parks_events_and_replays_them_in_order() {
    let harness = Harness::new();
    let admin = Principal::admin("ops");
    harness
        .sink
        .fail_always(Some(SinkError::Transient("broker unavailable".into())))
        .await;

    // both mutations commit while nothing reaches the broker
    let created = harness.engine.create_order(&admin, alice()).await.unwrap();
    assert!(created.is_degraded());
    let id = created.order.id;
    let confirmed = harness
        .engine
        .update_status(&admin, id, OrderStatus::Confirmed, None)
        .await
        .unwrap();
    assert!(confirmed.is_degraded());
    assert_eq!(confirmed.order.version, 1);
    assert_eq!(harness.outbox.depth().await.unwrap(), 2);

    harness.sink.fail_always(None).await;
    let report = harness.forwarder().drain_once().await.unwrap();
    assert_eq!(report, DrainReport { delivered: 2, failed: 0, skipped: 0 });

    let ids: Vec<_> = harness.published().await.iter().map(|e| e.event_id).collect();
    assert_eq!(ids, vec![created.event_id, confirmed.event_id]);

    // backlog cleared, so the next event goes straight out
    let preparing = harness
        .engine
        .update_status(&admin, id, OrderStatus::Preparing, None)
        .await
        .unwrap();
    assert!(!preparing.is_degraded());
    assert_eq!(harness.published().await.len(), 3);
}

#[tokio::test]
async fn test_concurrent_updates_have_a_single_winner() {
    let harness = Harness::new();
    let admin = Principal::admin("ops");
    let id = harness.engine.create_order(&admin, alice()).await.unwrap().order.id;

    let (confirm, cancel) = tokio::join!(
        harness.engine.update_status(&admin, id, OrderStatus::Confirmed, Some(0)),
        harness.engine.update_status(&admin, id, OrderStatus::Cancelled, Some(0)),
    );

    let outcomes = [confirm, cancel];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(OrderError::Conflict { expected: 0, actual: 1, .. }))));

    let order = harness.engine.get_order(&admin, id).await.unwrap();
    assert_eq!(order.version, 1);
    assert_eq!(harness.published().await.len(), 2);
}

#[tokio::test]
async fn test_racing_updaters_are_serialized_by_the_store() {
    let harness = Harness::build(Arc::new(GatedStore::new(2)), Duration::from_secs(1));
    let admin = Principal::admin("ops");
    let id = harness.engine.create_order(&admin, alice()).await.unwrap().order.id;

    // no caller version: both read v0 and only the store's compare-and-swap decides
    let (confirm, cancel) = tokio::join!(
        harness.engine.update_status(&admin, id, OrderStatus::Confirmed, None),
        harness.engine.update_status(&admin, id, OrderStatus::Cancelled, None),
    );

    let outcomes = [confirm, cancel];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(OrderError::Conflict { expected: 0, actual: 1, .. }))));

    let winner = outcomes.iter().find_map(|r| r.as_ref().ok()).unwrap();
    let order = harness.engine.get_order(&admin, id).await.unwrap();
    assert_eq!(order.version, 1);
    assert_eq!(order.status, winner.order.status);

    let published = harness.published().await;
    assert_eq!(published.len(), 2);
    assert_eq!(published[1].event_id, winner.event_id);
}

#[tokio::test]
async fn test_slow_broker_commits_degraded_and_still_delivers() {
    let harness = Harness::build(Arc::new(InMemoryOrderStore::new()), Duration::from_millis(20));
    let admin = Principal::admin("ops");
    harness.sink.set_delay(Some(Duration::from_millis(200))).await;

    let created = harness.engine.create_order(&admin, alice()).await.unwrap();
    assert!(created.is_degraded());
    assert!(created.warning().is_some());

    // the partition worker keeps sending after the caller stopped waiting
    for _ in 0..100 {
        if !harness.sink.delivered().await.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let published = harness.published().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].event_id, created.event_id);
    assert_eq!(harness.outbox.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn test_customer_queries_see_committed_orders() {
    let harness = Harness::new();
    let user = Principal::user("alice@example.com");

    for _ in 0..3 {
        harness.engine.create_order(&user, alice()).await.unwrap();
    }
    harness
        .engine
        .create_order(&user, NewOrder::new("Bob", Decimal::new(550, 2)))
        .await
        .unwrap();

    let pending = harness
        .engine
        .list_by_status(&user, OrderStatus::Pending, Default::default())
        .await
        .unwrap();
    assert_eq!(pending.len(), 4);

    let alices = harness
        .engine
        .list_by_customer(&user, "AL", Default::default())
        .await
        .unwrap();
    assert_eq!(alices.len(), 3);
    assert!(alices.iter().all(|o| o.customer_name == "Alice"));
}
