use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::messaging::{EventPublisher, DELIVERY_TARGET};
use crate::metrics::Metrics;
use crate::store::{set_status, OrderStore};

use super::access::{AccessPolicy, Action, Principal};
use super::commands::{CommandReply, Committed, DeliveryStatus, OrderCommand};
use super::errors::OrderError;
use super::events::OrderEvent;
use super::record::Order;
use super::state_machine::transition;
use super::value_objects::{NewOrder, OrderId, OrderStatus, Page};

// ============================================================================
// Order Lifecycle Engine
// ============================================================================
//
// Orchestrates: Authorize → Store (compare-and-swap) → Event → Publish
//
// A mutation is committed once the store accepts it. Publishing comes
// after and never undoes the commit: if the event cannot be confirmed
// within `publish_timeout` the command still succeeds, with its delivery
// reported as pending. The engine never retries a version conflict; the
// caller re-reads and decides.
//
// ============================================================================

const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(2);

pub struct OrderLifecycleEngine {
    store: Arc<dyn OrderStore>,
    publisher: Arc<dyn EventPublisher>,
    policy: AccessPolicy,
    publish_timeout: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl OrderLifecycleEngine {
    pub fn new(store: Arc<dyn OrderStore>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            store,
            publisher,
            policy: AccessPolicy::default(),
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            metrics: None,
        }
    }

    pub fn with_policy(mut self, policy: AccessPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Single entry point for inbound commands
    pub async fn execute(&self, principal: &Principal, command: OrderCommand) -> Result<CommandReply, OrderError> {
        let name = command.name();
        let started = Instant::now();

        let result = match self.policy.authorize(principal, command.action()) {
            Ok(()) => self.dispatch(principal, command).await,
            Err(denied) => Err(denied),
        };

        if let Some(metrics) = &self.metrics {
            let outcome = match &result {
                Ok(CommandReply::Committed(committed)) if committed.is_degraded() => "degraded",
                Ok(_) => "ok",
                Err(e) => e.code(),
            };
            metrics.record_command(name, outcome, started.elapsed().as_secs_f64());
            if matches!(result, Err(OrderError::Conflict { .. })) {
                metrics.record_conflict();
            }
        }

        result
    }

    pub async fn create_order(&self, principal: &Principal, new_order: NewOrder) -> Result<Committed, OrderError> {
        self.policy.authorize(principal, Action::Create)?;
        self.create(principal, new_order).await
    }

    pub async fn update_status(
        &self,
        principal: &Principal,
        id: OrderId,
        new_status: OrderStatus,
        expected_version: Option<i64>,
    ) -> Result<Committed, OrderError> {
        self.policy.authorize(principal, Action::UpdateStatus)?;
        self.change_status(id, new_status, expected_version).await
    }

    /// Hard delete; the DELETED event carries the last state
    pub async fn delete_order(&self, principal: &Principal, id: OrderId) -> Result<Committed, OrderError> {
        self.policy.authorize(principal, Action::Delete)?;
        self.delete(id).await
    }

    pub async fn get_order(&self, principal: &Principal, id: OrderId) -> Result<Order, OrderError> {
        self.policy.authorize(principal, Action::Read)?;
        self.store.get(id).await
    }

    pub async fn list_by_status(
        &self,
        principal: &Principal,
        status: OrderStatus,
        page: Page,
    ) -> Result<Vec<Order>, OrderError> {
        self.policy.authorize(principal, Action::Read)?;
        self.store.query_by_status(status, page).await
    }

    pub async fn list_by_customer(
        &self,
        principal: &Principal,
        name_prefix: &str,
        page: Page,
    ) -> Result<Vec<Order>, OrderError> {
        self.policy.authorize(principal, Action::Read)?;
        self.store.query_by_customer(name_prefix, page).await
    }

    /// Run an already authorized command
    async fn dispatch(&self, principal: &Principal, command: OrderCommand) -> Result<CommandReply, OrderError> {
        match command {
            OrderCommand::CreateOrder(new_order) => self.create(principal, new_order).await.map(CommandReply::Committed),
            OrderCommand::UpdateOrderStatus { id, new_status, expected_version } => self
                .change_status(id, new_status, expected_version)
                .await
                .map(CommandReply::Committed),
            OrderCommand::DeleteOrder { id } => self.delete(id).await.map(CommandReply::Committed),
            OrderCommand::GetOrder { id } => self.store.get(id).await.map(CommandReply::Order),
            OrderCommand::ListOrdersByStatus { status, page } => {
                self.store.query_by_status(status, page).await.map(CommandReply::Orders)
            }
            OrderCommand::ListOrdersByCustomer { name, page } => {
                self.store.query_by_customer(&name, page).await.map(CommandReply::Orders)
            }
        }
    }

    async fn create(&self, principal: &Principal, new_order: NewOrder) -> Result<Committed, OrderError> {
        let order = self.store.insert(new_order).await?;
        tracing::info!(
            order_id = %order.id,
            customer = %order.customer_name,
            amount = %order.total_amount,
            subject = %principal.subject,
            "✅ Order created"
        );

        let event = OrderEvent::created(&order);
        Ok(self.commit(order, event, "create_order").await)
    }

    async fn change_status(
        &self,
        id: OrderId,
        new_status: OrderStatus,
        expected_version: Option<i64>,
    ) -> Result<Committed, OrderError> {
        let current = self.store.get(id).await?;
        if let Some(expected) = expected_version {
            if expected != current.version {
                return Err(OrderError::Conflict { id, expected, actual: current.version });
            }
        }

        transition(current.status, new_status)?;

        let updated = self
            .store
            .compare_and_swap(id, current.version, set_status(new_status))
            .await?;

        tracing::info!(
            order_id = %id,
            from = %current.status,
            to = %updated.status,
            version = updated.version,
            "🔁 Order status changed"
        );

        let event = OrderEvent::status_changed(current.status, &updated);
        Ok(self.commit(updated, event, "update_order_status").await)
    }

    async fn delete(&self, id: OrderId) -> Result<Committed, OrderError> {
        let snapshot = self.store.delete(id).await?;
        tracing::info!(order_id = %id, version = snapshot.version, "🗑️  Order deleted");

        let event = OrderEvent::deleted(&snapshot);
        Ok(self.commit(snapshot, event, "delete_order").await)
    }

    /// Publish the event of an already committed mutation
    async fn commit(&self, order: Order, event: OrderEvent, command: &'static str) -> Committed {
        let event_id = event.event_id;

        let delivery = match tokio::time::timeout(self.publish_timeout, self.publisher.publish(&event)).await {
            Ok(Ok(ack)) => DeliveryStatus::Delivered { attempts: ack.attempts },
            Ok(Err(error)) => {
                let error = OrderError::from(error);
                tracing::warn!(
                    target: DELIVERY_TARGET,
                    order_id = %order.id,
                    event_id = %event_id,
                    event_type = %event.event_type,
                    code = error.code(),
                    error = %error,
                    "⚠️  Order committed but event not delivered"
                );
                DeliveryStatus::Pending { reason: error.to_string() }
            }
            Err(_) => {
                tracing::warn!(
                    target: DELIVERY_TARGET,
                    order_id = %order.id,
                    event_id = %event_id,
                    event_type = %event.event_type,
                    timeout_ms = self.publish_timeout.as_millis() as u64,
                    "⚠️  Order committed, delivery still in progress"
                );
                DeliveryStatus::Pending {
                    reason: format!(
                        "delivery of event {} not confirmed within {}ms",
                        event_id,
                        self.publish_timeout.as_millis()
                    ),
                }
            }
        };

        if matches!(delivery, DeliveryStatus::Pending { .. }) {
            if let Some(metrics) = &self.metrics {
                metrics.record_degraded(command);
            }
        }

        Committed { order, event_id, delivery }
    }
}
