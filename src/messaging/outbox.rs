use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, SubsecRound, Utc};
use futures_util::StreamExt;
use scylla::client::session::Session;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::order::{OrderEvent, OrderId};

// ============================================================================
// Pending-Event Outbox
// ============================================================================
//
// Events whose mutation committed but which could not be delivered are
// parked here, one FIFO backlog per order. The publisher refuses to send a
// newer event for an order that still has a backlog, and the forwarder
// drains backlogs oldest-first. Entries keep their original event id, so
// consumers see a replay as a duplicate, never as a new event.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct PendingEvent {
    pub event: OrderEvent,
    pub enqueued_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl PendingEvent {
    pub fn event_id(&self) -> Uuid {
        self.event.event_id
    }

    pub fn order_id(&self) -> OrderId {
        self.event.order_id
    }
}

#[async_trait]
pub trait PendingEventStore: Send + Sync {
    /// Park an event after `attempts` failed sends. Re-parking an event id
    /// that is already pending only updates its failure record.
    async fn enqueue(&self, event: &OrderEvent, attempts: u32, error: &str) -> Result<()>;

    async fn has_pending(&self, order_id: OrderId) -> Result<bool>;

    /// Oldest entries first; entries of one order keep their enqueue order
    async fn oldest(&self, limit: usize) -> Result<Vec<PendingEvent>>;

    async fn mark_delivered(&self, pending: &PendingEvent) -> Result<()>;

    async fn record_failure(&self, pending: &PendingEvent, error: &str) -> Result<()>;

    async fn depth(&self) -> Result<usize>;
}

// ============================================================================
// In-memory outbox
// ============================================================================

#[derive(Default)]
pub struct InMemoryPendingEvents {
    entries: Mutex<Vec<PendingEvent>>,
}

impl InMemoryPendingEvents {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PendingEventStore for InMemoryPendingEvents {
    async fn enqueue(&self, event: &OrderEvent, attempts: u32, error: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;

        if let Some(existing) = entries.iter_mut().find(|p| p.event_id() == event.event_id) {
            existing.attempts += attempts;
            existing.last_error = Some(error.to_string());
            return Ok(());
        }

        entries.push(PendingEvent {
            event: event.clone(),
            enqueued_at: Utc::now(),
            attempts,
            last_error: Some(error.to_string()),
        });
        Ok(())
    }

    async fn has_pending(&self, order_id: OrderId) -> Result<bool> {
        Ok(self.entries.lock().await.iter().any(|p| p.order_id() == order_id))
    }

    async fn oldest(&self, limit: usize) -> Result<Vec<PendingEvent>> {
        Ok(self.entries.lock().await.iter().take(limit).cloned().collect())
    }

    async fn mark_delivered(&self, pending: &PendingEvent) -> Result<()> {
        self.entries.lock().await.retain(|p| p.event_id() != pending.event_id());
        Ok(())
    }

    async fn record_failure(&self, pending: &PendingEvent, error: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.iter_mut().find(|p| p.event_id() == pending.event_id()) {
            entry.attempts += 1;
            entry.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn depth(&self) -> Result<usize> {
        Ok(self.entries.lock().await.len())
    }
}

// ============================================================================
// ScyllaDB outbox (table pending_order_events)
// ============================================================================

type PendingRow = (Uuid, DateTime<Utc>, Uuid, String, i32, Option<String>);

pub struct ScyllaPendingEvents {
    session: Arc<Session>,
    last_enqueued: StdMutex<DateTime<Utc>>,
}

impl ScyllaPendingEvents {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            last_enqueued: StdMutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }

    /// Strictly increasing millisecond timestamps, so two events of one
    /// order parked within the same millisecond still cluster in order.
    fn next_enqueue_time(&self) -> DateTime<Utc> {
        let now = Utc::now().trunc_subsecs(3);
        let mut last = self
            .last_enqueued
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let next = if now > *last { now } else { *last + ChronoDuration::milliseconds(1) };
        *last = next;
        next
    }

    async fn find(&self, order_id: OrderId, event_id: Uuid) -> Result<Option<(DateTime<Utc>, i32)>> {
        let result = self
            .session
            .query_unpaged(
                "SELECT enqueued_at, event_id, attempts FROM pending_order_events WHERE order_id = ?",
                (order_id.as_uuid(),),
            )
            .await?;

        let rows_result = result.into_rows_result()?;
        for row in rows_result.rows::<(DateTime<Utc>, Uuid, i32)>()? {
            let (enqueued_at, id, attempts) = row?;
            if id == event_id {
                return Ok(Some((enqueued_at, attempts)));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl PendingEventStore for ScyllaPendingEvents {
    async fn enqueue(&self, event: &OrderEvent, attempts: u32, error: &str) -> Result<()> {
        if let Some((enqueued_at, previous)) = self.find(event.order_id, event.event_id).await? {
            self.session
                .query_unpaged(
                    "UPDATE pending_order_events SET attempts = ?, last_error = ?
                     WHERE order_id = ? AND enqueued_at = ? AND event_id = ?",
                    (previous + attempts as i32, error, event.order_id.as_uuid(), enqueued_at, event.event_id),
                )
                .await?;
            return Ok(());
        }

        self.session
            .query_unpaged(
                "INSERT INTO pending_order_events (order_id, enqueued_at, event_id, payload, attempts, last_error)
                 VALUES (?, ?, ?, ?, ?, ?)",
                (
                    event.order_id.as_uuid(),
                    self.next_enqueue_time(),
                    event.event_id,
                    event.to_json()?,
                    attempts as i32,
                    error,
                ),
            )
            .await?;

        tracing::debug!(order_id = %event.order_id, event_id = %event.event_id, "Parked event in outbox");
        Ok(())
    }

    async fn has_pending(&self, order_id: OrderId) -> Result<bool> {
        let result = self
            .session
            .query_unpaged(
                "SELECT event_id FROM pending_order_events WHERE order_id = ? LIMIT 1",
                (order_id.as_uuid(),),
            )
            .await?;

        Ok(result.into_rows_result()?.maybe_first_row::<(Uuid,)>()?.is_some())
    }

    async fn oldest(&self, limit: usize) -> Result<Vec<PendingEvent>> {
        let mut rows = self
            .session
            .query_iter(
                "SELECT order_id, enqueued_at, event_id, payload, attempts, last_error FROM pending_order_events",
                &[],
            )
            .await?
            .rows_stream::<PendingRow>()?;

        let mut pending = Vec::new();
        while let Some(row) = rows.next().await {
            let (_, enqueued_at, _, payload, attempts, last_error) = row?;
            pending.push(PendingEvent {
                event: OrderEvent::from_json(&payload)?,
                enqueued_at,
                attempts: attempts.max(0) as u32,
                last_error,
            });
        }

        pending.sort_by(|a, b| a.enqueued_at.cmp(&b.enqueued_at));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn mark_delivered(&self, pending: &PendingEvent) -> Result<()> {
        self.session
            .query_unpaged(
                "DELETE FROM pending_order_events WHERE order_id = ? AND enqueued_at = ? AND event_id = ?",
                (pending.order_id().as_uuid(), pending.enqueued_at, pending.event_id()),
            )
            .await?;
        Ok(())
    }

    async fn record_failure(&self, pending: &PendingEvent, error: &str) -> Result<()> {
        self.session
            .query_unpaged(
                "UPDATE pending_order_events SET attempts = ?, last_error = ?
                 WHERE order_id = ? AND enqueued_at = ? AND event_id = ?",
                (
                    pending.attempts as i32 + 1,
                    error,
                    pending.order_id().as_uuid(),
                    pending.enqueued_at,
                    pending.event_id(),
                ),
            )
            .await?;
        Ok(())
    }

    async fn depth(&self) -> Result<usize> {
        let result = self
            .session
            .query_unpaged("SELECT COUNT(*) FROM pending_order_events", &[])
            .await?;

        let count = result
            .into_rows_result()?
            .maybe_first_row::<(i64,)>()?
            .map(|(count,)| count)
            .unwrap_or(0);
        Ok(count.max(0) as usize)
    }
}
