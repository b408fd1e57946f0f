use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::domain::order::OrderId;
use crate::metrics::Metrics;
use super::outbox::PendingEventStore;
use super::DELIVERY_TARGET;
use super::sink::{EventSink, OutboundMessage};

// ============================================================================
// Outbox Forwarder - replays parked events
// ============================================================================
//
// Polls the pending-event outbox and replays entries oldest-first through
// the sink. Within one pass, an order whose replay fails is skipped for the
// rest of the pass so its later events never overtake the failed one.
// Delivered entries are removed; failures bump the attempt count.
//
// ============================================================================

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub delivered: usize,
    pub failed: usize,
    /// Entries held back because an earlier event of their order failed
    pub skipped: usize,
}

pub struct OutboxForwarder {
    outbox: Arc<dyn PendingEventStore>,
    sink: Arc<dyn EventSink>,
    topic: String,
    batch_size: usize,
    poll_interval: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl OutboxForwarder {
    pub fn new(
        outbox: Arc<dyn PendingEventStore>,
        sink: Arc<dyn EventSink>,
        topic: impl Into<String>,
        batch_size: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            outbox,
            sink,
            topic: topic.into(),
            batch_size: batch_size.max(1),
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// One replay pass over at most `batch_size` entries
    pub async fn drain_once(&self) -> anyhow::Result<DrainReport> {
        let batch = self.outbox.oldest(self.batch_size).await?;
        let mut report = DrainReport::default();
        let mut blocked: HashSet<OrderId> = HashSet::new();

        for pending in batch {
            if blocked.contains(&pending.order_id()) {
                report.skipped += 1;
                continue;
            }

            let sent = match OutboundMessage::from_event(&self.topic, &pending.event) {
                Ok(message) => self.sink.send(&message).await.map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };

            match sent {
                Ok(()) => {
                    self.outbox.mark_delivered(&pending).await?;
                    report.delivered += 1;
                    tracing::info!(
                        order_id = %pending.order_id(),
                        event_id = %pending.event_id(),
                        attempts = pending.attempts + 1,
                        "📬 Replayed parked event"
                    );
                }
                Err(reason) => {
                    self.outbox.record_failure(&pending, &reason).await?;
                    blocked.insert(pending.order_id());
                    report.failed += 1;
                    tracing::warn!(
                        target: DELIVERY_TARGET,
                        order_id = %pending.order_id(),
                        event_id = %pending.event_id(),
                        attempts = pending.attempts + 1,
                        error = %reason,
                        "Replay failed, will retry"
                    );
                }
            }

            if let Some(metrics) = &self.metrics {
                metrics.record_replay(!blocked.contains(&pending.order_id()));
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.set_outbox_depth(self.outbox.depth().await?);
        }

        Ok(report)
    }

    /// Poll forever on the configured interval
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                interval_ms = self.poll_interval.as_millis() as u64,
                batch_size = self.batch_size,
                "🔄 Outbox forwarder started"
            );

            let mut ticker = tokio::time::interval(self.poll_interval);
            loop {
                ticker.tick().await;
                match self.drain_once().await {
                    Ok(report) if report.delivered + report.failed > 0 => {
                        tracing::debug!(
                            delivered = report.delivered,
                            failed = report.failed,
                            skipped = report.skipped,
                            "Outbox pass complete"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(target: DELIVERY_TARGET, error = %e, "Outbox pass failed"),
                }
            }
        })
    }
}
