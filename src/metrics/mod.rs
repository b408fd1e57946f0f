mod server;

use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec,
    IntGauge, Opts, Registry,
};

pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Covers:
// - Command throughput and latency, by command and outcome
// - Version conflicts
// - Event publication outcomes and degraded commits
// - Publish retry attempts
// - Pending-event outbox depth and replays
// - Consumed events, duplicates included
// - Circuit breaker state
// - Admission rejections
// - Overall health
//
// All metrics live in one registry scraped via /metrics.
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Commands
    pub commands_total: IntCounterVec,
    pub command_duration: HistogramVec,
    pub version_conflicts: IntCounter,

    // Delivery
    pub events_published: IntCounterVec,
    pub degraded_commits: IntCounterVec,
    pub retry_attempts_total: IntCounterVec,

    // Outbox
    pub outbox_depth: IntGauge,
    pub outbox_replays: IntCounterVec,

    // Consumer
    pub events_consumed: IntCounterVec,

    // Circuit Breaker
    pub circuit_breaker_state: IntGauge,
    pub circuit_breaker_transitions: IntCounterVec,

    // Admission / health
    pub admission_rejections: IntCounter,
    pub health_status: IntGauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let commands_total = IntCounterVec::new(
            Opts::new("order_commands_total", "Order commands handled"),
            &["command", "outcome"],
        )?;
        registry.register(Box::new(commands_total.clone()))?;

        let command_duration = HistogramVec::new(
            HistogramOpts::new("order_command_duration_seconds", "Order command latency")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0]),
            &["command"],
        )?;
        registry.register(Box::new(command_duration.clone()))?;

        let version_conflicts = IntCounter::new(
            "order_version_conflicts_total",
            "Writes rejected because the order version moved",
        )?;
        registry.register(Box::new(version_conflicts.clone()))?;

        let events_published = IntCounterVec::new(
            Opts::new("order_events_published_total", "Order event publication outcomes"),
            &["event_type", "outcome"],
        )?;
        registry.register(Box::new(events_published.clone()))?;

        let degraded_commits = IntCounterVec::new(
            Opts::new("order_degraded_commits_total", "Committed mutations whose event is still pending"),
            &["command"],
        )?;
        registry.register(Box::new(degraded_commits.clone()))?;

        let retry_attempts_total = IntCounterVec::new(
            Opts::new("retry_attempts_total", "Total send attempts"),
            &["operation", "attempt"],
        )?;
        registry.register(Box::new(retry_attempts_total.clone()))?;

        let outbox_depth = IntGauge::new(
            "order_outbox_depth",
            "Order events awaiting delivery",
        )?;
        registry.register(Box::new(outbox_depth.clone()))?;

        let outbox_replays = IntCounterVec::new(
            Opts::new("order_outbox_replays_total", "Outbox replay attempts"),
            &["outcome"],
        )?;
        registry.register(Box::new(outbox_replays.clone()))?;

        let events_consumed = IntCounterVec::new(
            Opts::new("order_events_consumed_total", "Order events read back from the topic"),
            &["event_type", "outcome"],
        )?;
        registry.register(Box::new(events_consumed.clone()))?;

        let circuit_breaker_state = IntGauge::new(
            "circuit_breaker_state",
            "Circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        let circuit_breaker_transitions = IntCounterVec::new(
            Opts::new("circuit_breaker_transitions_total", "Circuit breaker state transitions"),
            &["from_state", "to_state"],
        )?;
        registry.register(Box::new(circuit_breaker_transitions.clone()))?;

        let admission_rejections = IntCounter::new(
            "admission_rejections_total",
            "Requests refused by the admission gate",
        )?;
        registry.register(Box::new(admission_rejections.clone()))?;

        let health_status = IntGauge::new(
            "service_health_status",
            "Overall health (0=Unhealthy, 1=Degraded, 2=Healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        Ok(Self {
            registry,
            commands_total,
            command_duration,
            version_conflicts,
            events_published,
            degraded_commits,
            retry_attempts_total,
            outbox_depth,
            outbox_replays,
            events_consumed,
            circuit_breaker_state,
            circuit_breaker_transitions,
            admission_rejections,
            health_status,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_command(&self, command: &str, outcome: &str, duration_secs: f64) {
        self.commands_total.with_label_values(&[command, outcome]).inc();
        self.command_duration.with_label_values(&[command]).observe(duration_secs);
    }

    pub fn record_conflict(&self) {
        self.version_conflicts.inc();
    }

    pub fn record_publish(&self, event_type: &str, outcome: &str) {
        self.events_published.with_label_values(&[event_type, outcome]).inc();
    }

    pub fn record_consumed(&self, event_type: &str, outcome: &str) {
        self.events_consumed.with_label_values(&[event_type, outcome]).inc();
    }

    pub fn record_degraded(&self, command: &str) {
        self.degraded_commits.with_label_values(&[command]).inc();
    }

    pub fn record_retry_attempt(&self, operation: &str, attempt: u32) {
        self.retry_attempts_total.with_label_values(&[operation, &attempt.to_string()]).inc();
    }

    pub fn set_outbox_depth(&self, depth: usize) {
        self.outbox_depth.set(depth as i64);
    }

    pub fn record_replay(&self, delivered: bool) {
        let outcome = if delivered { "delivered" } else { "failed" };
        self.outbox_replays.with_label_values(&[outcome]).inc();
    }

    pub fn record_circuit_transition(&self, from_state: &str, to_state: &str, state_code: i64) {
        self.circuit_breaker_transitions.with_label_values(&[from_state, to_state]).inc();
        self.circuit_breaker_state.set(state_code);
    }

    pub fn record_admission_rejection(&self) {
        self.admission_rejections.inc();
    }

    pub fn set_health(&self, code: i64) {
        self.health_status.set(code);
    }
}
