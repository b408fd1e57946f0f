use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kameo::error::Infallible;
use kameo::prelude::*;
use kameo::reply::ReplyError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::messaging::PendingEventStore;
use crate::metrics::Metrics;
use crate::utils::{CircuitBreaker, CircuitState};

// ============================================================================
// Health Monitor Actor - aggregates component health
// ============================================================================
//
// Responsibilities:
// - Run registered checks on an interval (event sink breaker, outbox backlog)
// - Keep the last reported status of each component
// - Answer the /health endpoint with an aggregate verdict
//
// ============================================================================

/// Health status of a component
#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    pub fn label(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded(_) => "degraded",
            HealthStatus::Unhealthy(_) => "unhealthy",
        }
    }

    /// Gauge encoding: 0 = Unhealthy, 1 = Degraded, 2 = Healthy
    pub fn as_gauge(&self) -> i64 {
        match self {
            HealthStatus::Unhealthy(_) => 0,
            HealthStatus::Degraded(_) => 1,
            HealthStatus::Healthy => 2,
        }
    }

    fn reason(&self) -> Option<&str> {
        match self {
            HealthStatus::Healthy => None,
            HealthStatus::Degraded(reason) | HealthStatus::Unhealthy(reason) => Some(reason),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub last_check: DateTime<Utc>,
}

/// Something the monitor can ask "are you ok?"
#[async_trait]
pub trait HealthCheck: Send + Sync {
    fn component(&self) -> &'static str;

    async fn check(&self) -> HealthStatus;
}

/// Maps a circuit breaker's state onto health
pub struct CircuitCheck {
    breaker: CircuitBreaker,
}

impl CircuitCheck {
    pub fn new(breaker: CircuitBreaker) -> Self {
        Self { breaker }
    }
}

#[async_trait]
impl HealthCheck for CircuitCheck {
    fn component(&self) -> &'static str {
        self.breaker.name()
    }

    async fn check(&self) -> HealthStatus {
        match self.breaker.state().await {
            CircuitState::Closed => HealthStatus::Healthy,
            CircuitState::HalfOpen => HealthStatus::Degraded("Circuit breaker half-open".to_string()),
            CircuitState::Open => HealthStatus::Unhealthy("Circuit breaker open".to_string()),
        }
    }
}

/// Degraded once the undelivered backlog exceeds a threshold
pub struct OutboxCheck {
    outbox: Arc<dyn PendingEventStore>,
    degraded_depth: usize,
}

impl OutboxCheck {
    pub fn new(outbox: Arc<dyn PendingEventStore>, degraded_depth: usize) -> Self {
        Self { outbox, degraded_depth }
    }
}

#[async_trait]
impl HealthCheck for OutboxCheck {
    fn component(&self) -> &'static str {
        "outbox"
    }

    async fn check(&self) -> HealthStatus {
        match self.outbox.depth().await {
            Ok(depth) if depth > self.degraded_depth => {
                HealthStatus::Degraded(format!("{} events awaiting delivery", depth))
            }
            Ok(_) => HealthStatus::Healthy,
            Err(e) => HealthStatus::Unhealthy(format!("outbox unreadable: {}", e)),
        }
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug)]
pub struct UpdateHealth {
    pub component: String,
    pub status: HealthStatus,
}

/// Run every registered check now
#[derive(Debug)]
pub struct RunChecks;

#[derive(Debug)]
pub struct GetSystemHealth;

#[derive(Debug, Clone)]
pub struct SystemHealth {
    pub overall_status: HealthStatus,
    pub components: HashMap<String, ComponentHealth>,
    pub check_time: DateTime<Utc>,
}

impl SystemHealth {
    pub fn to_json(&self) -> serde_json::Value {
        let components: serde_json::Map<String, serde_json::Value> = self
            .components
            .iter()
            .map(|(name, health)| {
                (
                    name.clone(),
                    serde_json::json!({
                        "status": health.status.label(),
                        "reason": health.status.reason(),
                        "lastCheck": health.last_check,
                    }),
                )
            })
            .collect();

        serde_json::json!({
            "status": self.overall_status.label(),
            "reason": self.overall_status.reason(),
            "components": components,
            "checkTime": self.check_time,
        })
    }
}

impl Reply for SystemHealth {
    type Ok = Self;
    type Error = Infallible;
    type Value = Self;

    fn to_result(self) -> Result<Self, Infallible> {
        Ok(self)
    }

    fn into_any_err(self) -> Option<Box<dyn ReplyError>> {
        None
    }

    fn into_value(self) -> Self::Value {
        self
    }
}

// ============================================================================
// Health Monitor Actor
// ============================================================================

pub struct HealthMonitorActor {
    components: HashMap<String, ComponentHealth>,
    checks: Vec<Arc<dyn HealthCheck>>,
    check_interval: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl HealthMonitorActor {
    pub fn new(check_interval: Duration) -> Self {
        Self {
            components: HashMap::new(),
            checks: Vec::new(),
            check_interval,
            metrics: None,
        }
    }

    pub fn with_check(mut self, check: Arc<dyn HealthCheck>) -> Self {
        self.checks.push(check);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn record(&mut self, component: String, status: HealthStatus) {
        tracing::debug!(component = %component, status = ?status, "Updated component health");
        self.components.insert(
            component.clone(),
            ComponentHealth { name: component, status, last_check: Utc::now() },
        );
    }

    fn compute_overall_status(&self) -> HealthStatus {
        let mut unhealthy = Vec::new();
        let mut degraded = Vec::new();

        for (name, health) in &self.components {
            match &health.status {
                HealthStatus::Unhealthy(msg) => unhealthy.push(format!("{}: {}", name, msg)),
                HealthStatus::Degraded(msg) => degraded.push(format!("{}: {}", name, msg)),
                HealthStatus::Healthy => {}
            }
        }
        unhealthy.sort();
        degraded.sort();

        if !unhealthy.is_empty() {
            HealthStatus::Unhealthy(unhealthy.join(", "))
        } else if !degraded.is_empty() {
            HealthStatus::Degraded(degraded.join(", "))
        } else {
            HealthStatus::Healthy
        }
    }
}

impl Actor for HealthMonitorActor {
    type Args = Self;
    type Error = Infallible;

    async fn on_start(state: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        tracing::info!(checks = state.checks.len(), "🩺 HealthMonitorActor started");

        if !state.checks.is_empty() {
            let interval = state.check_interval;
            let monitor = actor_ref.downgrade();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    let Some(monitor) = monitor.upgrade() else { break };
                    if monitor.tell(RunChecks).await.is_err() {
                        break;
                    }
                }
            });
        }

        Ok(state)
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl Message<UpdateHealth> for HealthMonitorActor {
    type Reply = ();

    async fn handle(&mut self, msg: UpdateHealth, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.record(msg.component, msg.status);
    }
}

impl Message<RunChecks> for HealthMonitorActor {
    type Reply = ();

    async fn handle(&mut self, _msg: RunChecks, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let checks = self.checks.clone();
        for check in checks {
            let status = check.check().await;
            self.record(check.component().to_string(), status);
        }

        if let Some(metrics) = &self.metrics {
            metrics.set_health(self.compute_overall_status().as_gauge());
        }
    }
}

impl Message<GetSystemHealth> for HealthMonitorActor {
    type Reply = SystemHealth;

    async fn handle(&mut self, _msg: GetSystemHealth, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        SystemHealth {
            overall_status: self.compute_overall_status(),
            components: self.components.clone(),
            check_time: Utc::now(),
        }
    }
}
