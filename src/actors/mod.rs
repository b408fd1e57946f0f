// ============================================================================
// Actors - long-lived supervisory components (kameo)
// ============================================================================

pub mod health;

pub use health::{
    CircuitCheck, ComponentHealth, GetSystemHealth, HealthMonitorActor, HealthCheck, HealthStatus,
    OutboxCheck, RunChecks, SystemHealth, UpdateHealth,
};
