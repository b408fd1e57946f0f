//! Configuration for the order lifecycle service.
//!
//! Loaded from environment variables with defaults; `main` reads `.env`
//! through `dotenvy` first so local overrides need no exported variables.

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::order::{parse_roles, AccessPolicy, Action, Role};
use crate::utils::{CircuitBreakerConfig, RetryConfig};

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub scylla: ScyllaConfig,
    pub redpanda: RedpandaConfig,
    pub publisher: PublisherConfig,
    pub circuit_breaker: CircuitConfig,
    pub outbox: OutboxConfig,
    pub consumer: ConsumerConfig,
    pub admission: AdmissionConfig,
    pub access: AccessConfig,
    pub metrics: MetricsConfig,
}

/// ScyllaDB connection and keyspace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScyllaConfig {
    /// Contact points, comma-separated in `SCYLLA_NODES`
    pub nodes: Vec<String>,
    pub keyspace: String,
    pub replication_factor: u32,
}

/// Redpanda/Kafka producer and topic layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedpandaConfig {
    /// Broker addresses (comma-separated)
    pub brokers: String,
    pub topic: String,
    /// Partition count used when the topic is created
    pub partitions: i32,
    pub replication: i32,
    /// librdkafka `message.timeout.ms`
    pub message_timeout_ms: u64,
}

/// Event publication behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// How long a command waits for delivery before reporting it pending
    pub timeout_ms: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Number of partition workers (one FIFO lane each)
    pub partition_workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitConfig {
    pub failure_threshold: u32,
    pub open_secs: u64,
    pub success_threshold: u32,
}

/// Pending-event outbox forwarder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxConfig {
    pub poll_interval_ms: u64,
    pub batch_size: usize,
    /// Backlog size above which the outbox reports itself degraded
    pub degraded_depth: usize,
}

/// Order-event consumer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    pub enabled: bool,
    pub group_id: String,
    /// How many recent event ids are remembered for deduplication
    pub dedup_capacity: usize,
}

/// Token-bucket admission gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    pub capacity: u32,
    pub refill_tokens: u32,
    pub refill_secs: u64,
}

/// Roles permitted per action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessConfig {
    pub read_roles: Vec<Role>,
    pub create_roles: Vec<Role>,
    pub update_roles: Vec<Role>,
    pub delete_roles: Vec<Role>,
}

/// Metrics server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub host: String,
    pub port: u16,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// Unparseable numeric values fall back to their default; unknown role
    /// names are rejected.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let string = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let roles = |key: &str, default: &str| -> anyhow::Result<Vec<Role>> {
            Ok(parse_roles(&string(key, default))?)
        };

        Ok(Self {
            scylla: ScyllaConfig {
                nodes: string("SCYLLA_NODES", "127.0.0.1:9042")
                    .split(',')
                    .map(str::trim)
                    .filter(|node| !node.is_empty())
                    .map(String::from)
                    .collect(),
                keyspace: string("SCYLLA_KEYSPACE", "orders_ks"),
                replication_factor: parsed(&lookup, "SCYLLA_REPLICATION", 1),
            },
            redpanda: RedpandaConfig {
                brokers: string("REDPANDA_BROKERS", "127.0.0.1:9092"),
                topic: string("ORDER_EVENTS_TOPIC", "order-events"),
                partitions: parsed(&lookup, "ORDER_EVENTS_PARTITIONS", 3),
                replication: parsed(&lookup, "ORDER_EVENTS_REPLICATION", 1),
                message_timeout_ms: parsed(&lookup, "REDPANDA_MESSAGE_TIMEOUT_MS", 5000),
            },
            publisher: PublisherConfig {
                timeout_ms: parsed(&lookup, "PUBLISH_TIMEOUT_MS", 2000),
                max_attempts: parsed(&lookup, "PUBLISH_MAX_ATTEMPTS", 3),
                initial_backoff_ms: parsed(&lookup, "PUBLISH_INITIAL_BACKOFF_MS", 100),
                max_backoff_ms: parsed(&lookup, "PUBLISH_MAX_BACKOFF_MS", 1000),
                partition_workers: parsed(&lookup, "PUBLISH_PARTITION_WORKERS", 3),
            },
            circuit_breaker: CircuitConfig {
                failure_threshold: parsed(&lookup, "CIRCUIT_FAILURE_THRESHOLD", 5),
                open_secs: parsed(&lookup, "CIRCUIT_OPEN_SECS", 30),
                success_threshold: parsed(&lookup, "CIRCUIT_SUCCESS_THRESHOLD", 3),
            },
            outbox: OutboxConfig {
                poll_interval_ms: parsed(&lookup, "OUTBOX_POLL_INTERVAL_MS", 2000),
                batch_size: parsed(&lookup, "OUTBOX_BATCH_SIZE", 100),
                degraded_depth: parsed(&lookup, "OUTBOX_DEGRADED_DEPTH", 1000),
            },
            consumer: ConsumerConfig {
                enabled: parsed(&lookup, "ORDER_CONSUMER_ENABLED", true),
                group_id: string("ORDER_CONSUMER_GROUP", "order-lifecycle-consumers"),
                dedup_capacity: parsed(&lookup, "ORDER_CONSUMER_DEDUP_CAPACITY", 10_000),
            },
            admission: AdmissionConfig {
                capacity: parsed(&lookup, "ADMISSION_CAPACITY", 100),
                refill_tokens: parsed(&lookup, "ADMISSION_REFILL_TOKENS", 100),
                refill_secs: parsed(&lookup, "ADMISSION_REFILL_SECS", 60),
            },
            access: AccessConfig {
                read_roles: roles("ORDER_READ_ROLES", "USER,ADMIN")?,
                create_roles: roles("ORDER_CREATE_ROLES", "USER,ADMIN")?,
                update_roles: roles("ORDER_UPDATE_ROLES", "USER,ADMIN")?,
                delete_roles: roles("ORDER_DELETE_ROLES", "ADMIN")?,
            },
            metrics: MetricsConfig {
                host: string("METRICS_HOST", "0.0.0.0"),
                port: parsed(&lookup, "METRICS_PORT", 9090),
            },
        })
    }
}

fn parsed<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key = %key, value = %raw, "Ignoring unparseable setting, using default");
            default
        }),
        None => default,
    }
}

impl PublisherConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts.max(1),
            initial_delay: Duration::from_millis(self.initial_backoff_ms),
            max_delay: Duration::from_millis(self.max_backoff_ms),
            multiplier: 2.0,
        }
    }
}

impl CircuitConfig {
    pub fn breaker(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            open_duration: Duration::from_secs(self.open_secs),
            success_threshold: self.success_threshold,
        }
    }
}

impl OutboxConfig {
    /// Never zero; a zero interval would stall the forwarder
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl AccessConfig {
    pub fn policy(&self) -> AccessPolicy {
        AccessPolicy::permissive()
            .grant(Action::Read, self.read_roles.iter().copied())
            .grant(Action::Create, self.create_roles.iter().copied())
            .grant(Action::UpdateStatus, self.update_roles.iter().copied())
            .grant(Action::Delete, self.delete_roles.iter().copied())
    }
}
