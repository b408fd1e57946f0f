use anyhow::{bail, Result};
use async_trait::async_trait;
use rdkafka::{
    admin::{AdminClient, AdminOptions, NewTopic, TopicReplication},
    client::DefaultClientContext,
    config::ClientConfig,
    error::{KafkaError, RDKafkaErrorCode},
    message::{Header, OwnedHeaders},
    producer::{FutureProducer, FutureRecord},
    util::Timeout,
};
use std::sync::Arc;
use std::time::Duration;

use crate::config::RedpandaConfig;
use crate::metrics::Metrics;
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
use super::sink::{EventSink, OutboundMessage, SinkError};
use super::DELIVERY_TARGET;

// ============================================================================
// Redpanda Client - Kafka-protocol event sink
// ============================================================================
//
// Every send goes through a circuit breaker; once the broker has failed
// `failure_threshold` times in a row sends are refused immediately and the
// publisher parks events in the outbox instead of waiting on timeouts.
//
// ============================================================================

const BREAKER_NAME: &str = "redpanda";

pub struct RedpandaClient {
    producer: FutureProducer,
    circuit_breaker: CircuitBreaker,
    config: RedpandaConfig,
}

impl RedpandaClient {
    pub fn new(config: RedpandaConfig, breaker: CircuitBreakerConfig, metrics: Option<Arc<Metrics>>) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", config.message_timeout_ms.to_string())
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .create()?;

        let mut circuit_breaker = CircuitBreaker::new(BREAKER_NAME, breaker);
        if let Some(metrics) = metrics {
            circuit_breaker = circuit_breaker.with_observer(Arc::new(move |from: CircuitState, to: CircuitState| {
                metrics.record_circuit_transition(&from.to_string(), &to.to_string(), to.as_gauge());
            }));
        }

        tracing::info!(brokers = %config.brokers, topic = %config.topic, "📡 Redpanda producer created");

        Ok(Self {
            producer,
            circuit_breaker,
            config,
        })
    }

    /// Create the order-events topic if it does not exist yet
    pub async fn ensure_topic(&self) -> Result<()> {
        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &self.config.brokers)
            .create()?;

        let topic = NewTopic::new(
            &self.config.topic,
            self.config.partitions,
            TopicReplication::Fixed(self.config.replication),
        );

        let results = admin.create_topics([&topic], &AdminOptions::new()).await?;
        for result in results {
            match result {
                Ok(name) => tracing::info!(
                    topic = %name,
                    partitions = self.config.partitions,
                    replication = self.config.replication,
                    "✅ Created topic"
                ),
                Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    tracing::debug!(topic = %name, "Topic already exists");
                }
                Err((name, code)) => bail!("Failed to create topic {}: {}", name, code),
            }
        }

        Ok(())
    }

    /// Breaker handle for health probing
    pub fn circuit_breaker(&self) -> CircuitBreaker {
        self.circuit_breaker.clone()
    }

    pub fn topic(&self) -> &str {
        &self.config.topic
    }
}

#[async_trait]
impl EventSink for RedpandaClient {
    async fn send(&self, message: &OutboundMessage) -> Result<(), SinkError> {
        let timeout = Duration::from_millis(self.config.message_timeout_ms);

        let result = self
            .circuit_breaker
            .call(async {
                let event_id = message.event_id.to_string();
                let headers = OwnedHeaders::new().insert(Header {
                    key: "event_id",
                    value: Some(event_id.as_str()),
                });

                let record = FutureRecord::to(&message.topic)
                    .key(&message.key)
                    .payload(&message.payload)
                    .headers(headers);

                self.producer
                    .send(record, Timeout::After(timeout))
                    .await
                    .map(|_| ())
                    .map_err(|(e, _)| classify(e))
            })
            .await;

        match result {
            Ok(()) => {
                tracing::debug!(
                    topic = %message.topic,
                    key = %message.key,
                    event_id = %message.event_id,
                    "Published to Redpanda"
                );
                Ok(())
            }
            Err(CircuitBreakerError::CircuitOpen) => Err(SinkError::CircuitOpen(BREAKER_NAME)),
            Err(CircuitBreakerError::OperationFailed(e)) => {
                tracing::warn!(
                    target: DELIVERY_TARGET,
                    error = %e,
                    topic = %message.topic,
                    event_id = %message.event_id,
                    "Failed to publish to Redpanda"
                );
                Err(e)
            }
        }
    }
}

/// Errors a resend cannot fix are permanent; everything else is worth a retry
fn classify(error: KafkaError) -> SinkError {
    match error {
        KafkaError::MessageProduction(
            code @ (RDKafkaErrorCode::MessageSizeTooLarge
            | RDKafkaErrorCode::TopicAuthorizationFailed
            | RDKafkaErrorCode::InvalidMessage),
        ) => SinkError::Permanent(code.to_string()),
        other => SinkError::Transient(other.to_string()),
    }
}
