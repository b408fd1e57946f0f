// ============================================================================
// Messaging - getting order events onto the stream
// ============================================================================
//
// sink       EventSink trait and the wire message
// redpanda   Kafka-protocol sink (rdkafka) behind a circuit breaker
// memory     Recording sink for tests and dry runs
// publisher  EventPublisher trait and the partitioned publisher
// outbox     Durable parking lot for undelivered events
// forwarder  Background replay of the outbox
// consumer   Reads order events back and dispatches them once per event id
//
// ============================================================================

pub mod consumer;
pub mod forwarder;
pub mod memory;
pub mod outbox;
pub mod publisher;
pub mod redpanda;
pub mod sink;

pub use consumer::{
    ConsumeError, ConsumeOutcome, EventDispatcher, LoggingEventHandler, OrderEventHandler, RedpandaConsumer, SeenEvents,
};
pub use forwarder::{DrainReport, OutboxForwarder};
pub use memory::InMemorySink;
pub use outbox::{InMemoryPendingEvents, PendingEvent, PendingEventStore, ScyllaPendingEvents};
pub use publisher::{Ack, EventPublisher, PartitionedPublisher, PublishError, PublisherSettings};
pub use redpanda::RedpandaClient;
pub use sink::{EventSink, OutboundMessage, SinkError};

/// Tracing target for every delivery problem (failed sends, parking, replays)
pub const DELIVERY_TARGET: &str = "order_lifecycle::delivery";
