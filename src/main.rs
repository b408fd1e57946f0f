use kameo::prelude::*;
use rust_decimal::Decimal;
use scylla::client::session::Session;
use scylla::client::session_builder::SessionBuilder;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use order_lifecycle::actors::{CircuitCheck, HealthMonitorActor, OutboxCheck};
use order_lifecycle::admission::{Admission, AdmissionGate, TokenBucket};
use order_lifecycle::config::Config;
use order_lifecycle::domain::order::{
    CommandReply, NewOrder, OrderCommand, OrderError, OrderLifecycleEngine, OrderStatus, Principal,
};
use order_lifecycle::messaging::{
    EventDispatcher, LoggingEventHandler, OutboxForwarder, PartitionedPublisher, PendingEventStore,
    PublisherSettings, RedpandaClient, RedpandaConsumer, ScyllaPendingEvents,
};
use order_lifecycle::metrics::{self, Metrics};
use order_lifecycle::store::{schema, ScyllaOrderStore};

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // RUST_LOG overrides the default filter
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,order_lifecycle=debug")),
        )
        .init();

    tracing::info!("🚀 Starting order lifecycle service");

    let config = Config::from_env()?;

    // === 1. Metrics ===
    let metrics = Arc::new(Metrics::new()?);
    tracing::info!("📊 Metrics registry created with {} metrics", metrics.registry().gather().len());

    // === 2. ScyllaDB session and schema ===
    tracing::info!(nodes = ?config.scylla.nodes, "Connecting to ScyllaDB...");
    let session: Session = SessionBuilder::new()
        .known_nodes(&config.scylla.nodes)
        .build()
        .await?;
    schema::ensure_schema(&session, &config.scylla.keyspace, config.scylla.replication_factor).await?;
    let session = Arc::new(session);

    let store = Arc::new(ScyllaOrderStore::new(session.clone()));
    let outbox: Arc<dyn PendingEventStore> = Arc::new(ScyllaPendingEvents::new(session.clone()));

    // === 3. Redpanda sink (with circuit breaker) ===
    let redpanda = Arc::new(RedpandaClient::new(
        config.redpanda.clone(),
        config.circuit_breaker.breaker(),
        Some(metrics.clone()),
    )?);
    redpanda.ensure_topic().await?;

    // === 4. Publisher and outbox forwarder ===
    let publisher = Arc::new(PartitionedPublisher::spawn(
        redpanda.clone(),
        outbox.clone(),
        PublisherSettings {
            topic: redpanda.topic().to_string(),
            partition_workers: config.publisher.partition_workers,
            retry: config.publisher.retry(),
        },
        Some(metrics.clone()),
    ));

    let forwarder = OutboxForwarder::new(
        outbox.clone(),
        redpanda.clone(),
        redpanda.topic(),
        config.outbox.batch_size,
        config.outbox.poll_interval(),
    )
    .with_metrics(metrics.clone())
    .spawn();

    // === 5. Health monitor ===
    let health = HealthMonitorActor::spawn(
        HealthMonitorActor::new(HEALTH_CHECK_INTERVAL)
            .with_check(Arc::new(CircuitCheck::new(redpanda.circuit_breaker())))
            .with_check(Arc::new(OutboxCheck::new(outbox.clone(), config.outbox.degraded_depth)))
            .with_metrics(metrics.clone()),
    );

    // === 6. Order event consumer ===
    let consumer = if config.consumer.enabled {
        let dispatcher = EventDispatcher::new(Arc::new(LoggingEventHandler), config.consumer.dedup_capacity)
            .with_metrics(metrics.clone());
        let handle = RedpandaConsumer::new(&config.redpanda, &config.consumer)?
            .with_health(health.clone())
            .spawn(Arc::new(dispatcher));
        Some(handle)
    } else {
        tracing::info!("Order event consumer disabled");
        None
    };

    // Metrics server runs on its own actix system in a background thread
    let registry = Arc::new(metrics.registry().clone());
    let metrics_host = config.metrics.host.clone();
    let metrics_port = config.metrics.port;
    let health_ref = health.clone();
    std::thread::spawn(move || {
        let result = actix_web::rt::System::new().block_on(metrics::start_metrics_server(
            registry,
            metrics_host,
            metrics_port,
            Some(health_ref),
        ));
        if let Err(e) = result {
            tracing::error!("Metrics server error: {}", e);
        }
    });

    // === 7. Engine and admission gate ===
    let engine = OrderLifecycleEngine::new(store, publisher)
        .with_policy(config.access.policy())
        .with_publish_timeout(config.publisher.timeout())
        .with_metrics(metrics.clone());
    let gate = TokenBucket::from_config(&config.admission).with_metrics(metrics.clone());

    tracing::info!("✅ Order lifecycle service ready");

    run_demo(&engine, &gate).await?;

    tracing::info!("Service running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    tracing::info!("🛑 Shutting down");
    forwarder.abort();
    if let Some(consumer) = consumer {
        consumer.abort();
    }
    health.stop_gracefully().await.ok();

    Ok(())
}

/// Walk one order through its lifecycle against the live backends
async fn run_demo(engine: &OrderLifecycleEngine, gate: &TokenBucket) -> anyhow::Result<()> {
    let customer = Principal::user("alice");
    let operator = Principal::admin("ops");

    let created = match submit(engine, gate, &customer, OrderCommand::CreateOrder(
        NewOrder::new("Alice", Decimal::new(10000, 2)).with_description("demo order"),
    ))
    .await?
    {
        Some(CommandReply::Committed(committed)) => committed,
        _ => return Ok(()),
    };
    let id = created.order.id;

    submit(engine, gate, &customer, OrderCommand::UpdateOrderStatus {
        id,
        new_status: OrderStatus::Confirmed,
        expected_version: Some(created.order.version),
    })
    .await?;

    // CONFIRMED -> DELIVERED skips the fulfilment steps
    submit(engine, gate, &customer, OrderCommand::UpdateOrderStatus {
        id,
        new_status: OrderStatus::Delivered,
        expected_version: None,
    })
    .await?;

    submit(engine, gate, &operator, OrderCommand::DeleteOrder { id }).await?;

    Ok(())
}

async fn submit(
    engine: &OrderLifecycleEngine,
    gate: &TokenBucket,
    principal: &Principal,
    command: OrderCommand,
) -> anyhow::Result<Option<CommandReply>> {
    let name = command.name();

    if let Admission::Rejected { retry_after } = gate.try_acquire() {
        tracing::warn!(command = name, retry_after_ms = retry_after.as_millis() as u64, "Rate limited");
        return Ok(None);
    }

    match engine.execute(principal, command).await {
        Ok(CommandReply::Committed(committed)) => {
            match committed.warning() {
                Some(warning) => tracing::warn!(
                    command = name,
                    order_id = %committed.order.id,
                    version = committed.order.version,
                    warning = %warning,
                    "Committed with pending delivery"
                ),
                None => tracing::info!(
                    command = name,
                    order_id = %committed.order.id,
                    version = committed.order.version,
                    status = %committed.order.status,
                    "Committed"
                ),
            }
            Ok(Some(CommandReply::Committed(committed)))
        }
        Ok(reply) => Ok(Some(reply)),
        Err(e @ OrderError::Internal { .. }) => Err(e.into()),
        Err(e) => {
            tracing::warn!(command = name, code = e.code(), error = %e, "Command rejected");
            Ok(None)
        }
    }
}
