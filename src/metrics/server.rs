use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use kameo::actor::ActorRef;
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::Arc;

use crate::actors::{GetSystemHealth, HealthMonitorActor, HealthStatus};

struct ServerState {
    registry: Arc<Registry>,
    health: Option<ActorRef<HealthMonitorActor>>,
}

/// Start the metrics and health HTTP server
/// Runs on its own actix system, so call it from a dedicated thread
pub async fn start_metrics_server(
    registry: Arc<Registry>,
    host: String,
    port: u16,
    health: Option<ActorRef<HealthMonitorActor>>,
) -> std::io::Result<()> {
    tracing::info!("📊 Starting metrics server on http://{}:{}/metrics", host, port);

    let state = web::Data::new(ServerState { registry, health });

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .route("/metrics", web::get().to(metrics_handler))
            .route("/health", web::get().to(health_handler))
    })
    .bind((host.as_str(), port))?
    .run()
    .await
}

async fn metrics_handler(state: web::Data<ServerState>) -> impl Responder {
    let encoder = TextEncoder::new();
    let metric_families = state.registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return HttpResponse::InternalServerError().finish();
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(buffer)
}

async fn health_handler(state: web::Data<ServerState>) -> impl Responder {
    let Some(monitor) = &state.health else {
        return HttpResponse::Ok().json(serde_json::json!({
            "status": "healthy",
            "service": "order-lifecycle"
        }));
    };

    match monitor.ask(GetSystemHealth).await {
        Ok(health) => match health.overall_status {
            HealthStatus::Unhealthy(_) => HttpResponse::ServiceUnavailable().json(health.to_json()),
            _ => HttpResponse::Ok().json(health.to_json()),
        },
        Err(e) => {
            tracing::warn!(error = ?e, "Health monitor unreachable");
            HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "status": "unknown",
                "service": "order-lifecycle"
            }))
        }
    }
}
