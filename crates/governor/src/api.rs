//! HTTP API: health, readiness, Prometheus metrics and governor queries

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use governor_lib::{health::ComponentStatus, Orchestrator};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};

const DEFAULT_EVENT_LIMIT: usize = 50;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

/// 200 while operational (healthy or degraded), 503 otherwise
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.orchestrator.health().health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.orchestrator.health().readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.orchestrator.get_status().await)
}

async fn current_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.orchestrator.get_metrics().await)
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    limit: Option<usize>,
}

async fn events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_EVENT_LIMIT);
    Json(state.orchestrator.get_recent_events(limit).await)
}

async fn queue(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.orchestrator.get_queue_status().await)
}

async fn storage(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.orchestrator.get_storage_metrics().await)
}

async fn write_statistics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.orchestrator.get_write_statistics().await)
}

async fn optimize(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.orchestrator.trigger_optimization().await)
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/status", get(status))
        .route("/api/v1/metrics", get(current_metrics))
        .route("/api/v1/events", get(events))
        .route("/api/v1/queue", get(queue))
        .route("/api/v1/storage", get(storage))
        .route("/api/v1/storage/writes", get(write_statistics))
        .route("/api/v1/optimize", post(optimize))
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
