//! HTTP API: telemetry ingest, health checks and Prometheus metrics

use crate::health::{components, ComponentStatus, HealthRegistry};
use crate::metrics::CollectorMetrics;
use crate::store::JsonlStore;
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::sync::Arc;
use switch_lib::telemetry::{TelemetryPayload, PAYLOAD_VERSION};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Shared application state
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: CollectorMetrics,
    pub store: JsonlStore,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, metrics: CollectorMetrics, store: JsonlStore) -> Self {
        Self {
            health_registry,
            metrics,
            store,
            max_body_bytes: 4 * 1024 * 1024,
        }
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }
}

fn reject(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// Accept one batch of switch records
async fn ingest(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<TelemetryPayload>, JsonRejection>,
) -> Response {
    let payload = match payload {
        Ok(Json(payload)) => payload,
        Err(rejection) => {
            state.metrics.record_rejected();
            warn!(error = %rejection.body_text(), "Rejected malformed telemetry batch");
            return reject(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };

    if payload.version != PAYLOAD_VERSION {
        state.metrics.record_rejected();
        warn!(
            user = %payload.user,
            version = %payload.version,
            "Rejected telemetry batch with unsupported version"
        );
        return reject(
            StatusCode::BAD_REQUEST,
            format!("unsupported payload version {}", payload.version),
        );
    }

    if payload.batch.is_empty() {
        state.metrics.record_rejected();
        return reject(StatusCode::BAD_REQUEST, "empty batch");
    }

    match state.store.append(&payload.user, &payload.batch).await {
        Ok(accepted) => {
            state.metrics.record_accepted(accepted);
            if state.health_registry.status_of(components::STORAGE).await
                != Some(ComponentStatus::Healthy)
            {
                state.health_registry.set_healthy(components::STORAGE).await;
            }
            info!(user = %payload.user, records = accepted, "Accepted telemetry batch");
            (StatusCode::ACCEPTED, Json(json!({ "accepted": accepted }))).into_response()
        }
        Err(e) => {
            state.metrics.record_failed();
            state
                .health_registry
                .set_degraded(components::STORAGE, format!("{e:#}"))
                .await;
            error!(
                user = %payload.user,
                records = payload.batch.len(),
                error = %format!("{e:#}"),
                "Failed to store telemetry batch"
            );
            reject(StatusCode::INTERNAL_SERVER_ERROR, "failed to store batch")
        }
    }
}

/// 200 while healthy or degraded, 503 once a component is unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let body_limit = state.max_body_bytes;
    Router::new()
        .route("/api/telemetry", post(ingest))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Serve until a shutdown signal is broadcast
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting collector API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}
