//! Integration tests for the collector API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use qsw_collector::{
    api::{create_router, AppState},
    health::{components, ComponentStatus, HealthRegistry},
    metrics::CollectorMetrics,
    store::JsonlStore,
};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

fn switch_record(timestamp: i64) -> Value {
    json!({
        "sessionId": "1700000000000-k3j9x0a1b",
        "timestamp": timestamp,
        "originalQualityIndex": 2,
        "targetQualityIndex": 3,
        "originalBitrate": 1500000.0,
        "targetBitrate": 2000000.0,
        "originalResolution": 921600.0,
        "targetResolution": 2073600.0,
        "networkSpeed": 5.0,
        "networkBandwidth": 40.0,
        "rtt": 50.0,
        "jitter": 4.0,
        "packetLoss": 0.01,
        "downlinkStdDev": 0.5,
        "networkQuality": 3,
        "bufferedSeconds": 22.0,
        "videoLoadPercentile": 0.4,
        "audioLoadPercentile": 0.5,
        "devicePixelRatio": 2.0,
        "screenWidth": 1440,
        "screenHeight": 900,
        "deviceClass": "desktop",
        "currentTime": 30.0,
        "duration": 300.0,
        "droppedFrames": 10,
        "totalFrames": 1000,
        "avgDecodeTime": 3.5,
        "cvActivityScore": 0.3,
        "switchStartTime": 100.0,
        "switchEndTime": 350.0,
        "timeToPlay": 250.0,
        "bitrateRatio": 1.3333333333333333,
        "estimatedLoadTime": 0.25,
        "success": true,
        "rebuffered": false,
        "rebufferDuration": 0.0,
        "droppedFramesAfter": 0
    })
}

async fn setup_test_app(data_file: &Path) -> (Router, Arc<AppState>) {
    let health_registry = HealthRegistry::new();
    health_registry.register(components::STORAGE).await;

    let state = Arc::new(AppState::new(
        health_registry,
        CollectorMetrics::new(),
        JsonlStore::new(data_file),
    ));
    (create_router(state.clone()), state)
}

fn post_telemetry(body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/telemetry")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn read_lines(path: &Path) -> Vec<Value> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn test_ingest_appends_one_line_per_record() {
    let dir = TempDir::new().unwrap();
    let data_file = dir.path().join("telemetry.jsonl");
    let (app, _state) = setup_test_app(&data_file).await;

    let response = app
        .oneshot(post_telemetry(&json!({
            "user": "alice",
            "batch": [switch_record(1), switch_record(2)],
            "version": "1.0"
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(response).await["accepted"], 2);

    let lines = read_lines(&data_file);
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["user"], "alice");
    assert_eq!(lines[0]["data"]["timestamp"], 1);
    assert_eq!(lines[1]["data"]["timestamp"], 2);
    assert_eq!(lines[1]["data"]["deviceClass"], "desktop");
    assert!(lines[0]["receivedAt"].is_string());
}

#[tokio::test]
async fn test_ingest_rejects_unsupported_version() {
    let dir = TempDir::new().unwrap();
    let data_file = dir.path().join("telemetry.jsonl");
    let (app, _state) = setup_test_app(&data_file).await;

    let response = app
        .oneshot(post_telemetry(&json!({
            "user": "alice",
            "batch": [switch_record(1)],
            "version": "2.0"
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(response).await["error"]
        .as_str()
        .unwrap()
        .contains("2.0"));
    assert!(read_lines(&data_file).is_empty());
}

#[tokio::test]
async fn test_ingest_rejects_empty_batch() {
    let dir = TempDir::new().unwrap();
    let data_file = dir.path().join("telemetry.jsonl");
    let (app, _state) = setup_test_app(&data_file).await;

    let response = app
        .oneshot(post_telemetry(&json!({
            "user": "guest",
            "batch": [],
            "version": "1.0"
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(!data_file.exists());
}

#[tokio::test]
async fn test_ingest_rejects_malformed_record() {
    let dir = TempDir::new().unwrap();
    let data_file = dir.path().join("telemetry.jsonl");
    let (app, _state) = setup_test_app(&data_file).await;

    let response = app
        .oneshot(post_telemetry(&json!({
            "user": "alice",
            "batch": [{ "sessionId": "x" }],
            "version": "1.0"
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(!data_file.exists());
}

#[tokio::test]
async fn test_storage_failure_degrades_health() {
    let dir = TempDir::new().unwrap();
    let data_file = dir.path().join("missing").join("telemetry.jsonl");
    let (app, state) = setup_test_app(&data_file).await;

    let response = app
        .clone()
        .oneshot(post_telemetry(&json!({
            "user": "alice",
            "batch": [switch_record(1)],
            "version": "1.0"
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let response = app.oneshot(get("/healthz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let health = body_json(response).await;
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["components"]["storage"]["status"], "degraded");

    // Recovers once appends succeed again
    std::fs::create_dir_all(data_file.parent().unwrap()).unwrap();
    let app = create_router(state.clone());
    let response = app
        .oneshot(post_telemetry(&json!({
            "user": "alice",
            "batch": [switch_record(1)],
            "version": "1.0"
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(
        state.health_registry.health().await.status,
        ComponentStatus::Healthy
    );
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let dir = TempDir::new().unwrap();
    let (app, state) = setup_test_app(&dir.path().join("telemetry.jsonl")).await;

    state
        .health_registry
        .set_unhealthy(components::STORAGE, "Disk full")
        .await;

    let response = app.oneshot(get("/healthz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_tracks_initialization() {
    let dir = TempDir::new().unwrap();
    let (app, state) = setup_test_app(&dir.path().join("telemetry.jsonl")).await;

    let response = app.clone().oneshot(get("/readyz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["ready"], false);

    state.health_registry.set_ready(true).await;

    let response = app.oneshot(get("/readyz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["ready"], true);
}

#[tokio::test]
async fn test_metrics_endpoint_reports_batches() {
    let dir = TempDir::new().unwrap();
    let (app, state) = setup_test_app(&dir.path().join("telemetry.jsonl")).await;

    state.metrics.record_accepted(3);
    state.metrics.record_rejected();

    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();

    assert!(metrics_text.contains("qsw_collector_batches_total"));
    assert!(metrics_text.contains("qsw_collector_records_total"));
    assert!(metrics_text.contains("qsw_collector_batch_size_bucket"));
}
