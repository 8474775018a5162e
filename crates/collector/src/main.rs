//! qsw-collector - receives quality-switch telemetry from players
//!
//! Appends uploaded switch records to a JSON-lines file for offline
//! training and exposes health and metrics endpoints.

use anyhow::Result;
use qsw_collector::{
    api::{self, AppState},
    config::CollectorConfig,
    health::{components, HealthRegistry},
    metrics::CollectorMetrics,
    store::JsonlStore,
};
use std::sync::Arc;
use switch_lib::observability::StructuredLogger;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const COLLECTOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = CollectorConfig::load()?;
    info!(
        port = config.port,
        data_file = %config.data_file.display(),
        "Collector configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::STORAGE).await;

    let logger = StructuredLogger::new("collector");
    logger.log_startup(
        COLLECTOR_VERSION,
        &format!("data_file={}", config.data_file.display()),
    );

    let state = Arc::new(
        AppState::new(
            health_registry.clone(),
            CollectorMetrics::new(),
            JsonlStore::new(config.data_file.clone()),
        )
        .with_max_body_bytes(config.max_body_bytes),
    );

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let api_handle = tokio::spawn(api::serve(config.port, state, shutdown_rx));

    health_registry.set_ready(true).await;

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    let _ = shutdown_tx.send(());

    match api_handle.await {
        Ok(Err(e)) => error!(error = %e, "API server exited with error"),
        Err(e) => error!(error = %e, "API server task panicked"),
        Ok(Ok(())) => {}
    }

    info!("Collector stopped");
    Ok(())
}
