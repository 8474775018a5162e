//! Telemetry collector for quality-switch records
//!
//! Accepts batches uploaded by players, appends them to a JSON-lines file
//! for offline training, and serves health and Prometheus endpoints.

pub mod api;
pub mod config;
pub mod health;
pub mod metrics;
pub mod store;

pub use api::{create_router, serve, AppState};
pub use config::CollectorConfig;
pub use store::JsonlStore;
