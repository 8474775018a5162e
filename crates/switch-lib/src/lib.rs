//! Quality-switch decision engine
//!
//! This crate provides the core functionality for:
//! - Deciding whether a video player should switch renditions
//! - Ranking candidate renditions with a learned model or a heuristic
//! - Recording switch outcomes and uploading them for training
//! - Configuration and observability

pub mod config;
pub mod models;
pub mod observability;
pub mod predictor;
pub mod telemetry;

pub use config::QswConfig;
pub use models::*;
pub use observability::{StructuredLogger, SwitchMetrics};
pub use predictor::{
    build_feature_vector, FeatureVector, ModelOutcome, PredictorConfig, SwitchPredictor,
};
pub use telemetry::{LifecycleEvent, TelemetryConfig, TelemetryRecorder, UploadWorker};
