//! Observability infrastructure for the quality-switch engine
//!
//! Provides:
//! - Prometheus metrics (prediction latency and path, model state, switch outcomes, uploads)
//! - Structured JSON logging with tracing

use crate::models::{SwitchPrediction, SwitchRecord};
use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, GaugeVec, Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Histogram buckets for prediction latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.00005, 0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<SwitchMetricsInner> = OnceLock::new();

struct SwitchMetricsInner {
    prediction_latency_seconds: Histogram,
    predictions: IntCounterVec,
    degraded_predictions: IntCounterVec,
    model_loaded: IntGauge,
    model_version_info: GaugeVec,
    model_loads: IntCounterVec,
    switches_started: IntCounter,
    switches_completed: IntCounterVec,
    pending_discarded: IntCounter,
    uploads: IntCounterVec,
    uploaded_records: IntCounter,
    queue_depth: IntGauge,
}

impl SwitchMetricsInner {
    fn new() -> Self {
        Self {
            prediction_latency_seconds: register_histogram!(
                "quality_switch_prediction_latency_seconds",
                "Time spent deciding a single switch candidate",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register prediction_latency_seconds"),

            predictions: register_int_counter_vec!(
                "quality_switch_predictions_total",
                "Predictions served, by decision path",
                &["path"]
            )
            .expect("Failed to register predictions_total"),

            degraded_predictions: register_int_counter_vec!(
                "quality_switch_degraded_predictions_total",
                "Model predictions that fell back to the heuristic",
                &["reason"]
            )
            .expect("Failed to register degraded_predictions_total"),

            model_loaded: register_int_gauge!(
                "quality_switch_model_loaded",
                "Whether a learned model is currently loaded"
            )
            .expect("Failed to register model_loaded"),

            model_version_info: register_gauge_vec!(
                "quality_switch_model_version_info",
                "Information about the currently loaded model",
                &["version"]
            )
            .expect("Failed to register model_version_info"),

            model_loads: register_int_counter_vec!(
                "quality_switch_model_loads_total",
                "Model load attempts",
                &["result"]
            )
            .expect("Failed to register model_loads_total"),

            switches_started: register_int_counter!(
                "quality_switch_switches_started_total",
                "Quality switches started"
            )
            .expect("Failed to register switches_started_total"),

            switches_completed: register_int_counter_vec!(
                "quality_switch_switches_completed_total",
                "Quality switches completed, by outcome",
                &["outcome"]
            )
            .expect("Failed to register switches_completed_total"),

            pending_discarded: register_int_counter!(
                "quality_switch_pending_discarded_total",
                "Pending switches replaced before completion"
            )
            .expect("Failed to register pending_discarded_total"),

            uploads: register_int_counter_vec!(
                "quality_switch_uploads_total",
                "Telemetry upload attempts",
                &["result"]
            )
            .expect("Failed to register uploads_total"),

            uploaded_records: register_int_counter!(
                "quality_switch_uploaded_records_total",
                "Switch records accepted by the collector"
            )
            .expect("Failed to register uploaded_records_total"),

            queue_depth: register_int_gauge!(
                "quality_switch_queue_depth",
                "Completed switch records waiting for upload"
            )
            .expect("Failed to register queue_depth"),
        }
    }
}

/// Metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct SwitchMetrics {
    _private: (),
}

impl Default for SwitchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SwitchMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(SwitchMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &SwitchMetricsInner {
        GLOBAL_METRICS.get_or_init(SwitchMetricsInner::new)
    }

    /// Record one served prediction
    pub fn observe_prediction(&self, used_ml: bool, duration_secs: f64) {
        let path = if used_ml { "ml" } else { "heuristic" };
        self.inner().predictions.with_label_values(&[path]).inc();
        self.inner().prediction_latency_seconds.observe(duration_secs);
    }

    pub fn inc_degraded(&self, reason: &str) {
        self.inner()
            .degraded_predictions
            .with_label_values(&[reason])
            .inc();
    }

    /// Update model state; `None` means heuristic mode
    pub fn set_model_loaded(&self, version: Option<&str>) {
        let inner = self.inner();
        inner.model_version_info.reset();
        match version {
            Some(version) => {
                inner.model_loaded.set(1);
                inner
                    .model_version_info
                    .with_label_values(&[version])
                    .set(1.0);
            }
            None => inner.model_loaded.set(0),
        }
    }

    pub fn inc_model_load(&self, success: bool) {
        let result = if success { "ok" } else { "failed" };
        self.inner().model_loads.with_label_values(&[result]).inc();
    }

    pub fn inc_switches_started(&self) {
        self.inner().switches_started.inc();
    }

    pub fn inc_switches_completed(&self, rebuffered: bool) {
        let outcome = if rebuffered { "rebuffered" } else { "success" };
        self.inner()
            .switches_completed
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn inc_pending_discarded(&self) {
        self.inner().pending_discarded.inc();
    }

    /// Record an upload attempt carrying `records` records
    pub fn observe_upload(&self, success: bool, records: usize) {
        let result = if success { "ok" } else { "failed" };
        self.inner().uploads.with_label_values(&[result]).inc();
        if success {
            self.inner().uploaded_records.inc_by(records as u64);
        }
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.inner().queue_depth.set(depth as i64);
    }
}

/// Structured logger for switch events
///
/// Emits consistent `event = "..."` records for switches, predictions,
/// model loads and uploads.
#[derive(Clone)]
pub struct StructuredLogger {
    component: String,
}

impl StructuredLogger {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    pub fn log_switch_started(
        &self,
        session_id: &str,
        original_quality: i32,
        target_quality: i32,
        target_bitrate: f64,
    ) {
        info!(
            event = "switch_started",
            component = %self.component,
            session_id = %session_id,
            original_quality = original_quality,
            target_quality = target_quality,
            target_bitrate = target_bitrate,
            "Quality switch started"
        );
    }

    /// A new start replaced a switch that never completed
    pub fn log_pending_discarded(&self, session_id: &str, original_quality: i32, target_quality: i32) {
        warn!(
            event = "switch_discarded",
            component = %self.component,
            session_id = %session_id,
            original_quality = original_quality,
            target_quality = target_quality,
            "Discarding incomplete quality switch"
        );
    }

    pub fn log_switch_completed(&self, record: &SwitchRecord) {
        info!(
            event = "switch_completed",
            component = %self.component,
            session_id = %record.session_id,
            original_quality = record.candidate.original_quality_index,
            target_quality = record.candidate.target_quality_index,
            time_to_play_ms = record.time_to_play,
            success = record.success,
            rebuffer_duration = record.rebuffer_duration,
            dropped_frames_after = record.dropped_frames_after,
            "Quality switch completed"
        );
    }

    pub fn log_prediction(
        &self,
        target_quality: i32,
        prediction: &SwitchPrediction,
        model_version: Option<&str>,
    ) {
        debug!(
            event = "prediction_generated",
            component = %self.component,
            target_quality = target_quality,
            should_switch = prediction.should_switch,
            confidence = prediction.confidence,
            expected_switch_time = ?prediction.expected_switch_time,
            used_ml = prediction.used_ml,
            reason = ?prediction.reason,
            model_version = ?model_version,
            "Generated switch prediction"
        );
    }

    pub fn log_model_loaded(
        &self,
        location: &str,
        version: &str,
        success: bool,
        error: Option<&str>,
    ) {
        if success {
            info!(
                event = "model_loaded",
                component = %self.component,
                location = %location,
                model_version = %version,
                "Switch model loaded"
            );
        } else {
            warn!(
                event = "model_load_failed",
                component = %self.component,
                location = %location,
                error = ?error,
                "Switch model unavailable, using heuristic"
            );
        }
    }

    pub fn log_upload(
        &self,
        user: &str,
        records: usize,
        queued: usize,
        error: Option<&str>,
    ) {
        match error {
            None => info!(
                event = "telemetry_uploaded",
                component = %self.component,
                user = %user,
                records = records,
                queued = queued,
                "Uploaded telemetry batch"
            ),
            Some(error) => warn!(
                event = "telemetry_upload_failed",
                component = %self.component,
                user = %user,
                records = records,
                queued = queued,
                error = %error,
                "Telemetry upload failed, batch requeued"
            ),
        }
    }

    pub fn log_spill(&self, path: &str, records: usize, loaded: bool) {
        if loaded {
            info!(
                event = "telemetry_spill_loaded",
                component = %self.component,
                path = %path,
                records = records,
                "Restored spilled telemetry"
            );
        } else {
            warn!(
                event = "telemetry_spilled",
                component = %self.component,
                path = %path,
                records = records,
                "Wrote unsent telemetry to disk"
            );
        }
    }

    pub fn log_startup(&self, version: &str, detail: &str) {
        info!(
            event = "service_started",
            component = %self.component,
            version = %version,
            detail = %detail,
            "Service started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "service_shutdown",
            component = %self.component,
            reason = %reason,
            "Service shutting down"
        );
    }
}
