//! Prometheus metrics for the collector

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Histogram, IntCounter,
    IntCounterVec,
};
use std::sync::OnceLock;

const BATCH_SIZE_BUCKETS: &[f64] = &[1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0];

static GLOBAL_METRICS: OnceLock<CollectorMetricsInner> = OnceLock::new();

struct CollectorMetricsInner {
    batches: IntCounterVec,
    records: IntCounter,
    batch_size: Histogram,
}

impl CollectorMetricsInner {
    fn new() -> Self {
        Self {
            batches: register_int_counter_vec!(
                "qsw_collector_batches_total",
                "Telemetry batches received, by result",
                &["result"]
            )
            .expect("Failed to register batches_total"),

            records: register_int_counter!(
                "qsw_collector_records_total",
                "Switch records appended to the data file"
            )
            .expect("Failed to register records_total"),

            batch_size: register_histogram!(
                "qsw_collector_batch_size",
                "Records per accepted batch",
                BATCH_SIZE_BUCKETS.to_vec()
            )
            .expect("Failed to register batch_size"),
        }
    }
}

/// Handle to the process-wide collector metrics
#[derive(Clone)]
pub struct CollectorMetrics {
    _private: (),
}

impl Default for CollectorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(CollectorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &CollectorMetricsInner {
        GLOBAL_METRICS.get_or_init(CollectorMetricsInner::new)
    }

    pub fn record_accepted(&self, records: usize) {
        let inner = self.inner();
        inner.batches.with_label_values(&["accepted"]).inc();
        inner.records.inc_by(records as u64);
        inner.batch_size.observe(records as f64);
    }

    pub fn record_rejected(&self) {
        self.inner().batches.with_label_values(&["rejected"]).inc();
    }

    pub fn record_failed(&self) {
        self.inner().batches.with_label_values(&["failed"]).inc();
    }
}
