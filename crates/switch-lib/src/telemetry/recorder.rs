//! Switch telemetry recorder
//!
//! Tracks one quality switch at a time from start to outcome, queues the
//! completed record and uploads queued records in batches.

use super::preferences::{resolve_user, JsonFilePreferences, MemoryPreferences, PreferenceStore};
use super::preferences::USER_PREFERENCE_KEY;
use super::queue::{take_spill, write_spill, PendingQueue, QueueStats};
use super::sink::{HttpTelemetrySink, TelemetryPayload, TelemetrySink};
use crate::models::{CandidateError, SwitchCandidate, SwitchOutcome, SwitchProbe, SwitchRecord};
use crate::observability::{StructuredLogger, SwitchMetrics};
use crate::predictor::{build_feature_vector, estimated_load_time, FeatureVector};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default number of records per upload
pub const DEFAULT_MAX_BATCH_SIZE: usize = 50;

/// Default periodic upload interval
pub const DEFAULT_UPLOAD_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Collector URL batches are POSTed to
    pub endpoint: Option<String>,
    pub max_batch_size: usize,
    /// Periodic upload interval; `None` disables the ticker
    pub upload_interval: Option<Duration>,
    /// Start an upload after every completed switch
    pub upload_on_complete: bool,
    /// File unsent records are written to on unload
    pub spill_path: Option<PathBuf>,
    pub request_timeout: Duration,
    /// JSON preferences file; in-memory preferences when unset
    pub preferences_path: Option<PathBuf>,
    pub preference_key: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            upload_interval: Some(DEFAULT_UPLOAD_INTERVAL),
            upload_on_complete: true,
            spill_path: None,
            request_timeout: Duration::from_secs(10),
            preferences_path: None,
            preference_key: USER_PREFERENCE_KEY.to_string(),
        }
    }
}

/// Result of one upload attempt
#[derive(Debug, Clone, PartialEq)]
pub enum UploadReport {
    /// Queue was empty, nothing was sent
    Empty,
    Sent(usize),
    /// The batch went back to the front of the queue
    Failed { count: usize, error: String },
}

/// Result of draining the queue
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushReport {
    pub sent: usize,
    pub remaining: usize,
    pub spilled: usize,
    pub error: Option<String>,
}

/// Recorder statistics
#[derive(Debug, Clone, PartialEq)]
pub struct RecorderStats {
    pub started: u64,
    pub completed: u64,
    pub discarded_pending: u64,
    pub uploads: u64,
    pub failed_uploads: u64,
    pub uploaded_records: u64,
    pub queue: QueueStats,
    pub pending: bool,
}

/// A switch that has started but not yet completed
#[derive(Debug, Clone)]
struct PendingSwitch {
    candidate: SwitchCandidate,
    session_id: String,
    timestamp: i64,
    start_ms: f64,
}

impl PendingSwitch {
    fn complete(self, outcome: &SwitchOutcome, end_ms: f64) -> SwitchRecord {
        let candidate = self.candidate;
        SwitchRecord {
            session_id: self.session_id,
            timestamp: self.timestamp,
            switch_start_time: self.start_ms,
            switch_end_time: end_ms,
            time_to_play: (end_ms - self.start_ms).max(0.0),
            bitrate_ratio: candidate.bitrate_ratio(),
            estimated_load_time: estimated_load_time(
                candidate.target_bitrate,
                candidate.network.network_speed,
            ),
            success: !outcome.rebuffered,
            rebuffered: outcome.rebuffered,
            rebuffer_duration: outcome.rebuffer_duration.max(0.0),
            dropped_frames_after: outcome.dropped_frames_after,
            candidate,
        }
    }
}

#[derive(Debug)]
enum SwitchSlot {
    Idle,
    Pending(PendingSwitch),
}

#[derive(Debug)]
struct RecorderState {
    slot: SwitchSlot,
    queue: PendingQueue,
}

#[derive(Debug, Default)]
struct RecorderCounters {
    started: AtomicU64,
    completed: AtomicU64,
    discarded: AtomicU64,
    uploads: AtomicU64,
    failed_uploads: AtomicU64,
    uploaded_records: AtomicU64,
}

struct RecorderInner {
    config: TelemetryConfig,
    sink: Arc<dyn TelemetrySink>,
    preferences: Arc<dyn PreferenceStore>,
    epoch: Instant,
    session_id: OnceLock<String>,
    state: Mutex<RecorderState>,
    /// Held for the whole upload so batches leave and return in order
    upload_gate: tokio::sync::Mutex<()>,
    counters: RecorderCounters,
    metrics: SwitchMetrics,
    logger: StructuredLogger,
}

/// Records quality switches and uploads them for training
///
/// Clones share the same queue and pending slot.
#[derive(Clone)]
pub struct TelemetryRecorder {
    inner: Arc<RecorderInner>,
}

impl TelemetryRecorder {
    pub fn new(
        mut config: TelemetryConfig,
        sink: Arc<dyn TelemetrySink>,
        preferences: Arc<dyn PreferenceStore>,
    ) -> Self {
        let logger = StructuredLogger::new("recorder");
        let mut queue = PendingQueue::new();

        if config.max_batch_size == 0 {
            warn!("max_batch_size of 0 would never upload, using 1");
            config.max_batch_size = 1;
        }

        if let Some(path) = &config.spill_path {
            match take_spill(path) {
                Ok(Some(records)) => {
                    logger.log_spill(&path.display().to_string(), records.len(), true);
                    queue.extend(records);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to restore spilled telemetry")
                }
            }
        }

        let metrics = SwitchMetrics::new();
        metrics.set_queue_depth(queue.len());

        Self {
            inner: Arc::new(RecorderInner {
                config,
                sink,
                preferences,
                epoch: Instant::now(),
                session_id: OnceLock::new(),
                state: Mutex::new(RecorderState {
                    slot: SwitchSlot::Idle,
                    queue,
                }),
                upload_gate: tokio::sync::Mutex::new(()),
                counters: RecorderCounters::default(),
                metrics,
                logger,
            }),
        }
    }

    /// Build a recorder posting to the configured endpoint
    pub fn from_config(config: TelemetryConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .context("No telemetry endpoint configured")?;
        let sink = HttpTelemetrySink::new(&endpoint, config.request_timeout)
            .context("Failed to create telemetry sink")?;

        let preferences: Arc<dyn PreferenceStore> = match &config.preferences_path {
            Some(path) => Arc::new(JsonFilePreferences::new(path.clone())),
            None => Arc::new(MemoryPreferences::new()),
        };

        Ok(Self::new(config, Arc::new(sink), preferences))
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.inner.config
    }

    /// Per-recorder session id, generated on first use
    pub fn session_id(&self) -> &str {
        self.inner.session_id.get_or_init(generate_session_id)
    }

    fn now_ms(&self) -> f64 {
        self.inner.epoch.elapsed().as_secs_f64() * 1000.0
    }

    fn state(&self) -> MutexGuard<'_, RecorderState> {
        match self.inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Begin tracking a switch; replaces any switch still pending
    pub fn start_switch(&self, candidate: SwitchCandidate) {
        let session_id = self.session_id().to_string();
        let (original, target, bitrate) = (
            candidate.original_quality_index,
            candidate.target_quality_index,
            candidate.target_bitrate,
        );
        let pending = PendingSwitch {
            candidate,
            session_id: session_id.clone(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            start_ms: self.now_ms(),
        };

        let previous = std::mem::replace(&mut self.state().slot, SwitchSlot::Pending(pending));

        if let SwitchSlot::Pending(previous) = previous {
            self.inner.counters.discarded.fetch_add(1, Ordering::Relaxed);
            self.inner.metrics.inc_pending_discarded();
            self.inner.logger.log_pending_discarded(
                &session_id,
                previous.candidate.original_quality_index,
                previous.candidate.target_quality_index,
            );
        }

        self.inner.counters.started.fetch_add(1, Ordering::Relaxed);
        self.inner.metrics.inc_switches_started();
        self.inner
            .logger
            .log_switch_started(&session_id, original, target, bitrate);
    }

    /// Validate raw probe data and start tracking it
    pub fn start_switch_probe(&self, probe: &SwitchProbe) -> Result<(), CandidateError> {
        self.start_switch(probe.validate()?);
        Ok(())
    }

    /// Finish the pending switch and queue its record.
    ///
    /// Returns `None`, changing nothing, when no switch is pending.
    pub fn complete_switch(&self, outcome: SwitchOutcome) -> Option<SwitchRecord> {
        let end_ms = self.now_ms();

        let (record, queued) = {
            let mut state = self.state();
            match std::mem::replace(&mut state.slot, SwitchSlot::Idle) {
                SwitchSlot::Idle => {
                    drop(state);
                    warn!("complete_switch called with no pending switch");
                    return None;
                }
                SwitchSlot::Pending(pending) => {
                    let record = pending.complete(&outcome, end_ms);
                    state.queue.push(record.clone());
                    (record, state.queue.len())
                }
            }
        };

        self.inner.counters.completed.fetch_add(1, Ordering::Relaxed);
        self.inner.metrics.inc_switches_completed(record.rebuffered);
        self.inner.metrics.set_queue_depth(queued);
        self.inner.logger.log_switch_completed(&record);

        if self.inner.config.upload_on_complete {
            self.spawn_upload();
        }

        Some(record)
    }

    /// Fire-and-forget upload on the current runtime
    fn spawn_upload(&self) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let recorder = self.clone();
                handle.spawn(async move {
                    recorder.upload_telemetry().await;
                });
            }
            Err(_) => debug!("No async runtime, upload deferred to next trigger"),
        }
    }

    pub fn build_feature_vector(&self, candidate: &SwitchCandidate) -> FeatureVector {
        build_feature_vector(candidate)
    }

    /// Send one batch of queued records
    pub async fn upload_telemetry(&self) -> UploadReport {
        let _gate = self.inner.upload_gate.lock().await;

        let batch = self.state().queue.take_batch(self.inner.config.max_batch_size);
        if batch.is_empty() {
            return UploadReport::Empty;
        }

        let count = batch.len();
        let user = resolve_user(
            self.inner.preferences.as_ref(),
            &self.inner.config.preference_key,
        );
        let payload = TelemetryPayload::new(user, batch);

        let result = self.inner.sink.send(&payload).await;
        self.inner.counters.uploads.fetch_add(1, Ordering::Relaxed);

        match result {
            Ok(()) => {
                let queued = self.state().queue.len();
                self.inner
                    .counters
                    .uploaded_records
                    .fetch_add(count as u64, Ordering::Relaxed);
                self.inner.metrics.observe_upload(true, count);
                self.inner.metrics.set_queue_depth(queued);
                self.inner
                    .logger
                    .log_upload(&payload.user, count, queued, None);
                UploadReport::Sent(count)
            }
            Err(e) => {
                let error = e.to_string();
                let TelemetryPayload { user, batch, .. } = payload;
                let queued = {
                    let mut state = self.state();
                    state.queue.restore_front(batch);
                    state.queue.len()
                };
                self.inner
                    .counters
                    .failed_uploads
                    .fetch_add(1, Ordering::Relaxed);
                self.inner.metrics.observe_upload(false, count);
                self.inner.metrics.set_queue_depth(queued);
                self.inner.logger.log_upload(&user, count, queued, Some(&error));
                UploadReport::Failed { count, error }
            }
        }
    }

    /// Upload batches until the queue is empty or an upload fails
    pub async fn flush(&self) -> FlushReport {
        let mut report = FlushReport::default();
        loop {
            match self.upload_telemetry().await {
                UploadReport::Empty => break,
                UploadReport::Sent(n) => report.sent += n,
                UploadReport::Failed { error, .. } => {
                    report.error = Some(error);
                    break;
                }
            }
        }
        report.remaining = self.queue_len();
        report
    }

    /// Final flush before the process goes away.
    ///
    /// Records that could not be sent are moved to the spill file, when one
    /// is configured, and restored by the next recorder using it.
    pub async fn flush_for_unload(&self) -> FlushReport {
        let mut report = self.flush().await;
        if report.error.is_none() {
            return report;
        }
        let Some(path) = self.inner.config.spill_path.clone() else {
            return report;
        };

        let _gate = self.inner.upload_gate.lock().await;
        let records = self.state().queue.drain_all();
        if records.is_empty() {
            return report;
        }

        match write_spill(&path, &records) {
            Ok(()) => {
                self.inner
                    .logger
                    .log_spill(&path.display().to_string(), records.len(), false);
                report.spilled = records.len();
                report.remaining = 0;
                self.inner.metrics.set_queue_depth(0);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to spill telemetry");
                self.state().queue.restore_front(records);
            }
        }
        report
    }

    pub fn queue_len(&self) -> usize {
        self.state().queue.len()
    }

    /// Copy of the queued records, oldest first
    pub fn queued_records(&self) -> Vec<SwitchRecord> {
        self.state().queue.snapshot()
    }

    pub fn has_pending(&self) -> bool {
        matches!(self.state().slot, SwitchSlot::Pending(_))
    }

    pub fn stats(&self) -> RecorderStats {
        let (queue, pending) = {
            let state = self.state();
            (state.queue.stats(), matches!(state.slot, SwitchSlot::Pending(_)))
        };
        let c = &self.inner.counters;
        RecorderStats {
            started: c.started.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            discarded_pending: c.discarded.load(Ordering::Relaxed),
            uploads: c.uploads.load(Ordering::Relaxed),
            failed_uploads: c.failed_uploads.load(Ordering::Relaxed),
            uploaded_records: c.uploaded_records.load(Ordering::Relaxed),
            queue,
            pending,
        }
    }
}

/// `<unix-millis>-<9 base36 chars>`
fn generate_session_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    format!("{}-{}", millis, base36(uuid::Uuid::new_v4().as_u128(), 9))
}

fn base36(mut n: u128, len: usize) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.into_iter().map(char::from).collect()
}
