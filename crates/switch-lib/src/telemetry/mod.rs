//! Switch telemetry for offline training
//!
//! This module provides:
//! - A recorder tracking each switch from start to outcome
//! - A pending queue with in-order requeue and spill-to-disk
//! - JSON-over-HTTP batch upload to the collector
//! - A background worker reacting to player lifecycle events

mod preferences;
mod queue;
mod recorder;
mod sink;
mod worker;


pub use preferences::{
    resolve_user, JsonFilePreferences, MemoryPreferences, PreferenceStore, DEFAULT_USER,
    USER_PREFERENCE_KEY,
};
pub use queue::{read_spill, take_spill, write_spill, PendingQueue, QueueStats};
pub use recorder::{
    FlushReport, RecorderStats, TelemetryConfig, TelemetryRecorder, UploadReport,
    DEFAULT_MAX_BATCH_SIZE, DEFAULT_UPLOAD_INTERVAL,
};
pub use sink::{HttpTelemetrySink, TelemetryPayload, TelemetrySink, UploadError, PAYLOAD_VERSION};
pub use worker::{LifecycleEvent, UploadWorker};
