//! Background upload triggers
//!
//! Drives [`TelemetryRecorder`] uploads from player lifecycle events and a
//! periodic ticker until shutdown or unload.

use super::recorder::TelemetryRecorder;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

/// Player lifecycle notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    VisibilityHidden,
    VisibilityVisible,
    /// The player is going away; flush and stop
    Unload,
}

pub struct UploadWorker {
    recorder: TelemetryRecorder,
    interval: Option<Duration>,
    events: mpsc::Receiver<LifecycleEvent>,
}

impl UploadWorker {
    /// Create a worker using the recorder's configured interval
    pub fn new(recorder: TelemetryRecorder) -> (Self, mpsc::Sender<LifecycleEvent>) {
        let interval = recorder.config().upload_interval;
        Self::with_interval(recorder, interval)
    }

    pub fn with_interval(
        recorder: TelemetryRecorder,
        interval: Option<Duration>,
    ) -> (Self, mpsc::Sender<LifecycleEvent>) {
        let (tx, rx) = mpsc::channel(32);
        let worker = Self {
            recorder,
            interval: interval.filter(|d| !d.is_zero()),
            events: rx,
        };
        (worker, tx)
    }

    /// Run until shutdown or an unload event
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = ?self.interval.map(|d| d.as_secs()),
            "Starting telemetry upload worker"
        );

        let mut ticker = self.interval.map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        let mut events_open = true;

        loop {
            tokio::select! {
                _ = next_tick(&mut ticker) => {
                    if self.recorder.queue_len() > 0 {
                        debug!("Periodic telemetry upload");
                        self.recorder.upload_telemetry().await;
                    }
                }
                event = self.events.recv(), if events_open => match event {
                    Some(LifecycleEvent::VisibilityHidden) => {
                        debug!("Player hidden, uploading telemetry");
                        self.recorder.upload_telemetry().await;
                    }
                    Some(LifecycleEvent::VisibilityVisible) => {}
                    Some(LifecycleEvent::Unload) => {
                        let report = self.recorder.flush_for_unload().await;
                        info!(
                            sent = report.sent,
                            spilled = report.spilled,
                            remaining = report.remaining,
                            "Player unloading, telemetry worker stopped"
                        );
                        break;
                    }
                    None => {
                        debug!("Lifecycle channel closed");
                        events_open = false;
                    }
                },
                _ = shutdown.recv() => {
                    let report = self.recorder.flush_for_unload().await;
                    info!(
                        sent = report.sent,
                        spilled = report.spilled,
                        remaining = report.remaining,
                        "Shutting down telemetry upload worker"
                    );
                    break;
                }
            }
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
