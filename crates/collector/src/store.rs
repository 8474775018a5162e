//! Append-only JSON-lines storage for received switch records

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use switch_lib::SwitchRecord;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// One line of the data file
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StoredRecord<'a> {
    user: &'a str,
    received_at: DateTime<Utc>,
    data: &'a SwitchRecord,
}

/// Appends each record as its own JSON line
///
/// Writes are serialized so lines from concurrent batches never interleave.
#[derive(Debug)]
pub struct JsonlStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a batch, returning the number of lines written
    pub async fn append(&self, user: &str, records: &[SwitchRecord]) -> Result<usize> {
        let received_at = Utc::now();
        let mut buf = Vec::new();
        for record in records {
            serde_json::to_writer(
                &mut buf,
                &StoredRecord {
                    user,
                    received_at,
                    data: record,
                },
            )
            .context("Failed to encode switch record")?;
            buf.push(b'\n');
        }

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        file.write_all(&buf)
            .await
            .with_context(|| format!("Failed to append to {}", self.path.display()))?;
        file.flush().await?;

        Ok(records.len())
    }
}
