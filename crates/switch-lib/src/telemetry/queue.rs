//! Pending queue of completed switch records
//!
//! Records leave the queue oldest-first in batches and come back to the
//! front, in their original order, when an upload fails. The queue can be
//! spilled to a JSON file and restored on the next start.

use crate::models::SwitchRecord;
use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Default)]
pub struct PendingQueue {
    records: VecDeque<SwitchRecord>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: SwitchRecord) {
        self.records.push_back(record);
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = SwitchRecord>) {
        self.records.extend(records);
    }

    /// Remove up to `limit` records from the front
    pub fn take_batch(&mut self, limit: usize) -> Vec<SwitchRecord> {
        let count = limit.min(self.records.len());
        self.records.drain(..count).collect()
    }

    /// Put a batch back at the front, keeping its order
    pub fn restore_front(&mut self, batch: Vec<SwitchRecord>) {
        for record in batch.into_iter().rev() {
            self.records.push_front(record);
        }
    }

    pub fn drain_all(&mut self) -> Vec<SwitchRecord> {
        self.records.drain(..).collect()
    }

    pub fn snapshot(&self) -> Vec<SwitchRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            entries: self.records.len(),
            oldest_timestamp: self.records.front().map(|r| r.timestamp),
            newest_timestamp: self.records.back().map(|r| r.timestamp),
        }
    }
}

/// Queue statistics
#[derive(Debug, Clone, PartialEq)]
pub struct QueueStats {
    pub entries: usize,
    /// Oldest record start (Unix millis)
    pub oldest_timestamp: Option<i64>,
    pub newest_timestamp: Option<i64>,
}

/// Write records to `path` as a JSON array, atomically
pub fn write_spill(path: &Path, records: &[SwitchRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
    }

    let json = serde_json::to_vec(records).context("Failed to serialize switch records")?;

    let temp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)
        .with_context(|| format!("Failed to create temp file {:?}", temp_path))?;

    file.write_all(&json).context("Failed to write spill data")?;
    file.sync_all().context("Failed to sync spill file")?;

    std::fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;

    debug!(path = %path.display(), records = records.len(), "Spill file written");
    Ok(())
}

/// Read a spill file written by [`write_spill`]
pub fn read_spill(path: &Path) -> Result<Vec<SwitchRecord>> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open spill file {:?}", path))?;

    let mut data = Vec::new();
    file.read_to_end(&mut data)
        .context("Failed to read spill file")?;

    serde_json::from_slice(&data).context("Failed to deserialize spill data")
}

/// Read and delete a spill file; `None` when there is nothing to restore
pub fn take_spill(path: &Path) -> Result<Option<Vec<SwitchRecord>>> {
    if !path.exists() {
        return Ok(None);
    }
    let records = read_spill(path)?;
    std::fs::remove_file(path)
        .with_context(|| format!("Failed to remove spill file {:?}", path))?;
    Ok(Some(records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::record;
    use tempfile::TempDir;

    fn ids(records: &[SwitchRecord]) -> Vec<i64> {
        records.iter().map(|r| r.timestamp).collect()
    }

    #[test]
    fn test_take_batch_oldest_first() {
        let mut queue = PendingQueue::new();
        for i in 0..5 {
            queue.push(record(i));
        }

        let batch = queue.take_batch(3);
        assert_eq!(ids(&batch), vec![0, 1, 2]);
        assert_eq!(queue.len(), 2);

        let rest = queue.take_batch(50);
        assert_eq!(ids(&rest), vec![3, 4]);
        assert!(queue.is_empty());
        assert!(queue.take_batch(50).is_empty());
    }

    #[test]
    fn test_restore_front_keeps_order() {
        let mut queue = PendingQueue::new();
        for i in 0..4 {
            queue.push(record(i));
        }

        let batch = queue.take_batch(2);
        queue.push(record(4));
        queue.restore_front(batch);

        assert_eq!(ids(&queue.snapshot()), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_queue_stats() {
        let mut queue = PendingQueue::new();
        assert_eq!(queue.stats().oldest_timestamp, None);

        queue.push(record(10));
        queue.push(record(20));
        let stats = queue.stats();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.oldest_timestamp, Some(10));
        assert_eq!(stats.newest_timestamp, Some(20));
    }

    #[test]
    fn test_spill_round_trip_removes_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("spill").join("telemetry.json");

        write_spill(&path, &[record(1), record(2)]).unwrap();
        assert!(path.exists());

        let restored = take_spill(&path).unwrap().unwrap();
        assert_eq!(ids(&restored), vec![1, 2]);
        assert!(!path.exists());
        assert!(take_spill(&path).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_spill_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("telemetry.json");
        std::fs::write(&path, b"[{").unwrap();
        assert!(read_spill(&path).is_err());
    }
}
