//! Persisted inventory of synced WAL segments.
//!
//! After a requested sync succeeds, the pipeline records the segment number
//! and the size that is known durable. The update is best effort and happens
//! outside the group-coordination critical section; a failure here is logged
//! and never fails the write that triggered it.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One synced-segment entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentRecord {
    /// WAL segment number.
    pub number: u64,
    /// Logical size known to be durable.
    pub synced_size: u64,
}

/// Best-effort persisted manifest of synced WAL segments.
pub struct WalInventory {
    path: PathBuf,
    records: Mutex<Vec<SegmentRecord>>,
}

impl WalInventory {
    /// Open the inventory at `path`, loading existing entries when present.
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = match std::fs::read(&path) {
            Ok(bytes) => bincode::deserialize(&bytes).unwrap_or_else(|e| {
                tracing::warn!(error = %e, path = %path.display(), "unreadable WAL inventory, starting fresh");
                Vec::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e),
        };
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    /// Record that `number` is durable up to `synced_size` and persist.
    pub fn record_synced(&self, number: u64, synced_size: u64) -> std::io::Result<()> {
        let mut records = self.records.lock();
        match records.iter_mut().find(|r| r.number == number) {
            Some(existing) => existing.synced_size = existing.synced_size.max(synced_size),
            None => records.push(SegmentRecord {
                number,
                synced_size,
            }),
        }
        let bytes = bincode::serialize(&*records)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&self.path, bytes)
    }

    /// Snapshot of the current entries.
    pub fn segments(&self) -> Vec<SegmentRecord> {
        self.records.lock().clone()
    }
}
