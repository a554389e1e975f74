//! In-memory WAL sink with fault injection.
//!
//! Behaves like [`crate::Wal`] minus the filesystem, and can be told to fail
//! appends or syncs. Used by pipeline tests to exercise durability-failure
//! paths deterministically.

use cascade_core::traits::{FrameMeta, WalSink};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// In-memory append-only log.
#[derive(Default)]
pub struct MemWal {
    records: Mutex<Vec<(FrameMeta, Vec<u8>)>>,
    size: AtomicU64,
    synced: AtomicBool,
    sync_count: AtomicUsize,
    fail_appends: AtomicBool,
    fail_syncs: AtomicBool,
}

impl MemWal {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self {
            synced: AtomicBool::new(true),
            ..Self::default()
        }
    }

    /// Make every subsequent append fail with `PermissionDenied`.
    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent sync fail with `PermissionDenied`.
    pub fn fail_syncs(&self, fail: bool) {
        self.fail_syncs.store(fail, Ordering::SeqCst);
    }

    /// Appended frames in order, with the metadata they were tagged with.
    pub fn records(&self) -> Vec<(FrameMeta, Vec<u8>)> {
        self.records.lock().clone()
    }

    /// Number of appended records.
    pub fn record_count(&self) -> usize {
        self.records.lock().len()
    }

    /// Number of successful syncs.
    pub fn sync_count(&self) -> usize {
        self.sync_count.load(Ordering::SeqCst)
    }
}

impl WalSink for MemWal {
    fn append(&self, payload: &[u8], meta: FrameMeta) -> std::io::Result<u64> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "injected append failure",
            ));
        }
        self.records.lock().push((meta, payload.to_vec()));
        self.synced.store(false, Ordering::Release);
        let new_size = self
            .size
            .fetch_add(payload.len() as u64, Ordering::AcqRel)
            + payload.len() as u64;
        Ok(new_size)
    }

    fn file_size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    fn sync(&self) -> std::io::Result<()> {
        if self.fail_syncs.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "injected sync failure",
            ));
        }
        self.sync_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn mark_synced(&self) {
        self.synced.store(true, Ordering::Release);
    }

    fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(base: u64) -> FrameMeta {
        FrameMeta {
            base_sequence: base,
            seq_count: 1,
            memtable_bound: true,
            seq_per_record: true,
        }
    }

    #[test]
    fn appends_accumulate() {
        let wal = MemWal::new();
        wal.append(b"a", meta(1)).unwrap();
        wal.append(b"bc", meta(2)).unwrap();
        assert_eq!(wal.file_size(), 3);
        assert_eq!(
            wal.records(),
            vec![(meta(1), b"a".to_vec()), (meta(2), b"bc".to_vec())]
        );
    }

    #[test]
    fn injected_failures() {
        let wal = MemWal::new();
        wal.fail_appends(true);
        assert!(wal.append(b"x", meta(1)).is_err());
        assert_eq!(wal.record_count(), 0);

        wal.fail_appends(false);
        wal.append(b"x", meta(1)).unwrap();
        wal.fail_syncs(true);
        assert!(wal.sync().is_err());
        assert_eq!(wal.sync_count(), 0);
    }
}
