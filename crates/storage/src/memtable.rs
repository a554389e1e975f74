//! Concurrent memtable: sharded map of per-key version chains.
//!
//! # Design
//!
//! - `DashMap` with an Fx hasher: sharded writes, lock-free reads
//! - Per-key version chain: `(sequence, value-or-tombstone)` pairs
//! - Range tombstones kept in a side list under an `RwLock`
//!
//! # Thread Safety
//!
//! `insert` may be called concurrently by multiple writers as long as their
//! sequence ranges are disjoint — the group-commit pipeline guarantees that.
//! Version chains are append-only; readers resolve the winning version by
//! sequence, so chain order inside a key does not matter.
//!
//! Visibility is bounded by the snapshot sequence the reader passes in;
//! records above it are invisible even when already inserted. That is what
//! keeps momentary partial application of a write group invisible until the
//! group publishes its final sequence.

use cascade_core::batch::{Record, WriteBatch};
use cascade_core::traits::MemtableView;
use cascade_core::types::{Key, SequenceNumber, Value};
use cascade_core::WriteResult;
use dashmap::DashMap;
use parking_lot::RwLock;
use rustc_hash::FxHasher;
use smallvec::SmallVec;
use std::hash::BuildHasherDefault;
use std::sync::atomic::{AtomicUsize, Ordering};

type FxBuild = BuildHasherDefault<FxHasher>;

/// One version of a key: the sequence that wrote it and the value, or `None`
/// for a point tombstone. Merge operands are stored as plain versions; operand
/// folding belongs to the read path of a full engine and is not done here.
type VersionChain = SmallVec<[(SequenceNumber, Option<Value>); 2]>;

#[derive(Debug, Clone)]
struct RangeTombstone {
    from: Key,
    to: Key,
    sequence: SequenceNumber,
}

/// Concurrent in-memory write buffer.
pub struct Memtable {
    entries: DashMap<Key, VersionChain, FxBuild>,
    range_tombstones: RwLock<Vec<RangeTombstone>>,
    record_count: AtomicUsize,
    approximate_bytes: AtomicUsize,
}

impl Memtable {
    /// Create an empty memtable.
    pub fn new() -> Self {
        Self {
            entries: DashMap::with_hasher(FxBuild::default()),
            range_tombstones: RwLock::new(Vec::new()),
            record_count: AtomicUsize::new(0),
            approximate_bytes: AtomicUsize::new(0),
        }
    }

    /// Number of record versions held (not distinct keys).
    pub fn len(&self) -> usize {
        self.record_count.load(Ordering::Relaxed)
    }

    /// True when nothing has been inserted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Approximate bytes of key/value data held.
    pub fn approximate_bytes(&self) -> usize {
        self.approximate_bytes.load(Ordering::Relaxed)
    }

    /// Resolve `key` as of `snapshot`.
    ///
    /// Returns `None` when the key has no visible version, `Some(None)` when
    /// the winning version is a tombstone, `Some(Some(value))` otherwise.
    /// Last-writer-wins by sequence number.
    pub fn get(&self, key: &Key, snapshot: SequenceNumber) -> Option<Option<Value>> {
        let point = self.entries.get(key).and_then(|chain| {
            chain
                .iter()
                .filter(|(seq, _)| *seq <= snapshot)
                .max_by_key(|(seq, _)| *seq)
                .map(|(seq, value)| (*seq, value.clone()))
        });

        let range = {
            let tombstones = self.range_tombstones.read();
            tombstones
                .iter()
                .filter(|t| t.sequence <= snapshot && t.from <= *key && *key < t.to)
                .map(|t| t.sequence)
                .max()
        };

        match (point, range) {
            (Some((point_seq, _)), Some(range_seq)) if range_seq > point_seq => Some(None),
            (Some((_, value)), _) => Some(value),
            (None, Some(_)) => Some(None),
            (None, None) => None,
        }
    }

    fn push_version(&self, key: Key, sequence: SequenceNumber, value: Option<Value>) {
        self.entries.entry(key).or_default().push((sequence, value));
    }
}

impl Default for Memtable {
    fn default() -> Self {
        Self::new()
    }
}

impl MemtableView for Memtable {
    fn insert(
        &self,
        batch: &WriteBatch,
        base: SequenceNumber,
        seq_per_record: bool,
    ) -> WriteResult<()> {
        for (i, record) in batch.records().iter().enumerate() {
            let sequence = if seq_per_record { base + i as u64 } else { base };
            match record {
                Record::Put { key, value } | Record::Merge { key, value } => {
                    self.push_version(key.clone(), sequence, Some(value.clone()));
                }
                Record::Delete { key } => {
                    self.push_version(key.clone(), sequence, None);
                }
                Record::DeleteRange { from, to } => {
                    self.range_tombstones.write().push(RangeTombstone {
                        from: from.clone(),
                        to: to.clone(),
                        sequence,
                    });
                }
            }
        }
        self.record_count.fetch_add(batch.count(), Ordering::Relaxed);
        self.approximate_bytes
            .fetch_add(batch.byte_size(), Ordering::Relaxed);
        Ok(())
    }

    fn supports_concurrent_insert(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn batch_of(puts: &[(&str, &str)]) -> WriteBatch {
        let mut batch = WriteBatch::new();
        for (k, v) in puts {
            batch.put(*k, *v);
        }
        batch
    }

    #[test]
    fn last_writer_wins_by_sequence() {
        let mem = Memtable::new();
        mem.insert(&batch_of(&[("k", "old")]), 5, true).unwrap();
        mem.insert(&batch_of(&[("k", "new")]), 9, true).unwrap();

        assert_eq!(
            mem.get(&Key::from("k"), 100),
            Some(Some(Value::from("new")))
        );
        // A snapshot below the second write still sees the first.
        assert_eq!(mem.get(&Key::from("k"), 5), Some(Some(Value::from("old"))));
    }

    #[test]
    fn snapshot_bounds_visibility() {
        let mem = Memtable::new();
        mem.insert(&batch_of(&[("k", "v")]), 10, true).unwrap();
        assert_eq!(mem.get(&Key::from("k"), 9), None);
        assert_eq!(mem.get(&Key::from("k"), 10), Some(Some(Value::from("v"))));
    }

    #[test]
    fn tombstone_hides_older_put() {
        let mem = Memtable::new();
        let mut batch = WriteBatch::new();
        batch.put("k", "v").delete("k");
        mem.insert(&batch, 1, true).unwrap();
        assert_eq!(mem.get(&Key::from("k"), 100), Some(None));
    }

    #[test]
    fn range_tombstone_covers_interval() {
        let mem = Memtable::new();
        mem.insert(&batch_of(&[("b", "1"), ("x", "2")]), 1, true)
            .unwrap();
        let mut batch = WriteBatch::new();
        batch.delete_range("a", "m");
        mem.insert(&batch, 10, true).unwrap();

        assert_eq!(mem.get(&Key::from("b"), 100), Some(None));
        assert_eq!(mem.get(&Key::from("x"), 100), Some(Some(Value::from("2"))));
        // Before the range delete, "b" was visible.
        assert_eq!(mem.get(&Key::from("b"), 5), Some(Some(Value::from("1"))));
    }

    #[test]
    fn write_past_range_tombstone_is_visible() {
        let mem = Memtable::new();
        let mut batch = WriteBatch::new();
        batch.delete_range("a", "z");
        mem.insert(&batch, 5, true).unwrap();
        mem.insert(&batch_of(&[("k", "after")]), 9, true).unwrap();

        assert_eq!(
            mem.get(&Key::from("k"), 100),
            Some(Some(Value::from("after")))
        );
    }

    #[test]
    fn shared_sequence_mode_tags_all_records_with_base() {
        let mem = Memtable::new();
        mem.insert(&batch_of(&[("a", "1"), ("b", "2")]), 7, false)
            .unwrap();
        assert_eq!(mem.get(&Key::from("a"), 7), Some(Some(Value::from("1"))));
        assert_eq!(mem.get(&Key::from("b"), 7), Some(Some(Value::from("2"))));
        assert_eq!(mem.get(&Key::from("b"), 6), None);
    }

    #[test]
    fn concurrent_disjoint_inserts() {
        let mem = Arc::new(Memtable::new());
        let mut handles = Vec::new();
        for t in 0..8u64 {
            let mem = Arc::clone(&mem);
            handles.push(std::thread::spawn(move || {
                let mut batch = WriteBatch::new();
                for i in 0..100u64 {
                    batch.put(
                        format!("key-{t}-{i}").into_bytes(),
                        format!("val-{t}-{i}").into_bytes(),
                    );
                }
                // Disjoint ranges, as the pipeline would assign them.
                mem.insert(&batch, 1 + t * 100, true).unwrap();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(mem.len(), 800);
        for t in 0..8u64 {
            for i in (0..100u64).step_by(17) {
                let key = Key::from(format!("key-{t}-{i}").into_bytes());
                assert_eq!(
                    mem.get(&key, 10_000),
                    Some(Some(Value::from(format!("val-{t}-{i}").into_bytes())))
                );
            }
        }
    }
}
