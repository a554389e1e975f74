//! A formed commit group: the leader plus the followers merged behind it.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use cascade_core::SequenceNumber;

use crate::writer::Writer;

/// Snapshot of one group, fixed at formation. The writer list never changes
/// after the leader cuts it; only the last-sequence slot and the parallel
/// completion counter mutate afterwards.
pub struct WriteGroup {
    writers: Vec<Arc<Writer>>,
    byte_size: usize,
    last_sequence: AtomicU64,
    /// Outstanding parallel appliers; the one that decrements it to zero
    /// finishes the group.
    running: AtomicUsize,
}

impl WriteGroup {
    pub(crate) fn new(leader: Arc<Writer>) -> Self {
        let byte_size = leader.batch.byte_size();
        Self {
            writers: vec![leader],
            byte_size,
            last_sequence: AtomicU64::new(0),
            running: AtomicUsize::new(0),
        }
    }

    pub(crate) fn push(&mut self, writer: Arc<Writer>) {
        self.byte_size += writer.batch.byte_size();
        self.writers.push(writer);
    }

    /// The writer that formed the group.
    pub fn leader(&self) -> &Arc<Writer> {
        &self.writers[0]
    }

    /// All members in join order, leader first.
    pub fn writers(&self) -> &[Arc<Writer>] {
        &self.writers
    }

    /// Number of merged writers.
    pub fn size(&self) -> usize {
        self.writers.len()
    }

    /// Sum of member batch sizes.
    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    /// Final sequence of the group's reserved range.
    pub fn last_sequence(&self) -> SequenceNumber {
        self.last_sequence.load(Ordering::Acquire)
    }

    pub(crate) fn set_last_sequence(&self, seq: SequenceNumber) {
        self.last_sequence.store(seq, Ordering::Release);
    }

    pub(crate) fn start_parallel(&self) {
        self.running.store(self.writers.len(), Ordering::SeqCst);
    }

    /// One parallel applier is done. True for the last one.
    pub(crate) fn finish_one(&self) -> bool {
        self.running.fetch_sub(1, Ordering::AcqRel) == 1
    }
}

impl std::fmt::Debug for WriteGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteGroup")
            .field("size", &self.size())
            .field("byte_size", &self.byte_size)
            .field("last_sequence", &self.last_sequence())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_core::{WriteBatch, WriteOptions};

    fn writer(records: usize) -> Arc<Writer> {
        let mut batch = WriteBatch::new();
        for i in 0..records {
            batch.put(format!("k{i}").into_bytes(), "v");
        }
        Writer::new(batch, WriteOptions::default(), 1, None, None, None)
    }

    #[test]
    fn accumulates_members_and_bytes() {
        let leader = writer(2);
        let leader_bytes = leader.batch.byte_size();
        let mut group = WriteGroup::new(leader);
        let follower = writer(3);
        let follower_bytes = follower.batch.byte_size();
        group.push(follower);

        assert_eq!(group.size(), 2);
        assert_eq!(group.byte_size(), leader_bytes + follower_bytes);
        assert!(Arc::ptr_eq(group.leader(), &group.writers()[0]));
    }

    #[test]
    fn last_parallel_finisher_is_unique() {
        let mut group = WriteGroup::new(writer(1));
        group.push(writer(1));
        group.push(writer(1));
        group.start_parallel();
        assert!(!group.finish_one());
        assert!(!group.finish_one());
        assert!(group.finish_one());
    }
}
