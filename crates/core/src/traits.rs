//! Collaborator interfaces consumed by the write pipeline.
//!
//! The pipeline is generic over where records land. These traits name the
//! exact capabilities it needs from the memtable and the WAL; the concrete
//! implementations live in `cascade-storage` and `cascade-durability`.

use crate::batch::WriteBatch;
use crate::error::WriteResult;
use crate::types::SequenceNumber;

/// In-memory indexed write buffer holding the most recent writes.
pub trait MemtableView: Send + Sync {
    /// Apply a batch starting at `base`.
    ///
    /// With `seq_per_record` set, record `i` is tagged `base + i` (default
    /// mode: one sequence slot per live record). Otherwise every record is
    /// tagged `base` (sub-batched mode: the range width is the declared
    /// sub-batch count, tracked by the caller).
    fn insert(
        &self,
        batch: &WriteBatch,
        base: SequenceNumber,
        seq_per_record: bool,
    ) -> WriteResult<()>;

    /// Whether multiple writers may call `insert` concurrently on disjoint
    /// sequence ranges.
    fn supports_concurrent_insert(&self) -> bool;

    /// Whether the memtable updates values in place. In-place update rules
    /// out parallel group application.
    fn supports_in_place_update(&self) -> bool {
        false
    }
}

/// Attributes of one appended frame that recovery needs to replay it
/// faithfully. A frame carries a whole merged group, so these are uniform
/// across the group (the coordinator's merge rules guarantee that).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMeta {
    /// First sequence of the frame's reserved range.
    pub base_sequence: SequenceNumber,
    /// Width of the reserved range; `0` when the frame consumed no slots.
    pub seq_count: u64,
    /// Whether the frame's records belong in the memtable. False for
    /// WAL-only prepare frames, which must stay invisible across restarts.
    pub memtable_bound: bool,
    /// Whether record `i` of a batch is tagged `base + i` (default) or all
    /// records share the writer's base (sub-batched sequencing).
    pub seq_per_record: bool,
}

/// Append-only durable log abstraction.
///
/// The pipeline serializes a whole group into one payload and appends it
/// with the frame attributes replay needs. The sink's size is shared state
/// guarded by the pipeline's WAL-write lock in the configurations that need
/// it; the sink itself must tolerate appends from one thread at a time.
pub trait WalSink: Send + Sync {
    /// Append one framed payload described by `meta`. Returns the logical
    /// size after the append.
    fn append(&self, payload: &[u8], meta: FrameMeta) -> std::io::Result<u64>;

    /// Segment number of this log, for inventory bookkeeping.
    fn log_number(&self) -> u64 {
        0
    }

    /// Current logical size in bytes.
    fn file_size(&self) -> u64;

    /// Durably flush everything appended so far.
    fn sync(&self) -> std::io::Result<()>;

    /// Record that the log's contents up to the current size are durable.
    fn mark_synced(&self);

    /// Whether a successful `sync` has covered the current size.
    fn is_synced(&self) -> bool;
}

/// Observer notified after a WAL sync completes, outside the pipeline's
/// coordination lock. Used to persist sync progress best-effort.
pub trait SyncListener: Send + Sync {
    /// Called once per successful sync with the segment number and the size
    /// that is now durable.
    fn wal_synced(&self, log_number: u64, synced_size: u64);
}

/// Blanket adapter so pipelines can take `Arc<dyn MemtableView>` built from
/// any concrete memtable without re-wrapping.
impl<M: MemtableView + ?Sized> MemtableView for std::sync::Arc<M> {
    fn insert(
        &self,
        batch: &WriteBatch,
        base: SequenceNumber,
        seq_per_record: bool,
    ) -> WriteResult<()> {
        (**self).insert(batch, base, seq_per_record)
    }

    fn supports_concurrent_insert(&self) -> bool {
        (**self).supports_concurrent_insert()
    }

    fn supports_in_place_update(&self) -> bool {
        (**self).supports_in_place_update()
    }
}
