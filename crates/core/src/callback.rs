//! Caller-supplied hooks invoked at fixed points of the write pipeline.
//!
//! All hooks are optional capabilities attached to a writer and dispatched
//! through one uniform point per stage, never through scattered null checks.
//! Implementations must be `Send + Sync`: the thread that runs a hook is the
//! group leader (or the last parallel writer), not necessarily the
//! submitting thread.

use crate::batch::WriteBatch;
use crate::error::WriteResult;
use crate::options::RateLimiterPriority;
use crate::types::SequenceNumber;

/// Validation hook, checked once per writer after the group forms and before
/// any sequence is consumed by the writer.
///
/// A failing writer is excluded from WAL content and memtable application;
/// its siblings commit normally.
pub trait WriteCallback: Send + Sync {
    /// Validate the write against current engine state.
    fn validate(&self) -> WriteResult<()>;

    /// Whether this writer may be merged into a group led by another writer.
    /// Returning `false` forces the writer to lead its own group.
    fn allow_write_batching(&self) -> bool {
        true
    }
}

/// Hook invoked per non-failed writer, in group order, after WAL durability
/// and before sequence publication / memtable application.
///
/// Used for actions that must happen exactly once after durability but
/// before visibility, such as recording an external commit marker.
pub trait PreReleaseCallback: Send + Sync {
    /// `sequence` is the writer's assigned range start; `index`/`total`
    /// locate this callback among the group's pre-release callbacks.
    fn on_pre_release(
        &self,
        sequence: SequenceNumber,
        disable_memtable: bool,
        index: usize,
        total: usize,
    ) -> WriteResult<()>;
}

/// Hook invoked per non-failed writer, in group order, after memtable
/// application and before group exit. Requires visibility.
pub trait PostMemtableCallback: Send + Sync {
    /// `last_sequence` is the group's final sequence number.
    fn on_post_memtable(
        &self,
        last_sequence: SequenceNumber,
        disable_memtable: bool,
    ) -> WriteResult<()>;
}

/// Optional write tracer.
///
/// Invoked exactly once per admitted writer: at admission when write order
/// need not be preserved, otherwise deferred until the group is formed and
/// replayed in group order. Either way the call happens under a dedicated
/// trace lock.
pub trait Tracer: Send + Sync {
    /// Record one batch.
    fn trace_write(&self, batch: &WriteBatch);

    /// Whether traced batches must appear in commit order.
    fn preserves_write_order(&self) -> bool {
        false
    }
}

/// Optional throttle consulted for low-priority writes before admission.
pub trait RateLimiter: Send + Sync {
    /// Charge `bytes` against `priority`, blocking until admitted.
    fn throttle(&self, bytes: usize, priority: RateLimiterPriority);
}
