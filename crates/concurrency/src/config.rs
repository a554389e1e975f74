//! Engine-level pipeline configuration.

/// Fixed-at-construction switches that select the write strategy and the
/// capabilities writes may rely on. Per-write knobs live in
/// [`cascade_core::WriteOptions`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Let group members apply their own batches to the memtable
    /// concurrently when the memtable supports it.
    pub allow_concurrent_memtable_write: bool,
    /// Overlap one group's WAL write with the previous group's memtable
    /// application.
    pub enable_pipelined_write: bool,
    /// Route WAL-only writes through a second queue so prepare records do
    /// not contend with the main commit path.
    pub two_write_queues: bool,
    /// Reserve sequences eagerly and apply to the memtable out of band;
    /// visibility order is no longer submission order.
    pub unordered_write: bool,
    /// Consume one sequence slot per declared sub-batch instead of per
    /// record.
    pub seq_per_batch: bool,
    /// WAL flushes are driven externally; appends share the WAL-write lock.
    pub manual_wal_flush: bool,
    /// Old WAL segments are recycled; constrains WAL-less writes.
    pub recycle_wal_files: bool,
    /// A row cache is layered over the store; range deletions cannot be
    /// invalidated in it.
    pub row_cache: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            allow_concurrent_memtable_write: true,
            enable_pipelined_write: false,
            two_write_queues: false,
            unordered_write: false,
            seq_per_batch: false,
            manual_wal_flush: false,
            recycle_wal_files: false,
            row_cache: false,
        }
    }
}

impl EngineOptions {
    /// Preset for the pipelined strategy.
    pub fn pipelined() -> Self {
        Self {
            enable_pipelined_write: true,
            ..Self::default()
        }
    }

    /// Preset for the unordered strategy.
    pub fn unordered() -> Self {
        Self {
            unordered_write: true,
            ..Self::default()
        }
    }
}
