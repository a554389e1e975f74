//! Two-counter sequence allocation.
//!
//! `published` is the visibility horizon: reads at snapshot `s` observe every
//! record tagged `<= s` and nothing above. `allocated` is the reservation
//! horizon and may run ahead of `published` in the configurations that
//! reserve ranges before durability (two-queue, unordered, pipelined). The
//! default grouped path never reads `allocated`; it derives each group's
//! range from `published` under the coordination lock, so the two counters
//! stay equal there.

use std::sync::atomic::{AtomicU64, Ordering};

use cascade_core::SequenceNumber;

/// Monotonic sequence pair shared by every write route.
#[derive(Debug)]
pub struct SequenceCounter {
    published: AtomicU64,
    allocated: AtomicU64,
}

impl SequenceCounter {
    /// Start both counters at `initial` (the last sequence already in use;
    /// `0` for an empty store).
    pub fn new(initial: SequenceNumber) -> Self {
        Self {
            published: AtomicU64::new(initial),
            allocated: AtomicU64::new(initial),
        }
    }

    /// Last sequence visible to readers.
    pub fn last_published(&self) -> SequenceNumber {
        self.published.load(Ordering::Acquire)
    }

    /// Last sequence handed out to any writer, published or not.
    pub fn last_allocated(&self) -> SequenceNumber {
        self.allocated.load(Ordering::Acquire)
    }

    /// Reserve `count` sequence slots. Returns the last sequence before the
    /// reservation; the reserved range is `[ret + 1, ret + count]`. A zero
    /// count reserves nothing and just reads the counter.
    pub fn allocate(&self, count: u64) -> SequenceNumber {
        self.allocated.fetch_add(count, Ordering::SeqCst)
    }

    /// Make everything up to `seq` visible. Monotonic: a lower `seq` than
    /// the current horizon is a no-op, so racing publishers cannot move the
    /// horizon backwards. Keeps `allocated >= published`.
    pub fn publish(&self, seq: SequenceNumber) {
        self.allocated.fetch_max(seq, Ordering::SeqCst);
        self.published.fetch_max(seq, Ordering::SeqCst);
    }
}
