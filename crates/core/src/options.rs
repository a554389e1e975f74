//! Per-write options and the rate-limiter priority lattice.

/// Priority a write's WAL flush is charged against in the rate limiter.
///
/// Only `Total` and `User` are admitted by the write pipeline; the other
/// levels exist for background IO and are rejected at validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimiterPriority {
    /// Charge against the total budget (default; no user attribution).
    Total,
    /// Charge against the foreground user budget.
    User,
    /// High-priority background IO. Not valid for writes.
    High,
    /// Low-priority background IO. Not valid for writes.
    Low,
}

impl Default for RateLimiterPriority {
    fn default() -> Self {
        RateLimiterPriority::Total
    }
}

/// Options attached to a single write submission.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// fsync the WAL before acknowledging the write.
    pub sync: bool,
    /// Skip the WAL entirely. Incompatible with `sync`.
    pub disable_wal: bool,
    /// WAL-only write: durable but never applied to the memtable.
    pub disable_memtable: bool,
    /// Subject this write to low-priority throttling before admission.
    pub low_priority: bool,
    /// Per-key protection checksum width; 0 (off) or 8.
    pub protection_bytes_per_key: u32,
    /// Priority the WAL flush is charged against.
    pub rate_limiter_priority: RateLimiterPriority,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            sync: false,
            disable_wal: false,
            disable_memtable: false,
            low_priority: false,
            protection_bytes_per_key: 0,
            rate_limiter_priority: RateLimiterPriority::Total,
        }
    }
}

impl WriteOptions {
    /// Options for a durable write: fsync before acknowledging.
    pub fn durable() -> Self {
        Self {
            sync: true,
            ..Self::default()
        }
    }

    /// Options for a WAL-only write (e.g. a transaction prepare record).
    pub fn wal_only() -> Self {
        Self {
            disable_memtable: true,
            ..Self::default()
        }
    }
}
