//! In-memory write buffer for Cascade.
//!
//! Holds the most recent writes, indexed by key with per-key version chains
//! ordered by sequence number, until a flush moves them to persistent
//! storage (flush itself is a separate subsystem).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod memtable;

pub use memtable::Memtable;
