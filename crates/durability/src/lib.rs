//! Durability layer for Cascade.
//!
//! Provides the append-only write-ahead log the group-commit pipeline
//! appends merged groups to, a reader for replay/verification, the
//! best-effort persisted inventory of synced segments, and an in-memory
//! fault-injecting sink for tests.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod inventory;
pub mod mem;
pub mod wal;

pub use inventory::WalInventory;
pub use mem::MemWal;
pub use wal::{Wal, WalReader, WalRecord};
