//! # Cascade
//!
//! Embedded log-structured storage engine built around a concurrent
//! group-commit write pipeline: concurrently submitted writes are merged
//! into leader-coordinated groups, made durable with one WAL append, given a
//! contiguous sequence range, and applied to the memtable serially or in
//! parallel.
//!
//! ## Quick start
//!
//! ```no_run
//! use cascadedb::prelude::*;
//!
//! # fn main() -> cascadedb::Result<()> {
//! let db = Database::open("./my-db")?;
//!
//! db.put("user:1", "alice")?;
//! assert_eq!(db.get(&Key::from("user:1"))?, Some(Value::from("alice")));
//!
//! // Atomic multi-record commit, fsynced before acknowledgement.
//! let mut batch = WriteBatch::new();
//! batch.put("a", "1").delete("old");
//! db.write_with_options(batch, WriteOptions::durable())?;
//!
//! db.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Layers
//!
//! - [`cascade_core`] - batches, options, status taxonomy, collaborator traits
//! - [`cascade_storage`] - the concurrent memtable
//! - [`cascade_durability`] - WAL segments, replay, sync inventory
//! - [`cascade_concurrency`] - the group-commit pipeline itself

#![warn(missing_docs)]

mod database;
mod error;

pub mod prelude;

pub use database::{Database, DatabaseBuilder};
pub use error::{Error, Result};

// Re-export the vocabulary callers need without reaching into sub-crates.
pub use cascade_concurrency::{EngineOptions, WritePipeline, WriteRequest};
pub use cascade_core::{
    Key, PostMemtableCallback, PreReleaseCallback, RateLimiter, RateLimiterPriority,
    SequenceNumber, Tracer, Value, WriteBatch, WriteCallback, WriteOptions,
};
