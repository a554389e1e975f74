//! Shared vocabulary of the write pipeline.
//!
//! This crate holds the types every other crate speaks: batches and records,
//! the write status taxonomy, per-write options, the callback hooks, and the
//! collaborator traits (`MemtableView`, `WalSink`) the pipeline is generic
//! over. It has no concurrency of its own.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod callback;
pub mod error;
pub mod options;
pub mod traits;
pub mod types;

pub use batch::{Record, WriteBatch};
pub use callback::{PostMemtableCallback, PreReleaseCallback, RateLimiter, Tracer, WriteCallback};
pub use error::{WriteError, WriteResult};
pub use options::{RateLimiterPriority, WriteOptions};
pub use traits::{FrameMeta, MemtableView, SyncListener, WalSink};
pub use types::{Key, SequenceNumber, Value, MAX_SEQUENCE};
