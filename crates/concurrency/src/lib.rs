//! Concurrent group-commit write pipeline for Cascade.
//!
//! Concurrent writers rendezvous in a FIFO queue; one is elected leader and
//! commits the whole group at once: one WAL append, one contiguous sequence
//! range, one memtable application (serial or fanned out to the members).
//! No internal worker threads exist; caller threads drive everything.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod group;
pub mod pipeline;
pub mod queue;
pub mod sequence;
pub mod writer;

pub use config::EngineOptions;
pub use group::WriteGroup;
pub use pipeline::{PipelineBuilder, WritePipeline, WriteRequest};
pub use queue::{JoinOutcome, WriteQueue};
pub use sequence::SequenceCounter;
pub use writer::{Writer, WriterState};
