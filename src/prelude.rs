//! Convenience re-exports for the common case.
//!
//! ```no_run
//! use cascadedb::prelude::*;
//! ```

pub use crate::{
    Database, DatabaseBuilder, EngineOptions, Error, Key, Result, SequenceNumber, Value,
    WriteBatch, WriteOptions, WriteRequest,
};
