//! Unified error type for Cascade.
//!
//! Wraps the write pipeline's status taxonomy and filesystem errors behind
//! one stable surface; callers match on this, never on internal types.

use cascade_core::WriteError;
use thiserror::Error;

/// All Cascade errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The request was malformed or used an unsupported option combination.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// WAL or filesystem IO failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Data failed a checksum or consistency check.
    #[error("corruption: {0}")]
    Corruption(String),

    /// A caller-supplied write hook failed; the rest of the group committed.
    #[error("callback failed: {0}")]
    Callback(String),

    /// The engine carries an uncleared background error and refuses writes.
    #[error("engine busy: {0}")]
    Busy(String),

    /// The database was already closed.
    #[error("database closed")]
    Closed,
}

impl From<WriteError> for Error {
    fn from(err: WriteError) -> Self {
        match err {
            WriteError::InvalidArgument(m) => Error::InvalidRequest(m),
            WriteError::NotSupported(m) => Error::InvalidRequest(m),
            WriteError::Io(e) => Error::Io(e),
            WriteError::Corruption(m) => Error::Corruption(m),
            WriteError::CallbackFailed(m) => Error::Callback(m),
            WriteError::Busy(m) => Error::Busy(m),
        }
    }
}

/// Result alias for Cascade operations.
pub type Result<T> = std::result::Result<T, Error>;
