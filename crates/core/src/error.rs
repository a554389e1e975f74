//! Write status taxonomy.
//!
//! Four failure families with distinct blast radii:
//!
//! - validation errors (`InvalidArgument`, `NotSupported`) — caller mistakes
//!   detected before any group forms; no side effects, safe to repeat;
//! - durability errors (`Io`) — WAL write/sync failures; fatal to the whole
//!   group, the engine stays usable;
//! - apply errors surfaced as `Io`/`Corruption` after WAL success — escalated
//!   to a background error because readers may observe a partially applied
//!   group; further writes fail `Busy` until the error is cleared;
//! - callback errors (`CallbackFailed`) — isolated to the originating writer.

use thiserror::Error;

/// Outcome of a write, or of one of its stages.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The request was malformed; rejected before group formation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested option combination is not supported.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// WAL append, sync, or memtable IO failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Data failed a checksum/consistency check.
    #[error("corruption: {0}")]
    Corruption(String),

    /// A caller-supplied callback failed; only this writer is affected.
    #[error("callback failed: {0}")]
    CallbackFailed(String),

    /// The engine carries an uncleared background error and refuses writes.
    #[error("engine busy: {0}")]
    Busy(String),
}

impl WriteError {
    /// True for pre-group validation rejections (no side effects occurred).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            WriteError::InvalidArgument(_) | WriteError::NotSupported(_)
        )
    }

    /// True when the failure is isolated to a single writer.
    pub fn is_callback(&self) -> bool {
        matches!(self, WriteError::CallbackFailed(_))
    }
}

impl Clone for WriteError {
    fn clone(&self) -> Self {
        match self {
            WriteError::InvalidArgument(m) => WriteError::InvalidArgument(m.clone()),
            WriteError::NotSupported(m) => WriteError::NotSupported(m.clone()),
            // io::Error is not Clone; preserve kind and rendered message.
            WriteError::Io(e) => {
                WriteError::Io(std::io::Error::new(e.kind(), e.to_string()))
            }
            WriteError::Corruption(m) => WriteError::Corruption(m.clone()),
            WriteError::CallbackFailed(m) => WriteError::CallbackFailed(m.clone()),
            WriteError::Busy(m) => WriteError::Busy(m.clone()),
        }
    }
}

/// Result alias for write-path operations.
pub type WriteResult<T> = std::result::Result<T, WriteError>;
