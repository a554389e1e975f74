//! Byte-oriented key/value types and the global sequence number.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Monotonically increasing integer establishing global write order and
/// read-snapshot visibility. `0` means "no writes yet".
pub type SequenceNumber = u64;

/// Sentinel for "no sequence assigned". Never handed out to a writer.
pub const MAX_SEQUENCE: SequenceNumber = u64::MAX;

/// Variable-length key bytes.
#[derive(Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Key(Vec<u8>);

impl Key {
    /// Create a key from owned bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    /// Borrow the key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Byte length of the key.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the key has no bytes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", String::from_utf8_lossy(&self.0))
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<&[u8]> for Key {
    fn from(b: &[u8]) -> Self {
        Self(b.to_vec())
    }
}

impl From<Vec<u8>> for Key {
    fn from(b: Vec<u8>) -> Self {
        Self(b)
    }
}

/// Variable-length value bytes.
#[derive(Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Value(Vec<u8>);

impl Value {
    /// Create a value from owned bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    /// Borrow the value bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Byte length of the value.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the value has no bytes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value({})", String::from_utf8_lossy(&self.0))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Self(b.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Self(b)
    }
}
