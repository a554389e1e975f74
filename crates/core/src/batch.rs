//! Write batches: the ordered unit of mutation submitted to the engine.
//!
//! A `WriteBatch` is an ordered sequence of mutation records. The pipeline
//! never splits a batch; it either commits as a whole or fails as a whole.
//! Batches optionally carry per-record protection checksums (crc32 of the
//! record's tag, key, and value) that the WAL appender verifies before the
//! group is made durable.

use crate::types::{Key, Value};
use crate::{WriteError, WriteResult};
use serde::{Deserialize, Serialize};

/// One mutation record inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Record {
    /// Insert or overwrite a key.
    Put {
        /// Key being written.
        key: Key,
        /// Value being written.
        value: Value,
    },
    /// Remove a key (tombstone).
    Delete {
        /// Key being deleted.
        key: Key,
    },
    /// Remove every key in `[from, to)` (range tombstone).
    DeleteRange {
        /// Inclusive start of the range.
        from: Key,
        /// Exclusive end of the range.
        to: Key,
    },
    /// Append a merge operand for a key.
    Merge {
        /// Key being merged into.
        key: Key,
        /// Merge operand.
        value: Value,
    },
}

impl Record {
    /// Approximate in-memory byte size, used for group-budget accounting.
    pub fn byte_size(&self) -> usize {
        match self {
            Record::Put { key, value } | Record::Merge { key, value } => {
                1 + key.len() + value.len()
            }
            Record::Delete { key } => 1 + key.len(),
            Record::DeleteRange { from, to } => 1 + from.len() + to.len(),
        }
    }

    fn protection_checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        match self {
            Record::Put { key, value } => {
                hasher.update(&[0]);
                hasher.update(key.as_bytes());
                hasher.update(value.as_bytes());
            }
            Record::Delete { key } => {
                hasher.update(&[1]);
                hasher.update(key.as_bytes());
            }
            Record::DeleteRange { from, to } => {
                hasher.update(&[2]);
                hasher.update(from.as_bytes());
                hasher.update(to.as_bytes());
            }
            Record::Merge { key, value } => {
                hasher.update(&[3]);
                hasher.update(key.as_bytes());
                hasher.update(value.as_bytes());
            }
        }
        hasher.finalize()
    }
}

/// Ordered sequence of mutation records committed together.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriteBatch {
    records: Vec<Record>,
    /// Per-record crc32 checksums; non-empty only when protection is enabled.
    protection: Vec<u32>,
    /// Bytes of protection per key: 0 (disabled) or 8.
    protection_bytes_per_key: u32,
    /// Caller-declared flag: records require timestamps before they may be
    /// applied to the memtable. WAL-only writes are exempt.
    needs_timestamps: bool,
    byte_size: usize,
}

impl WriteBatch {
    /// Create an empty batch without protection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty batch with per-record protection checksums.
    /// `bytes_per_key` must be 8; any other non-zero width is rejected at
    /// admission time.
    pub fn with_protection(bytes_per_key: u32) -> Self {
        Self {
            protection_bytes_per_key: bytes_per_key,
            ..Self::default()
        }
    }

    /// Append a put record.
    pub fn put(&mut self, key: impl Into<Key>, value: impl Into<Value>) -> &mut Self {
        self.push(Record::Put {
            key: key.into(),
            value: value.into(),
        })
    }

    /// Append a delete record.
    pub fn delete(&mut self, key: impl Into<Key>) -> &mut Self {
        self.push(Record::Delete { key: key.into() })
    }

    /// Append a range-delete record for `[from, to)`.
    pub fn delete_range(&mut self, from: impl Into<Key>, to: impl Into<Key>) -> &mut Self {
        self.push(Record::DeleteRange {
            from: from.into(),
            to: to.into(),
        })
    }

    /// Append a merge record.
    pub fn merge(&mut self, key: impl Into<Key>, value: impl Into<Value>) -> &mut Self {
        self.push(Record::Merge {
            key: key.into(),
            value: value.into(),
        })
    }

    fn push(&mut self, record: Record) -> &mut Self {
        self.byte_size += record.byte_size();
        if self.protection_bytes_per_key != 0 {
            self.protection.push(record.protection_checksum());
        }
        self.records.push(record);
        self
    }

    /// Mark this batch as requiring timestamps before memtable application.
    pub fn set_needs_timestamps(&mut self, needs: bool) -> &mut Self {
        self.needs_timestamps = needs;
        self
    }

    /// Whether records still require timestamps.
    pub fn needs_timestamps(&self) -> bool {
        self.needs_timestamps
    }

    /// Number of records in the batch.
    pub fn count(&self) -> usize {
        self.records.len()
    }

    /// True when the batch has no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Approximate byte size of the batch contents.
    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    /// The records in insertion order.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Protection width configured for this batch (0 or the per-key bytes).
    pub fn protection_bytes_per_key(&self) -> u32 {
        self.protection_bytes_per_key
    }

    /// True when any record is a merge operand.
    pub fn has_merge(&self) -> bool {
        self.records
            .iter()
            .any(|r| matches!(r, Record::Merge { .. }))
    }

    /// True when any record is a range tombstone.
    pub fn has_delete_range(&self) -> bool {
        self.records
            .iter()
            .any(|r| matches!(r, Record::DeleteRange { .. }))
    }

    /// Recompute and compare every record's protection checksum.
    ///
    /// A batch without protection always verifies. Used by the WAL appender
    /// as the consistency precondition before the group becomes durable.
    pub fn verify_protection(&self) -> WriteResult<()> {
        if self.protection_bytes_per_key == 0 {
            return Ok(());
        }
        if self.protection.len() != self.records.len() {
            return Err(WriteError::Corruption(
                "protection checksum count does not match record count".into(),
            ));
        }
        for (idx, (record, expected)) in
            self.records.iter().zip(self.protection.iter()).enumerate()
        {
            if record.protection_checksum() != *expected {
                return Err(WriteError::Corruption(format!(
                    "protection checksum mismatch at record {idx}"
                )));
            }
        }
        Ok(())
    }

    /// Serialize the records into `buf` for WAL framing.
    ///
    /// Layout per record: tag byte, then length-prefixed key (and value for
    /// put/merge, or end key for range deletes). Lengths are u32 LE.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        fn put_slice(buf: &mut Vec<u8>, bytes: &[u8]) {
            buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            buf.extend_from_slice(bytes);
        }
        buf.extend_from_slice(&(self.records.len() as u32).to_le_bytes());
        for record in &self.records {
            match record {
                Record::Put { key, value } => {
                    buf.push(0);
                    put_slice(buf, key.as_bytes());
                    put_slice(buf, value.as_bytes());
                }
                Record::Delete { key } => {
                    buf.push(1);
                    put_slice(buf, key.as_bytes());
                }
                Record::DeleteRange { from, to } => {
                    buf.push(2);
                    put_slice(buf, from.as_bytes());
                    put_slice(buf, to.as_bytes());
                }
                Record::Merge { key, value } => {
                    buf.push(3);
                    put_slice(buf, key.as_bytes());
                    put_slice(buf, value.as_bytes());
                }
            }
        }
    }

    /// Decode every batch concatenated in `buf` (the inverse of repeated
    /// [`WriteBatch::encode_into`] calls). Used when replaying a WAL payload
    /// that carries a whole commit group.
    pub fn decode_all(mut buf: &[u8]) -> WriteResult<Vec<WriteBatch>> {
        fn take<'a>(buf: &mut &'a [u8], len: usize) -> WriteResult<&'a [u8]> {
            if buf.len() < len {
                return Err(WriteError::Corruption("truncated batch encoding".into()));
            }
            let (head, tail) = buf.split_at(len);
            *buf = tail;
            Ok(head)
        }
        fn take_u32(buf: &mut &[u8]) -> WriteResult<u32> {
            let bytes = take(buf, 4)?;
            Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }
        fn take_slice<'a>(buf: &mut &'a [u8]) -> WriteResult<&'a [u8]> {
            let len = take_u32(buf)? as usize;
            take(buf, len)
        }

        let mut batches = Vec::new();
        while !buf.is_empty() {
            let count = take_u32(&mut buf)? as usize;
            let mut batch = WriteBatch::new();
            for _ in 0..count {
                let tag = take(&mut buf, 1)?[0];
                match tag {
                    0 => {
                        let key = take_slice(&mut buf)?.to_vec();
                        let value = take_slice(&mut buf)?.to_vec();
                        batch.put(key, value);
                    }
                    1 => {
                        let key = take_slice(&mut buf)?.to_vec();
                        batch.delete(key);
                    }
                    2 => {
                        let from = take_slice(&mut buf)?.to_vec();
                        let to = take_slice(&mut buf)?.to_vec();
                        batch.delete_range(from, to);
                    }
                    3 => {
                        let key = take_slice(&mut buf)?.to_vec();
                        let value = take_slice(&mut buf)?.to_vec();
                        batch.merge(key, value);
                    }
                    other => {
                        return Err(WriteError::Corruption(format!(
                            "unknown record tag {other}"
                        )));
                    }
                }
            }
            batches.push(batch);
        }
        Ok(batches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Key, Value};

    #[test]
    fn counts_and_flags() {
        let mut batch = WriteBatch::new();
        batch.put("a", "1").delete("b").merge("c", "2");
        assert_eq!(batch.count(), 3);
        assert!(batch.has_merge());
        assert!(!batch.has_delete_range());
        assert!(batch.byte_size() > 0);

        batch.delete_range("a", "z");
        assert!(batch.has_delete_range());
    }

    #[test]
    fn protection_verifies_clean_batch() {
        let mut batch = WriteBatch::with_protection(8);
        batch.put("k1", "v1").delete("k2");
        assert!(batch.verify_protection().is_ok());
        assert_eq!(batch.protection_bytes_per_key(), 8);
    }

    #[test]
    fn protection_detects_tampering() {
        let mut batch = WriteBatch::with_protection(8);
        batch.put("k1", "v1");
        // Corrupt the record behind the checksum's back.
        batch.records[0] = Record::Put {
            key: Key::from("k1"),
            value: Value::from("tampered"),
        };
        assert!(matches!(
            batch.verify_protection(),
            Err(WriteError::Corruption(_))
        ));
    }

    #[test]
    fn unprotected_batch_always_verifies() {
        let mut batch = WriteBatch::new();
        batch.put("k", "v");
        assert!(batch.verify_protection().is_ok());
    }

    #[test]
    fn decode_inverts_encode_for_a_group_payload() {
        let mut first = WriteBatch::new();
        first.put("k", "v").delete("d");
        let mut second = WriteBatch::new();
        second.delete_range("a", "b").merge("m", "1");

        let mut payload = Vec::new();
        first.encode_into(&mut payload);
        second.encode_into(&mut payload);

        let decoded = WriteBatch::decode_all(&payload).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].records(), first.records());
        assert_eq!(decoded[1].records(), second.records());
    }

    #[test]
    fn decode_rejects_truncation_and_junk_tags() {
        let mut batch = WriteBatch::new();
        batch.put("key", "value");
        let mut payload = Vec::new();
        batch.encode_into(&mut payload);

        let truncated = &payload[..payload.len() - 2];
        assert!(matches!(
            WriteBatch::decode_all(truncated),
            Err(WriteError::Corruption(_))
        ));

        let mut junk = payload.clone();
        junk[4] = 9; // record tag
        assert!(matches!(
            WriteBatch::decode_all(&junk),
            Err(WriteError::Corruption(_))
        ));
    }

    #[test]
    fn encode_is_deterministic() {
        let mut batch = WriteBatch::new();
        batch.put("k", "v").delete("d").delete_range("a", "b");
        let mut one = Vec::new();
        let mut two = Vec::new();
        batch.encode_into(&mut one);
        batch.encode_into(&mut two);
        assert_eq!(one, two);
        assert!(!one.is_empty());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // A torn tail is the common WAL failure shape; decoding any
            // strict prefix of one batch's encoding must fail cleanly
            // instead of panicking or producing a partial batch.
            #[test]
            fn every_strict_prefix_of_an_encoding_is_corruption(
                keys in proptest::collection::vec("[a-z]{1,8}", 1..8)
            ) {
                let mut batch = WriteBatch::new();
                for key in &keys {
                    batch.put(key.as_str(), "v");
                }
                let mut payload = Vec::new();
                batch.encode_into(&mut payload);

                for cut in 1..payload.len() {
                    prop_assert!(matches!(
                        WriteBatch::decode_all(&payload[..cut]),
                        Err(WriteError::Corruption(_))
                    ));
                }
            }
        }
    }
}
