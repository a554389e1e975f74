//! File-backed write-ahead log.
//!
//! One merged write group becomes one framed record:
//!
//! ```text
//! | payload_len: u32 | crc32: u32 | base_sequence: u64 | seq_count: u64 | flags: u8 | payload |
//! ```
//!
//! The crc covers everything after it: base sequence, sequence count, the
//! flags byte, and the payload. The flags byte records whether the frame is
//! memtable-bound and whether its records are tagged per-record; replay
//! needs both to reconstruct the memtable the live pipeline built. The
//! logical size is tracked in an atomic so the pipeline can read it without
//! taking the writer lock; the "synced" marker flips false on every append
//! and true again via `mark_synced` after a successful fsync.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use cascade_core::traits::{FrameMeta, WalSink};
use cascade_core::{WriteError, WriteResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Frame header bytes: payload_len + crc + base_sequence + seq_count + flags.
const FRAME_HEADER: u64 = 4 + 4 + 8 + 8 + 1;

/// Upper bound on one frame's payload. A merged group is budget-capped far
/// below this; anything larger in a length header is a damaged file, and
/// the reader must not allocate from it.
const MAX_PAYLOAD_BYTES: u64 = 1 << 30;

const FLAG_MEMTABLE_BOUND: u8 = 1;
const FLAG_SEQ_PER_RECORD: u8 = 1 << 1;

fn flags_byte(meta: &FrameMeta) -> u8 {
    let mut flags = 0;
    if meta.memtable_bound {
        flags |= FLAG_MEMTABLE_BOUND;
    }
    if meta.seq_per_record {
        flags |= FLAG_SEQ_PER_RECORD;
    }
    flags
}

fn frame_crc(meta: &FrameMeta, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&meta.base_sequence.to_le_bytes());
    hasher.update(&meta.seq_count.to_le_bytes());
    hasher.update(&[flags_byte(meta)]);
    hasher.update(payload);
    hasher.finalize()
}

/// Append-only log file.
pub struct Wal {
    writer: Mutex<BufWriter<File>>,
    size: AtomicU64,
    synced: AtomicBool,
    number: u64,
    path: PathBuf,
}

impl Wal {
    /// Create or open the WAL segment `number` at `path`, appending to any
    /// existing content.
    pub fn open(path: impl AsRef<Path>, number: u64) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            size: AtomicU64::new(size),
            synced: AtomicBool::new(true),
            number,
            path,
        })
    }

    /// Segment number of this log.
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl WalSink for Wal {
    fn append(&self, payload: &[u8], meta: FrameMeta) -> std::io::Result<u64> {
        if payload.len() as u64 > MAX_PAYLOAD_BYTES {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "WAL payload exceeds the frame size limit",
            ));
        }
        let mut writer = self.writer.lock();
        writer.write_u32::<LittleEndian>(payload.len() as u32)?;
        writer.write_u32::<LittleEndian>(frame_crc(&meta, payload))?;
        writer.write_u64::<LittleEndian>(meta.base_sequence)?;
        writer.write_u64::<LittleEndian>(meta.seq_count)?;
        writer.write_all(&[flags_byte(&meta)])?;
        writer.write_all(payload)?;
        writer.flush()?;
        self.synced.store(false, Ordering::Release);
        let new_size = self
            .size
            .fetch_add(FRAME_HEADER + payload.len() as u64, Ordering::AcqRel)
            + FRAME_HEADER
            + payload.len() as u64;
        Ok(new_size)
    }

    fn log_number(&self) -> u64 {
        self.number
    }

    fn file_size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    fn sync(&self) -> std::io::Result<()> {
        let mut writer = self.writer.lock();
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    fn mark_synced(&self) {
        self.synced.store(true, Ordering::Release);
    }

    fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }
}

/// One decoded WAL frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    /// Frame attributes as written: base sequence, range width, and the
    /// replay flags.
    pub meta: FrameMeta,
    /// Serialized group payload.
    pub payload: Vec<u8>,
}

/// Sequential reader over a WAL segment, used for replay and verification.
pub struct WalReader {
    reader: BufReader<File>,
}

impl WalReader {
    /// Open a segment for reading from the start.
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self {
            reader: BufReader::new(File::open(path)?),
        })
    }

    /// Read every complete frame, verifying checksums.
    ///
    /// A clean end-of-file terminates the scan; a checksum mismatch or an
    /// implausible length header is `Corruption`.
    pub fn read_all(&mut self) -> WriteResult<Vec<WalRecord>> {
        let mut records = Vec::new();
        loop {
            let payload_len = match self.reader.read_u32::<LittleEndian>() {
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            };
            if payload_len as u64 > MAX_PAYLOAD_BYTES {
                return Err(WriteError::Corruption(format!(
                    "WAL frame declares an implausible payload length of {payload_len} bytes"
                )));
            }
            let crc = self.reader.read_u32::<LittleEndian>()?;
            let base_sequence = self.reader.read_u64::<LittleEndian>()?;
            let seq_count = self.reader.read_u64::<LittleEndian>()?;
            let mut flags = [0u8; 1];
            self.reader.read_exact(&mut flags)?;
            let meta = FrameMeta {
                base_sequence,
                seq_count,
                memtable_bound: flags[0] & FLAG_MEMTABLE_BOUND != 0,
                seq_per_record: flags[0] & FLAG_SEQ_PER_RECORD != 0,
            };
            let mut payload = vec![0u8; payload_len as usize];
            self.reader.read_exact(&mut payload)?;
            if frame_crc(&meta, &payload) != crc {
                return Err(WriteError::Corruption(format!(
                    "WAL frame checksum mismatch at base sequence {base_sequence}"
                )));
            }
            records.push(WalRecord { meta, payload });
        }
        Ok(records)
    }
}
