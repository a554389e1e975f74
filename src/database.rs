//! Database handle: wires the memtable, WAL, and write pipeline together.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use cascade_concurrency::{EngineOptions, WritePipeline, WriteRequest};
use cascade_core::{
    Key, MemtableView, SequenceNumber, SyncListener, Value, WalSink, WriteBatch, WriteOptions,
};
use cascade_durability::{MemWal, Wal, WalInventory, WalReader};
use cascade_storage::Memtable;

use crate::error::{Error, Result};

const WAL_FILE: &str = "000001.wal";
const INVENTORY_FILE: &str = "wal.inventory";

/// Persists WAL sync progress after each successful sync. Failures are
/// logged, never surfaced: the inventory is an optimization for recovery,
/// not a correctness requirement.
struct InventoryListener {
    inventory: Arc<WalInventory>,
}

impl SyncListener for InventoryListener {
    fn wal_synced(&self, log_number: u64, synced_size: u64) {
        if let Err(err) = self.inventory.record_synced(log_number, synced_size) {
            warn!(error = %err, log_number, "failed to persist WAL sync progress");
        }
    }
}

/// Configures and opens a [`Database`].
pub struct DatabaseBuilder {
    path: Option<PathBuf>,
    options: EngineOptions,
}

impl DatabaseBuilder {
    /// Store the WAL under `path` (created if missing). Without a path the
    /// database is purely in-memory and nothing survives a restart.
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Select the engine-level write strategy.
    pub fn options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Open the database, replaying any existing WAL into the memtable.
    pub fn open(self) -> Result<Database> {
        let memtable = Arc::new(Memtable::new());

        let (wal, listener, initial) = match &self.path {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                let wal_path = dir.join(WAL_FILE);
                let initial = if wal_path.exists() {
                    replay_wal(&wal_path, &memtable)?
                } else {
                    0
                };
                let wal = Arc::new(Wal::open(&wal_path, 1)?);
                let inventory = Arc::new(WalInventory::open(dir.join(INVENTORY_FILE))?);
                let listener = Arc::new(InventoryListener { inventory }) as Arc<dyn SyncListener>;
                info!(path = %dir.display(), last_sequence = initial, "opened database");
                (wal as Arc<dyn WalSink>, Some(listener), initial)
            }
            None => (
                Arc::new(MemWal::new()) as Arc<dyn WalSink>,
                None,
                0,
            ),
        };

        let mut builder = WritePipeline::builder()
            .options(self.options)
            .memtable(Arc::clone(&memtable) as Arc<dyn MemtableView>)
            .wal(Arc::clone(&wal))
            .initial_sequence(initial);
        if let Some(listener) = listener {
            builder = builder.sync_listener(listener);
        }
        let pipeline = builder.build()?;

        Ok(Database {
            pipeline,
            memtable,
            wal,
            closed: AtomicBool::new(false),
        })
    }
}

/// Replay every frame of an existing WAL segment, tagging records with the
/// sequences the pipeline assigned at commit time. Frames that were never
/// memtable-bound (WAL-only prepares) still advance the sequence horizon but
/// contribute nothing visible; sub-batched frames are re-applied at their
/// base, matching how the live pipeline tagged them. Returns the last
/// sequence in use.
fn replay_wal(path: &Path, memtable: &Arc<Memtable>) -> Result<SequenceNumber> {
    let mut reader = WalReader::open(path)?;
    let mut last = 0;
    for record in reader.read_all()? {
        let meta = record.meta;
        if meta.seq_count > 0 {
            last = last.max(meta.base_sequence + meta.seq_count - 1);
        }
        if !meta.memtable_bound {
            continue;
        }
        let mut next = meta.base_sequence;
        for batch in WriteBatch::decode_all(&record.payload)? {
            if meta.seq_per_record {
                memtable.insert(&batch, next, true)?;
                next += batch.count() as u64;
            } else {
                memtable.insert(&batch, meta.base_sequence, false)?;
            }
        }
    }
    Ok(last)
}

/// An embedded log-structured store fronted by the group-commit pipeline.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct Database {
    pipeline: WritePipeline,
    memtable: Arc<Memtable>,
    wal: Arc<dyn WalSink>,
    closed: AtomicBool,
}

impl Database {
    /// Start configuring a database.
    pub fn builder() -> DatabaseBuilder {
        DatabaseBuilder {
            path: None,
            options: EngineOptions::default(),
        }
    }

    /// Open a database at `path` with default options.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::builder().path(path).open()
    }

    /// Open an in-memory database (no durability across restarts).
    pub fn in_memory() -> Result<Self> {
        Self::builder().open()
    }

    /// Commit a batch with default write options.
    pub fn write(&self, batch: WriteBatch) -> Result<SequenceNumber> {
        self.write_with_options(batch, WriteOptions::default())
    }

    /// Commit a batch with explicit write options.
    pub fn write_with_options(
        &self,
        batch: WriteBatch,
        options: WriteOptions,
    ) -> Result<SequenceNumber> {
        self.submit(WriteRequest::new(batch).with_options(options))
    }

    /// Full-control entry point: commit a request with callbacks attached.
    pub fn submit(&self, request: WriteRequest) -> Result<SequenceNumber> {
        self.ensure_open()?;
        Ok(self.pipeline.submit(request)?)
    }

    /// Insert or overwrite one key.
    pub fn put(&self, key: impl Into<Key>, value: impl Into<Value>) -> Result<SequenceNumber> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write(batch)
    }

    /// Delete one key.
    pub fn delete(&self, key: impl Into<Key>) -> Result<SequenceNumber> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write(batch)
    }

    /// Read a key at the current publication horizon.
    pub fn get(&self, key: &Key) -> Result<Option<Value>> {
        self.get_at(key, self.pipeline.last_published_sequence())
    }

    /// Read a key at an explicit snapshot sequence.
    pub fn get_at(&self, key: &Key, snapshot: SequenceNumber) -> Result<Option<Value>> {
        self.ensure_open()?;
        Ok(self.memtable.get(key, snapshot).flatten())
    }

    /// Last sequence visible to readers; usable as a snapshot for
    /// [`Database::get_at`].
    pub fn last_sequence(&self) -> SequenceNumber {
        self.pipeline.last_published_sequence()
    }

    /// The uncleared background error, if the engine is halted.
    pub fn background_error(&self) -> Option<cascade_core::WriteError> {
        self.pipeline.background_error()
    }

    /// Clear a background error and accept writes again.
    pub fn clear_background_error(&self) {
        self.pipeline.clear_background_error()
    }

    /// Flush the WAL and close. Further operations fail with
    /// [`Error::Closed`]; close itself is idempotent.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if !self.wal.is_synced() {
            self.wal.sync()?;
            self.wal.mark_synced();
        }
        info!(last_sequence = self.last_sequence(), "closed database");
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete_roundtrip() {
        let db = Database::in_memory().unwrap();
        db.put("user:1", "alice").unwrap();
        assert_eq!(db.get(&Key::from("user:1")).unwrap(), Some("alice".into()));

        db.delete("user:1").unwrap();
        assert_eq!(db.get(&Key::from("user:1")).unwrap(), None);
    }

    #[test]
    fn snapshot_reads_ignore_later_writes() {
        let db = Database::in_memory().unwrap();
        db.put("k", "v1").unwrap();
        let snapshot = db.last_sequence();
        db.put("k", "v2").unwrap();

        assert_eq!(db.get_at(&Key::from("k"), snapshot).unwrap(), Some("v1".into()));
        assert_eq!(db.get(&Key::from("k")).unwrap(), Some("v2".into()));
    }

    #[test]
    fn reopen_replays_the_wal() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = Database::open(dir.path()).unwrap();
            db.put("persist", "yes").unwrap();
            let mut batch = WriteBatch::new();
            batch.put("a", "1").put("b", "2");
            db.write_with_options(batch, WriteOptions::durable()).unwrap();
            db.close().unwrap();
        }

        let db = Database::open(dir.path()).unwrap();
        assert_eq!(db.last_sequence(), 3);
        assert_eq!(db.get(&Key::from("persist")).unwrap(), Some("yes".into()));
        assert_eq!(db.get(&Key::from("b")).unwrap(), Some("2".into()));
    }

    #[test]
    fn closed_database_rejects_operations() {
        let db = Database::in_memory().unwrap();
        db.put("k", "v").unwrap();
        db.close().unwrap();
        db.close().unwrap(); // idempotent

        assert!(matches!(db.put("k2", "v"), Err(Error::Closed)));
        assert!(matches!(db.get(&Key::from("k")), Err(Error::Closed)));
    }
}
