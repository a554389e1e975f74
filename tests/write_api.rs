//! End-to-end tests of the public write API: database handle, group-commit
//! pipeline, WAL durability, and recovery working together.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};

use cascadedb::prelude::*;
use cascadedb::{PreReleaseCallback, WriteCallback, WritePipeline};

use cascade_core::{MemtableView, WalSink, WriteError, WriteResult};
use cascade_durability::{MemWal, WalInventory};
use cascade_storage::Memtable;

#[test]
fn durable_writes_survive_reopen_and_update_the_inventory() {
    let dir = tempfile::tempdir().unwrap();

    {
        let db = Database::open(dir.path()).unwrap();
        let mut batch = WriteBatch::new();
        batch.put("alpha", "1").put("beta", "2").delete("gamma");
        db.write_with_options(batch, WriteOptions::durable()).unwrap();
        db.close().unwrap();
    }

    // The sync listener persisted progress for segment 1.
    let inventory = WalInventory::open(dir.path().join("wal.inventory")).unwrap();
    let segments = inventory.segments();
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].number, 1);
    assert!(segments[0].synced_size > 0);

    let db = Database::open(dir.path()).unwrap();
    assert_eq!(db.last_sequence(), 3);
    assert_eq!(db.get(&Key::from("alpha")).unwrap(), Some(Value::from("1")));
    assert_eq!(db.get(&Key::from("beta")).unwrap(), Some(Value::from("2")));
    assert_eq!(db.get(&Key::from("gamma")).unwrap(), None);
}

#[test]
fn concurrent_writers_each_get_a_private_range() {
    let db = Arc::new(Database::in_memory().unwrap());
    let threads = 8;
    let writes_per_thread = 50;
    let barrier = Arc::new(Barrier::new(threads));

    let mut handles = Vec::new();
    for t in 0..threads {
        let db = Arc::clone(&db);
        let barrier = Arc::clone(&barrier);
        handles.push(std::thread::spawn(move || {
            barrier.wait();
            let mut bases = Vec::new();
            for i in 0..writes_per_thread {
                let mut batch = WriteBatch::new();
                batch.put(format!("t{t}-k{i}").into_bytes(), format!("v{t}-{i}").into_bytes());
                bases.push(db.write(batch).unwrap());
            }
            bases
        }));
    }
    let mut bases: Vec<SequenceNumber> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();

    let total = (threads * writes_per_thread) as u64;
    assert_eq!(db.last_sequence(), total);

    bases.sort_unstable();
    bases.dedup();
    assert_eq!(bases.len() as u64, total);

    for t in 0..threads {
        for i in 0..writes_per_thread {
            let key = Key::from(format!("t{t}-k{i}").into_bytes());
            assert_eq!(
                db.get(&key).unwrap(),
                Some(Value::from(format!("v{t}-{i}").into_bytes()))
            );
        }
    }
}

fn run_mixed_load(options: EngineOptions) -> (Arc<Memtable>, SequenceNumber) {
    let memtable = Arc::new(Memtable::new());
    let wal = Arc::new(MemWal::new());
    let pipeline = Arc::new(
        WritePipeline::builder()
            .options(options)
            .memtable(Arc::clone(&memtable) as Arc<dyn MemtableView>)
            .wal(wal as Arc<dyn WalSink>)
            .build()
            .unwrap(),
    );

    let threads = 6;
    let barrier = Arc::new(Barrier::new(threads));
    let mut handles = Vec::new();
    for t in 0..threads {
        let pipeline = Arc::clone(&pipeline);
        let barrier = Arc::clone(&barrier);
        handles.push(std::thread::spawn(move || {
            barrier.wait();
            for i in 0..40 {
                let mut batch = WriteBatch::new();
                batch.put(
                    format!("m{t}-{i}").into_bytes(),
                    format!("val{t}-{i}").into_bytes(),
                );
                pipeline
                    .submit(WriteRequest::new(batch))
                    .expect("write succeeds");
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
    let last = pipeline.last_published_sequence();
    (memtable, last)
}

#[test]
fn parallel_application_matches_serial_application() {
    let serial = run_mixed_load(EngineOptions {
        allow_concurrent_memtable_write: false,
        ..EngineOptions::default()
    });
    let parallel = run_mixed_load(EngineOptions::default());

    assert_eq!(serial.1, 240);
    assert_eq!(parallel.1, 240);
    assert_eq!(serial.0.len(), parallel.0.len());
    for t in 0..6 {
        for i in 0..40 {
            let key = Key::from(format!("m{t}-{i}").into_bytes());
            let expected = Some(Some(Value::from(format!("val{t}-{i}").into_bytes())));
            assert_eq!(serial.0.get(&key, serial.1), expected);
            assert_eq!(parallel.0.get(&key, parallel.1), expected);
        }
    }
}

#[test]
fn pipelined_database_recovers_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = Database::builder()
            .path(dir.path())
            .options(EngineOptions::pipelined())
            .open()
            .unwrap();
        for i in 0..10 {
            db.put(format!("p{i}").into_bytes(), "v").unwrap();
        }
        assert_eq!(db.last_sequence(), 10);
        db.close().unwrap();
    }

    let db = Database::open(dir.path()).unwrap();
    assert_eq!(db.last_sequence(), 10);
    assert_eq!(db.get(&Key::from("p9")).unwrap(), Some(Value::from("v")));
}

#[test]
fn unordered_database_applies_out_of_band() {
    let db = Database::builder()
        .options(EngineOptions::unordered())
        .open()
        .unwrap();

    let mut batch = WriteBatch::new();
    batch.put("u1", "a").put("u2", "b");
    let base = db.write(batch).unwrap();
    assert_eq!(base, 1);
    assert_eq!(db.last_sequence(), 2);
    assert_eq!(db.get(&Key::from("u2")).unwrap(), Some(Value::from("b")));
}

struct RejectingCallback;
impl WriteCallback for RejectingCallback {
    fn validate(&self) -> WriteResult<()> {
        Err(WriteError::InvalidArgument("write conflict".into()))
    }
}

#[test]
fn failed_validation_callback_does_not_disturb_the_engine() {
    let db = Database::in_memory().unwrap();
    db.put("before", "1").unwrap();

    let mut batch = WriteBatch::new();
    batch.put("rejected", "x");
    let err = db
        .submit(WriteRequest::new(batch).with_callback(Arc::new(RejectingCallback)))
        .unwrap_err();
    assert!(matches!(err, Error::Callback(_)));

    assert_eq!(db.get(&Key::from("rejected")).unwrap(), None);
    assert_eq!(db.last_sequence(), 1);
    db.put("after", "2").unwrap();
    assert_eq!(db.last_sequence(), 2);
}

struct CommitMarker {
    sequences: parking_lot::Mutex<Vec<SequenceNumber>>,
    calls: AtomicUsize,
}
impl PreReleaseCallback for CommitMarker {
    fn on_pre_release(
        &self,
        sequence: SequenceNumber,
        _disable_memtable: bool,
        _index: usize,
        _total: usize,
    ) -> WriteResult<()> {
        self.sequences.lock().push(sequence);
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn pre_release_hook_sees_the_assigned_sequence_before_visibility() {
    let db = Database::in_memory().unwrap();
    let marker = Arc::new(CommitMarker {
        sequences: parking_lot::Mutex::new(Vec::new()),
        calls: AtomicUsize::new(0),
    });

    let mut batch = WriteBatch::new();
    batch.put("marked", "v");
    let base = db
        .submit(
            WriteRequest::new(batch)
                .with_pre_release(Arc::clone(&marker) as Arc<dyn PreReleaseCallback>),
        )
        .unwrap();

    assert_eq!(marker.calls.load(Ordering::SeqCst), 1);
    assert_eq!(*marker.sequences.lock(), vec![base]);
}

#[test]
fn protected_batches_commit_and_bad_protection_width_is_rejected() {
    let db = Database::in_memory().unwrap();

    let mut batch = WriteBatch::with_protection(8);
    batch.put("safe", "v");
    let options = WriteOptions {
        protection_bytes_per_key: 8,
        ..WriteOptions::default()
    };
    db.write_with_options(batch, options).unwrap();
    assert_eq!(db.get(&Key::from("safe")).unwrap(), Some(Value::from("v")));

    let mut batch = WriteBatch::new();
    batch.put("k", "v");
    let options = WriteOptions {
        protection_bytes_per_key: 4,
        ..WriteOptions::default()
    };
    assert!(matches!(
        db.write_with_options(batch, options),
        Err(Error::InvalidRequest(_))
    ));
}

#[test]
fn wal_only_prepare_records_are_durable_but_invisible() {
    let memtable = Arc::new(Memtable::new());
    let wal = Arc::new(MemWal::new());
    let pipeline = WritePipeline::builder()
        .options(EngineOptions {
            two_write_queues: true,
            ..EngineOptions::default()
        })
        .memtable(Arc::clone(&memtable) as Arc<dyn MemtableView>)
        .wal(Arc::clone(&wal) as Arc<dyn WalSink>)
        .build()
        .unwrap();

    let mut prepare = WriteBatch::new();
    prepare.put("txn:1:intent", "transfer");
    pipeline
        .submit(WriteRequest::new(prepare).with_options(WriteOptions::wal_only()))
        .unwrap();

    assert_eq!(wal.record_count(), 1);
    assert_eq!(memtable.len(), 0);
    assert_eq!(pipeline.last_published_sequence(), 0);

    // The commit path is unaffected by prepares in flight.
    let mut commit = WriteBatch::new();
    commit.put("balance", "90");
    assert_eq!(pipeline.submit(WriteRequest::new(commit)).unwrap(), 1);
}

#[test]
fn wal_only_prepares_stay_invisible_after_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let options = EngineOptions {
        two_write_queues: true,
        ..EngineOptions::default()
    };
    {
        let db = Database::builder()
            .path(dir.path())
            .options(options.clone())
            .open()
            .unwrap();
        let mut prepare = WriteBatch::new();
        prepare.put("txn:1:intent", "transfer");
        db.submit(WriteRequest::new(prepare).with_options(WriteOptions::wal_only()))
            .unwrap();
        db.put("balance", "90").unwrap();
        db.close().unwrap();
    }

    // The prepare frame is in the log but must not resurface in the
    // memtable; only the committed write comes back.
    let db = Database::builder()
        .path(dir.path())
        .options(options)
        .open()
        .unwrap();
    assert_eq!(db.get(&Key::from("txn:1:intent")).unwrap(), None);
    assert_eq!(db.get(&Key::from("balance")).unwrap(), Some(Value::from("90")));
    assert_eq!(db.last_sequence(), 1);
}

#[test]
fn sub_batched_writes_recover_at_their_base() {
    let dir = tempfile::tempdir().unwrap();
    let options = EngineOptions {
        seq_per_batch: true,
        ..EngineOptions::default()
    };
    {
        let db = Database::builder()
            .path(dir.path())
            .options(options.clone())
            .open()
            .unwrap();
        let mut batch = WriteBatch::new();
        batch.put("a", "1").put("b", "2").put("c", "3");
        let base = db
            .submit(WriteRequest::new(batch).with_batch_count(2))
            .unwrap();
        assert_eq!(base, 1);
        assert_eq!(db.last_sequence(), 2);
        db.close().unwrap();
    }

    // Recovery keeps the per-batch horizon and re-tags every record with
    // the writer's base, just like the live apply did.
    let db = Database::builder()
        .path(dir.path())
        .options(options)
        .open()
        .unwrap();
    assert_eq!(db.last_sequence(), 2);
    assert_eq!(db.get_at(&Key::from("c"), 1).unwrap(), Some(Value::from("3")));
}
