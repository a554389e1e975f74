//! The group-commit write pipeline.
//!
//! `WritePipeline::submit` is the single entry point: the calling thread
//! carries its write through admission, group formation, WAL durability,
//! sequencing, and memtable application, parking only while another thread
//! drives its group. Four mutually exclusive strategies exist, selected by
//! [`EngineOptions`] at construction and validated per write:
//!
//! - **grouped** (default): leader does everything, optionally fanning the
//!   memtable application out to the group members;
//! - **WAL-only prepare**: `two_write_queues` routes `disable_memtable`
//!   writes through a second queue, decoupled from commit sequencing;
//! - **unordered**: sequences are reserved eagerly and the memtable is
//!   written out of band after publication;
//! - **pipelined**: leadership is handed off after the WAL stage so the next
//!   group's WAL write overlaps this group's memtable application.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

use cascade_core::{
    FrameMeta, MemtableView, PostMemtableCallback, PreReleaseCallback, RateLimiter,
    RateLimiterPriority, SequenceNumber, SyncListener, Tracer, WalSink, WriteBatch, WriteCallback,
    WriteError, WriteOptions, WriteResult,
};

use crate::config::EngineOptions;
use crate::group::WriteGroup;
use crate::queue::{JoinOutcome, WriteQueue};
use crate::sequence::SequenceCounter;
use crate::writer::{callback_error, Writer};

/// One write submission: the batch plus everything optional attached to it.
pub struct WriteRequest {
    /// Records to commit atomically.
    pub batch: WriteBatch,
    /// Per-write knobs.
    pub options: WriteOptions,
    /// Declared sub-batch count. Required (non-zero) when the engine
    /// sequences per batch; in unordered mode `0` means one sub-batch per
    /// record.
    pub batch_count: usize,
    /// Validation hook, checked after group formation.
    pub callback: Option<Arc<dyn WriteCallback>>,
    /// Post-durability, pre-visibility hook.
    pub pre_release: Option<Arc<dyn PreReleaseCallback>>,
    /// Post-visibility hook.
    pub post_memtable: Option<Arc<dyn PostMemtableCallback>>,
}

impl WriteRequest {
    /// A plain write with default options and no hooks.
    pub fn new(batch: WriteBatch) -> Self {
        Self {
            batch,
            options: WriteOptions::default(),
            batch_count: 0,
            callback: None,
            pre_release: None,
            post_memtable: None,
        }
    }

    /// Replace the per-write options.
    pub fn with_options(mut self, options: WriteOptions) -> Self {
        self.options = options;
        self
    }

    /// Declare the sub-batch count.
    pub fn with_batch_count(mut self, count: usize) -> Self {
        self.batch_count = count;
        self
    }

    /// Attach a validation callback.
    pub fn with_callback(mut self, callback: Arc<dyn WriteCallback>) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Attach a pre-release callback.
    pub fn with_pre_release(mut self, callback: Arc<dyn PreReleaseCallback>) -> Self {
        self.pre_release = Some(callback);
        self
    }

    /// Attach a post-memtable callback.
    pub fn with_post_memtable(mut self, callback: Arc<dyn PostMemtableCallback>) -> Self {
        self.post_memtable = Some(callback);
        self
    }
}

/// Strategy chosen for one write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteRoute {
    Grouped,
    WalOnlyPrepare,
    Unordered,
    Pipelined,
}

/// Publication gate for the pipelined apply stage: groups apply in
/// reservation order, each waiting for its predecessor's range to clear.
struct ApplyGate {
    cursor: Mutex<SequenceNumber>,
    advanced: Condvar,
}

impl ApplyGate {
    fn new(initial: SequenceNumber) -> Self {
        Self {
            cursor: Mutex::new(initial),
            advanced: Condvar::new(),
        }
    }

    /// Block until every sequence up to and including `after` has been
    /// applied or skipped.
    fn wait_turn(&self, after: SequenceNumber) {
        let mut cursor = self.cursor.lock();
        while *cursor < after {
            self.advanced.wait(&mut cursor);
        }
    }

    /// Mark everything up to `seq` applied or skipped. A failed group still
    /// advances past its reserved range, otherwise its successors would wait
    /// forever on sequences that will never be applied.
    fn advance_to(&self, seq: SequenceNumber) {
        let mut cursor = self.cursor.lock();
        if seq > *cursor {
            *cursor = seq;
        }
        self.advanced.notify_all();
    }
}

/// Builder for [`WritePipeline`].
pub struct PipelineBuilder {
    options: EngineOptions,
    memtable: Option<Arc<dyn MemtableView>>,
    wal: Option<Arc<dyn WalSink>>,
    sync_listener: Option<Arc<dyn SyncListener>>,
    tracer: Option<Arc<dyn Tracer>>,
    rate_limiter: Option<Arc<dyn RateLimiter>>,
    initial_sequence: SequenceNumber,
}

impl PipelineBuilder {
    /// Set the engine-level strategy switches.
    pub fn options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the memtable records are applied to.
    pub fn memtable(mut self, memtable: Arc<dyn MemtableView>) -> Self {
        self.memtable = Some(memtable);
        self
    }

    /// Set the WAL groups are appended to.
    pub fn wal(mut self, wal: Arc<dyn WalSink>) -> Self {
        self.wal = Some(wal);
        self
    }

    /// Observer for successful WAL syncs (e.g. the persisted inventory).
    pub fn sync_listener(mut self, listener: Arc<dyn SyncListener>) -> Self {
        self.sync_listener = Some(listener);
        self
    }

    /// Optional write tracer.
    pub fn tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// Optional low-priority throttle.
    pub fn rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Last sequence already in use before this pipeline starts (from
    /// recovery; `0` for an empty store).
    pub fn initial_sequence(mut self, seq: SequenceNumber) -> Self {
        self.initial_sequence = seq;
        self
    }

    /// Build the pipeline.
    pub fn build(self) -> WriteResult<WritePipeline> {
        let memtable = self
            .memtable
            .ok_or_else(|| WriteError::InvalidArgument("pipeline requires a memtable".into()))?;
        let wal = self
            .wal
            .ok_or_else(|| WriteError::InvalidArgument("pipeline requires a WAL".into()))?;
        Ok(WritePipeline {
            apply_gate: ApplyGate::new(self.initial_sequence),
            sequence: SequenceCounter::new(self.initial_sequence),
            options: self.options,
            memtable,
            wal,
            sync_listener: self.sync_listener,
            tracer: self.tracer,
            rate_limiter: self.rate_limiter,
            main_queue: WriteQueue::new(),
            wal_only_queue: WriteQueue::new(),
            wal_write_lock: Mutex::new(()),
            trace_lock: Mutex::new(()),
            background_error: Mutex::new(None),
        })
    }
}

/// The concurrent group-commit pipeline.
pub struct WritePipeline {
    options: EngineOptions,
    memtable: Arc<dyn MemtableView>,
    wal: Arc<dyn WalSink>,
    sync_listener: Option<Arc<dyn SyncListener>>,
    tracer: Option<Arc<dyn Tracer>>,
    rate_limiter: Option<Arc<dyn RateLimiter>>,

    sequence: SequenceCounter,
    main_queue: WriteQueue,
    /// Second admission queue for WAL-only prepares (`two_write_queues`).
    wal_only_queue: WriteQueue,
    /// Serializes WAL appends when they are decoupled from the coordination
    /// lock (two-queue reservation, manual flush).
    wal_write_lock: Mutex<()>,
    trace_lock: Mutex<()>,
    background_error: Mutex<Option<WriteError>>,
    apply_gate: ApplyGate,
}

impl WritePipeline {
    /// Start building a pipeline.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder {
            options: EngineOptions::default(),
            memtable: None,
            wal: None,
            sync_listener: None,
            tracer: None,
            rate_limiter: None,
            initial_sequence: 0,
        }
    }

    /// Commit one write. Blocks until the write's outcome is final; returns
    /// the first sequence of the writer's assigned range.
    pub fn submit(&self, request: WriteRequest) -> WriteResult<SequenceNumber> {
        self.check_background_error()?;
        self.validate(&request)?;

        if request.options.low_priority {
            if let Some(limiter) = &self.rate_limiter {
                limiter.throttle(
                    request.batch.byte_size(),
                    request.options.rate_limiter_priority,
                );
            }
        }
        if let Some(tracer) = &self.tracer {
            if !tracer.preserves_write_order() {
                let _guard = self.trace_lock.lock();
                tracer.trace_write(&request.batch);
            }
        }

        match self.route(&request) {
            WriteRoute::WalOnlyPrepare => self.write_wal_only(request),
            WriteRoute::Unordered => self.write_unordered(request),
            WriteRoute::Pipelined => self.write_pipelined(request),
            WriteRoute::Grouped => self.write_grouped(request),
        }
    }

    /// Last sequence visible to readers; use as a read snapshot.
    pub fn last_published_sequence(&self) -> SequenceNumber {
        self.sequence.last_published()
    }

    /// Last sequence reserved by any writer.
    pub fn last_allocated_sequence(&self) -> SequenceNumber {
        self.sequence.last_allocated()
    }

    /// The uncleared background error, if any.
    pub fn background_error(&self) -> Option<WriteError> {
        self.background_error.lock().clone()
    }

    /// Clear the background error and accept writes again. The caller is
    /// asserting it has reconciled the partially applied state.
    pub fn clear_background_error(&self) {
        *self.background_error.lock() = None;
    }

    // ---- admission ----------------------------------------------------

    fn route(&self, request: &WriteRequest) -> WriteRoute {
        if self.options.two_write_queues && request.options.disable_memtable {
            WriteRoute::WalOnlyPrepare
        } else if self.options.unordered_write {
            WriteRoute::Unordered
        } else if self.options.enable_pipelined_write {
            WriteRoute::Pipelined
        } else {
            WriteRoute::Grouped
        }
    }

    fn validate(&self, request: &WriteRequest) -> WriteResult<()> {
        let opts = &request.options;
        let engine = &self.options;

        if request.batch.is_empty() && !(engine.seq_per_batch && request.batch_count > 0) {
            return Err(WriteError::InvalidArgument("empty write batch".into()));
        }
        if request.batch.needs_timestamps() && !opts.disable_memtable {
            return Err(WriteError::InvalidArgument(
                "batch requires timestamps before targeting the memtable".into(),
            ));
        }
        if !matches!(
            opts.rate_limiter_priority,
            RateLimiterPriority::Total | RateLimiterPriority::User
        ) {
            return Err(WriteError::InvalidArgument(
                "write rate-limiter priority must be TOTAL or USER".into(),
            ));
        }
        if opts.rate_limiter_priority != RateLimiterPriority::Total
            && (opts.disable_wal || engine.manual_wal_flush)
        {
            return Err(WriteError::InvalidArgument(
                "rate-limited WAL writes require automatic flushes against the total budget"
                    .into(),
            ));
        }
        if opts.protection_bytes_per_key != 0 && opts.protection_bytes_per_key != 8 {
            return Err(WriteError::InvalidArgument(
                "protection_bytes_per_key must be zero or eight".into(),
            ));
        }
        if opts.disable_wal
            && engine.recycle_wal_files
            && !(engine.two_write_queues && opts.disable_memtable)
        {
            return Err(WriteError::InvalidArgument(
                "WAL-less writes are incompatible with WAL recycling".into(),
            ));
        }
        if opts.sync && opts.disable_wal {
            return Err(WriteError::InvalidArgument(
                "sync write cannot disable the WAL".into(),
            ));
        }
        if engine.enable_pipelined_write {
            if engine.two_write_queues {
                return Err(WriteError::NotSupported(
                    "pipelined writes are incompatible with two write queues".into(),
                ));
            }
            if engine.seq_per_batch {
                return Err(WriteError::NotSupported(
                    "pipelined writes are incompatible with per-batch sequencing".into(),
                ));
            }
            if engine.unordered_write {
                return Err(WriteError::NotSupported(
                    "pipelined writes are incompatible with unordered writes".into(),
                ));
            }
        }
        if request.post_memtable.is_some()
            && (engine.enable_pipelined_write || engine.seq_per_batch)
        {
            return Err(WriteError::NotSupported(
                "post-memtable callbacks are incompatible with pipelined or per-batch writes"
                    .into(),
            ));
        }
        if request.batch.has_delete_range() && engine.row_cache {
            return Err(WriteError::NotSupported(
                "range deletion is incompatible with the row cache".into(),
            ));
        }
        if engine.seq_per_batch && request.batch_count == 0 {
            return Err(WriteError::InvalidArgument(
                "sub-batch count required when sequencing per batch".into(),
            ));
        }
        Ok(())
    }

    fn make_writer(&self, request: WriteRequest) -> Arc<Writer> {
        let batch_count = request.batch_count.max(1);
        Writer::new(
            request.batch,
            request.options,
            batch_count,
            request.callback,
            request.pre_release,
            request.post_memtable,
        )
    }

    // ---- grouped (default) route --------------------------------------

    fn write_grouped(&self, request: WriteRequest) -> WriteResult<SequenceNumber> {
        let writer = self.make_writer(request);
        match self.main_queue.join(&writer) {
            JoinOutcome::Completed => writer.final_status(),
            JoinOutcome::ParallelWriter => {
                let group = writer.group().expect("parallel writer detached from group");
                if writer.writes_memtable() {
                    if let Err(err) = self.memtable.insert(
                        &writer.batch,
                        writer.sequence(),
                        !self.options.seq_per_batch,
                    ) {
                        writer.record_apply_error(err);
                    }
                }
                if self.main_queue.complete_parallel_writer(&writer, &group) {
                    self.finish_applied_group(&group);
                }
                writer.final_status()
            }
            JoinOutcome::Leader => self.lead_grouped(writer),
        }
    }

    fn lead_grouped(&self, leader: Arc<Writer>) -> WriteResult<SequenceNumber> {
        let (group, last_published) = self.main_queue.form_group(&leader, &self.sequence);
        let group = Arc::new(group);

        let mut parallel = self.options.allow_concurrent_memtable_write
            && group.size() > 1
            && self.memtable.supports_concurrent_insert()
            && !self.memtable.supports_in_place_update();
        let (seq_inc, pre_release_total) = self.prepare_group(&group, &mut parallel);

        let disable_wal = leader.options.disable_wal;
        let need_sync = group.writers().iter().any(|w| w.options.sync);

        let mut wal_status: WriteResult<()> = Ok(());
        let last_before = if self.options.two_write_queues {
            // Reservation and append both decoupled from the coordination
            // lock; the WAL-write lock keeps appends in reservation order.
            let _wal_guard = self.wal_write_lock.lock();
            let last_before = self.sequence.allocate(seq_inc);
            if !disable_wal {
                wal_status = self.append_group(&group, last_before + 1, seq_inc);
            }
            last_before
        } else {
            // Default mode: the range derives from the published horizon
            // read under the coordination lock; nothing else can publish
            // until this group exits.
            if !disable_wal {
                wal_status = if self.options.manual_wal_flush {
                    let _wal_guard = self.wal_write_lock.lock();
                    self.append_group(&group, last_published + 1, seq_inc)
                } else {
                    self.append_group(&group, last_published + 1, seq_inc)
                };
            }
            last_published
        };
        let base = last_before + 1;
        let last_sequence = last_before + seq_inc;
        group.set_last_sequence(last_sequence);

        if wal_status.is_ok() && need_sync && !disable_wal {
            wal_status = self.sync_wal();
        }

        if let Err(err) = wal_status {
            warn!(error = %err, group_size = group.size(), "WAL write failed; failing group");
            self.main_queue.exit_group(&group, Some(&err));
            return leader.final_status();
        }

        self.assign_sequences(&group, base);
        self.run_pre_release(&group, pre_release_total);

        if parallel && seq_inc > 0 {
            self.main_queue.launch_parallel(&group);
            if leader.writes_memtable() {
                if let Err(err) = self.memtable.insert(
                    &leader.batch,
                    leader.sequence(),
                    !self.options.seq_per_batch,
                ) {
                    leader.record_apply_error(err);
                }
            }
            if self.main_queue.complete_parallel_writer(&leader, &group) {
                self.finish_applied_group(&group);
            }
        } else {
            match self.apply_serial(&group) {
                Ok(()) => {
                    self.run_post_memtable(&group);
                    self.sequence.publish(last_sequence);
                    self.main_queue.exit_group(&group, None);
                }
                Err(err) => {
                    self.escalate_background_error(&err);
                    self.main_queue.exit_group(&group, Some(&err));
                }
            }
        }
        leader.final_status()
    }

    /// Run validation callbacks, deferred traces, and the sequence
    /// accounting for a freshly cut group. Returns `(seq_inc, pre-release
    /// callback count)`.
    fn prepare_group(&self, group: &WriteGroup, parallel: &mut bool) -> (u64, usize) {
        let mut total_count = 0u64;
        let mut valid_batches = 0u64;
        let mut pre_release_total = 0usize;
        for w in group.writers() {
            w.run_validation();
            if w.callback_failed() {
                continue;
            }
            valid_batches += w.batch_count as u64;
            if w.writes_memtable() {
                total_count += w.batch.count() as u64;
                *parallel = *parallel && !w.batch.has_merge();
            }
            if w.pre_release.is_some() {
                pre_release_total += 1;
            }
        }
        self.replay_deferred_traces(group);
        let seq_inc = if self.options.seq_per_batch {
            valid_batches
        } else {
            total_count
        };
        (seq_inc, pre_release_total)
    }

    /// Finish a group whose memtable application already ran (parallel arm):
    /// collect per-writer apply outcomes, publish on success, escalate on
    /// failure, and release the group.
    fn finish_applied_group(&self, group: &Arc<WriteGroup>) {
        let apply_error = group
            .writers()
            .iter()
            .find(|w| w.apply_failed())
            .and_then(|w| w.error());
        match apply_error {
            None => {
                self.run_post_memtable(group);
                self.sequence.publish(group.last_sequence());
                self.main_queue.exit_group(group, None);
            }
            Some(err) => {
                self.escalate_background_error(&err);
                self.main_queue.exit_group(group, Some(&err));
            }
        }
    }

    fn apply_serial(&self, group: &WriteGroup) -> WriteResult<()> {
        for w in group.writers() {
            if !w.writes_memtable() {
                continue;
            }
            self.memtable
                .insert(&w.batch, w.sequence(), !self.options.seq_per_batch)?;
        }
        Ok(())
    }

    // ---- WAL-only and unordered routes --------------------------------

    fn write_wal_only(&self, request: WriteRequest) -> WriteResult<SequenceNumber> {
        let writer = self.make_writer(request);
        // Prepare records consume sequences only under per-batch
        // sequencing; publication stays with the commit path.
        let assign_order = self.options.seq_per_batch;
        self.run_wal_only(&self.wal_only_queue, writer, assign_order, false)
    }

    fn write_unordered(&self, mut request: WriteRequest) -> WriteResult<SequenceNumber> {
        // Without a declared count, every record is its own sub-batch and
        // gets its own sequence slot.
        let per_record = request.batch_count == 0;
        if per_record {
            request.batch_count = request.batch.count();
        }
        let disable_memtable = request.options.disable_memtable;
        let writer = self.make_writer(request);
        let keep = Arc::clone(&writer);

        let base = self.run_wal_only(&self.main_queue, writer, true, true)?;

        // Memtable application happens out of band, after publication. A
        // failure here leaves a published hole, so it halts the engine.
        if !disable_memtable {
            if let Err(err) = self.memtable.insert(&keep.batch, base, per_record) {
                self.escalate_background_error(&err);
                return Err(err);
            }
        }
        Ok(base)
    }

    /// Shared WAL-only group driver: sequences (optionally), appends, syncs,
    /// runs pre-release hooks, and (optionally) publishes. Never touches the
    /// memtable.
    fn run_wal_only(
        &self,
        queue: &WriteQueue,
        writer: Arc<Writer>,
        assign_order: bool,
        publish: bool,
    ) -> WriteResult<SequenceNumber> {
        match queue.join(&writer) {
            JoinOutcome::Completed => writer.final_status(),
            JoinOutcome::ParallelWriter => {
                unreachable!("parallel launch on a WAL-only queue")
            }
            JoinOutcome::Leader => {
                let (group, _) = queue.form_group(&writer, &self.sequence);

                let mut seq_inc = 0u64;
                let mut pre_release_total = 0usize;
                for w in group.writers() {
                    w.run_validation();
                    if w.callback_failed() {
                        continue;
                    }
                    if assign_order {
                        seq_inc += w.batch_count as u64;
                    }
                    if w.pre_release.is_some() {
                        pre_release_total += 1;
                    }
                }
                self.replay_deferred_traces(&group);

                let disable_wal = writer.options.disable_wal;
                let need_sync = group.writers().iter().any(|w| w.options.sync);

                let mut wal_status: WriteResult<()> = Ok(());
                let last_before = {
                    let _wal_guard = self.wal_write_lock.lock();
                    let last_before = self.sequence.allocate(seq_inc);
                    if !disable_wal {
                        wal_status = self.append_group(&group, last_before + 1, seq_inc);
                    }
                    last_before
                };
                let last_sequence = last_before + seq_inc;
                group.set_last_sequence(last_sequence);

                if wal_status.is_ok() && need_sync && !disable_wal {
                    wal_status = self.sync_wal();
                }

                match wal_status {
                    Ok(()) => {
                        if assign_order {
                            self.assign_sequences_by_batch_count(&group, last_before + 1);
                        }
                        self.run_pre_release(&group, pre_release_total);
                        if publish {
                            self.sequence.publish(last_sequence);
                        }
                        queue.exit_group(&group, None);
                    }
                    Err(err) => {
                        warn!(error = %err, group_size = group.size(), "WAL-only write failed");
                        queue.exit_group(&group, Some(&err));
                    }
                }
                writer.final_status()
            }
        }
    }

    // ---- pipelined route ----------------------------------------------

    fn write_pipelined(&self, request: WriteRequest) -> WriteResult<SequenceNumber> {
        let writer = self.make_writer(request);
        match self.main_queue.join(&writer) {
            JoinOutcome::Completed => writer.final_status(),
            JoinOutcome::ParallelWriter => {
                unreachable!("parallel launch in pipelined mode")
            }
            JoinOutcome::Leader => self.lead_pipelined(writer),
        }
    }

    fn lead_pipelined(&self, leader: Arc<Writer>) -> WriteResult<SequenceNumber> {
        let (group, _) = self.main_queue.form_group(&leader, &self.sequence);

        let mut parallel = false;
        let (seq_inc, pre_release_total) = self.prepare_group(&group, &mut parallel);

        // Reserve eagerly: publication order is enforced by the apply gate,
        // not by holding leadership through application.
        let last_before = self.sequence.allocate(seq_inc);
        let base = last_before + 1;
        let last_sequence = last_before + seq_inc;
        group.set_last_sequence(last_sequence);

        let disable_wal = leader.options.disable_wal;
        let need_sync = group.writers().iter().any(|w| w.options.sync);

        let mut wal_status: WriteResult<()> = Ok(());
        if !disable_wal {
            wal_status = if self.options.manual_wal_flush {
                let _wal_guard = self.wal_write_lock.lock();
                self.append_group(&group, base, seq_inc)
            } else {
                self.append_group(&group, base, seq_inc)
            };
        }
        if wal_status.is_ok() && need_sync && !disable_wal {
            wal_status = self.sync_wal();
        }
        if wal_status.is_ok() {
            self.assign_sequences(&group, base);
            self.run_pre_release(&group, pre_release_total);
        }

        // WAL stage done: the next group may start its WAL write while this
        // one applies.
        self.main_queue.hand_off_leadership();

        self.apply_gate.wait_turn(last_before);
        let mut apply_error = None;
        if wal_status.is_ok() {
            if let Err(err) = self.apply_serial(&group) {
                apply_error = Some(err);
            }
        }
        // Advance past the reserved range even on failure; the hole is
        // never reused.
        self.apply_gate.advance_to(last_sequence);

        match (&wal_status, &apply_error) {
            (Ok(()), None) => {
                self.sequence.publish(last_sequence);
                self.main_queue.complete_group(&group, None);
            }
            (Err(err), _) => {
                warn!(error = %err, group_size = group.size(), "WAL write failed; failing group");
                self.main_queue.complete_group(&group, Some(err));
            }
            (Ok(()), Some(err)) => {
                self.escalate_background_error(err);
                self.main_queue.complete_group(&group, Some(err));
            }
        }
        leader.final_status()
    }

    // ---- shared stage helpers -----------------------------------------

    /// Serialize the group's surviving batches into one WAL payload.
    /// Precondition of the append: every included batch passes its
    /// protection check. The frame carries what replay needs: the reserved
    /// range, whether the records belong in the memtable (the merge rules
    /// keep `disable_memtable` uniform across a group), and the sequencing
    /// mode the applier uses.
    fn append_group(
        &self,
        group: &WriteGroup,
        base: SequenceNumber,
        seq_count: u64,
    ) -> WriteResult<()> {
        let mut payload = Vec::with_capacity(group.byte_size());
        for w in group.writers() {
            if w.callback_failed() {
                continue;
            }
            w.batch.verify_protection()?;
            w.batch.encode_into(&mut payload);
        }
        if payload.is_empty() {
            return Ok(());
        }
        let meta = FrameMeta {
            base_sequence: base,
            seq_count,
            memtable_bound: !group.leader().options.disable_memtable,
            seq_per_record: !self.options.seq_per_batch,
        };
        let size = self.wal.append(&payload, meta)?;
        debug!(base, wal_size = size, group_size = group.size(), "appended group to WAL");
        Ok(())
    }

    fn sync_wal(&self) -> WriteResult<()> {
        self.wal.sync()?;
        self.wal.mark_synced();
        // Best-effort bookkeeping, outside every pipeline lock.
        if let Some(listener) = &self.sync_listener {
            listener.wal_synced(self.wal.log_number(), self.wal.file_size());
        }
        Ok(())
    }

    /// Hand each surviving writer the start of its sub-range. Stride: one
    /// slot per declared sub-batch under per-batch sequencing, one per
    /// record for memtable-bound writers otherwise.
    fn assign_sequences(&self, group: &WriteGroup, base: SequenceNumber) {
        let mut next = base;
        for w in group.writers() {
            if w.callback_failed() {
                continue;
            }
            w.set_sequence(next);
            next += if self.options.seq_per_batch {
                w.batch_count as u64
            } else if w.writes_memtable() {
                w.batch.count() as u64
            } else {
                0
            };
        }
    }

    /// Sub-range assignment for the unordered path: every writer strides by
    /// its sub-batch count regardless of memtable targeting.
    fn assign_sequences_by_batch_count(&self, group: &WriteGroup, base: SequenceNumber) {
        let mut next = base;
        for w in group.writers() {
            if w.callback_failed() {
                continue;
            }
            w.set_sequence(next);
            next += w.batch_count as u64;
        }
    }

    fn run_pre_release(&self, group: &WriteGroup, total: usize) {
        let mut index = 0usize;
        for w in group.writers() {
            if w.callback_failed() {
                continue;
            }
            if let Some(cb) = &w.pre_release {
                if let Err(err) =
                    cb.on_pre_release(w.sequence(), w.options.disable_memtable, index, total)
                {
                    w.record_error(callback_error(err));
                }
                index += 1;
            }
        }
    }

    fn run_post_memtable(&self, group: &WriteGroup) {
        let last_sequence = group.last_sequence();
        for w in group.writers() {
            if w.callback_failed() {
                continue;
            }
            if let Some(cb) = &w.post_memtable {
                if let Err(err) = cb.on_post_memtable(last_sequence, w.options.disable_memtable) {
                    w.record_error(callback_error(err));
                }
            }
        }
    }

    fn replay_deferred_traces(&self, group: &WriteGroup) {
        if let Some(tracer) = &self.tracer {
            if tracer.preserves_write_order() {
                let _guard = self.trace_lock.lock();
                for w in group.writers() {
                    if !w.callback_failed() {
                        tracer.trace_write(&w.batch);
                    }
                }
            }
        }
    }

    // ---- background error ---------------------------------------------

    fn check_background_error(&self) -> WriteResult<()> {
        if let Some(err) = &*self.background_error.lock() {
            return Err(WriteError::Busy(err.to_string()));
        }
        Ok(())
    }

    /// A memtable insert failed after WAL success: readers may already see
    /// part of the group, so refuse writes until the caller reconciles.
    fn escalate_background_error(&self, err: &WriteError) {
        error!(error = %err, "memtable apply failed after WAL success; halting writes");
        let mut slot = self.background_error.lock();
        if slot.is_none() {
            *slot = Some(err.clone());
        }
    }
}
