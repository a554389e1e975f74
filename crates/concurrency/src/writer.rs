//! Per-writer state, parking, and outcome tracking.
//!
//! Each submitted write becomes one `Writer`, shared as an `Arc` between the
//! submitting thread and whichever thread drives its group. The submitting
//! thread parks on the writer's condvar; the leader (or the last parallel
//! writer) moves the state machine and wakes it. State transitions happen
//! while the queue's coordination lock is held, so a writer observes them in
//! a consistent order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use cascade_core::{
    PostMemtableCallback, PreReleaseCallback, SequenceNumber, WriteBatch, WriteCallback,
    WriteError, WriteOptions, WriteResult,
};

use crate::group::WriteGroup;

/// Normalize a hook failure into the writer-isolated error family without
/// double-wrapping.
pub(crate) fn callback_error(err: WriteError) -> WriteError {
    match err {
        e @ WriteError::CallbackFailed(_) => e,
        other => WriteError::CallbackFailed(other.to_string()),
    }
}

/// Position of a writer in the group-commit protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    /// Queued, waiting for a role.
    Pending,
    /// Heads a group; drives WAL, sequencing, and (serial) application.
    Leader,
    /// Merged into a group; the leader does all the work.
    Follower,
    /// Merged into a group and told to apply its own batch concurrently.
    ParallelWriter,
    /// Finished; the writer's status and sequence are final.
    Completed,
}

/// One write in flight.
pub struct Writer {
    pub(crate) batch: WriteBatch,
    pub(crate) options: WriteOptions,
    /// Declared sub-batch count; meaningful only when sequencing per batch.
    pub(crate) batch_count: usize,
    pub(crate) callback: Option<Arc<dyn WriteCallback>>,
    pub(crate) pre_release: Option<Arc<dyn PreReleaseCallback>>,
    pub(crate) post_memtable: Option<Arc<dyn PostMemtableCallback>>,

    state: Mutex<WriterState>,
    state_changed: Condvar,
    sequence: AtomicU64,
    outcome: Mutex<Outcome>,
    group: Mutex<Option<Arc<WriteGroup>>>,
}

#[derive(Default)]
struct Outcome {
    callback_failed: bool,
    apply_failed: bool,
    error: Option<WriteError>,
}

impl Writer {
    pub(crate) fn new(
        batch: WriteBatch,
        options: WriteOptions,
        batch_count: usize,
        callback: Option<Arc<dyn WriteCallback>>,
        pre_release: Option<Arc<dyn PreReleaseCallback>>,
        post_memtable: Option<Arc<dyn PostMemtableCallback>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            batch,
            options,
            batch_count,
            callback,
            pre_release,
            post_memtable,
            state: Mutex::new(WriterState::Pending),
            state_changed: Condvar::new(),
            sequence: AtomicU64::new(0),
            outcome: Mutex::new(Outcome::default()),
            group: Mutex::new(None),
        })
    }

    /// Current protocol state.
    pub fn state(&self) -> WriterState {
        *self.state.lock()
    }

    /// Move to `state` and wake the parked submitter. Callers hold the
    /// queue's coordination lock.
    pub(crate) fn set_state(&self, state: WriterState) {
        let mut guard = self.state.lock();
        *guard = state;
        self.state_changed.notify_all();
    }

    /// Park until this writer is given a role or completed. Returns the
    /// first state that is not `Pending`/`Follower`.
    pub(crate) fn await_role(&self) -> WriterState {
        let mut guard = self.state.lock();
        while matches!(*guard, WriterState::Pending | WriterState::Follower) {
            self.state_changed.wait(&mut guard);
        }
        *guard
    }

    /// Park until the group finisher marks this writer completed.
    pub(crate) fn await_completed(&self) {
        let mut guard = self.state.lock();
        while *guard != WriterState::Completed {
            self.state_changed.wait(&mut guard);
        }
    }

    /// First sequence of this writer's assigned range (0 until assigned).
    pub fn sequence(&self) -> SequenceNumber {
        self.sequence.load(Ordering::Acquire)
    }

    pub(crate) fn set_sequence(&self, seq: SequenceNumber) {
        self.sequence.store(seq, Ordering::Release);
    }

    /// Run the validation callback once; a failure excludes this writer from
    /// WAL content and memtable application without touching its siblings.
    pub(crate) fn run_validation(&self) {
        if let Some(cb) = &self.callback {
            if let Err(err) = cb.validate() {
                let mut outcome = self.outcome.lock();
                outcome.callback_failed = true;
                outcome.error = Some(callback_error(err));
            }
        }
    }

    pub(crate) fn callback_failed(&self) -> bool {
        self.outcome.lock().callback_failed
    }

    pub(crate) fn apply_failed(&self) -> bool {
        self.outcome.lock().apply_failed
    }

    /// Whether this writer's records go to the memtable.
    pub(crate) fn writes_memtable(&self) -> bool {
        !self.options.disable_memtable && !self.callback_failed()
    }

    /// Record a writer-local error (pre-release / post-memtable hook
    /// failure). First error wins.
    pub(crate) fn record_error(&self, err: WriteError) {
        let mut outcome = self.outcome.lock();
        if outcome.error.is_none() {
            outcome.error = Some(err);
        }
    }

    /// Record a failed memtable application for this writer's own range.
    pub(crate) fn record_apply_error(&self, err: WriteError) {
        let mut outcome = self.outcome.lock();
        outcome.apply_failed = true;
        outcome.error = Some(err);
    }

    /// Impose a group-fatal error (WAL or serial-apply failure). Overrides
    /// any hook error, but a validation-failed writer keeps its own status:
    /// its content never reached the group's WAL payload.
    pub(crate) fn impose_group_error(&self, err: WriteError) {
        let mut outcome = self.outcome.lock();
        if !outcome.callback_failed {
            outcome.error = Some(err);
        }
    }

    pub(crate) fn error(&self) -> Option<WriteError> {
        self.outcome.lock().error.clone()
    }

    /// Final status: the recorded error, or the assigned range start.
    pub(crate) fn final_status(&self) -> WriteResult<SequenceNumber> {
        match self.outcome.lock().error.clone() {
            Some(err) => Err(err),
            None => Ok(self.sequence()),
        }
    }

    pub(crate) fn set_group(&self, group: Arc<WriteGroup>) {
        *self.group.lock() = Some(group);
    }

    pub(crate) fn group(&self) -> Option<Arc<WriteGroup>> {
        self.group.lock().clone()
    }

    /// Drop the writer's back-reference so the writer/group `Arc` cycle is
    /// broken at exit.
    pub(crate) fn clear_group(&self) {
        *self.group.lock() = None;
    }
}

impl std::fmt::Debug for Writer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writer")
            .field("state", &self.state())
            .field("records", &self.batch.count())
            .field("batch_count", &self.batch_count)
            .field("sequence", &self.sequence())
            .finish()
    }
}
