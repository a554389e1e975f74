//! FIFO writer queue with leader election and group formation.
//!
//! One mutex (the coordination lock) guards the pending list, the
//! leader-active flag, and every writer state transition. Writers enter
//! through [`WriteQueue::join`]: the first arrival while no leader is active
//! becomes leader immediately; everyone else parks. The leader later cuts a
//! group from the front of the queue, and at exit either promotes the next
//! pending writer or clears the flag.

use std::sync::Arc;

use parking_lot::Mutex;
use std::collections::VecDeque;

use cascade_core::{SequenceNumber, WriteError};

use crate::group::WriteGroup;
use crate::sequence::SequenceCounter;
use crate::writer::{Writer, WriterState};

/// Hard cap on a group's merged byte size.
const MAX_GROUP_BYTES: usize = 1 << 20;

/// Leaders at or below this size get a grace allowance so one small write
/// does not cut a tiny group in front of larger queued writers.
const SMALL_LEADER_BYTES: usize = 128 << 10;

#[derive(Default)]
struct QueueInner {
    pending: VecDeque<Arc<Writer>>,
    leader_active: bool,
    /// Byte size of the previously cut group; floors the next budget so
    /// group size adapts to the recent offered load.
    last_group_bytes: usize,
}

/// Outcome of joining the queue, from the submitting thread's view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// This writer leads the next group.
    Leader,
    /// A leader merged this writer and told it to apply its own batch.
    ParallelWriter,
    /// A leader did all the work; the writer's status is final.
    Completed,
}

/// One admission queue. The pipeline owns two in the two-queue
/// configuration; WAL-only writes flow through the second.
pub struct WriteQueue {
    inner: Mutex<QueueInner>,
}

impl WriteQueue {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
        }
    }

    /// Enter the queue and park until given a role.
    pub(crate) fn join(&self, writer: &Arc<Writer>) -> JoinOutcome {
        {
            let mut inner = self.inner.lock();
            if !inner.leader_active {
                inner.leader_active = true;
                writer.set_state(WriterState::Leader);
                return JoinOutcome::Leader;
            }
            inner.pending.push_back(Arc::clone(writer));
        }
        match writer.await_role() {
            WriterState::Leader => JoinOutcome::Leader,
            WriterState::ParallelWriter => JoinOutcome::ParallelWriter,
            WriterState::Completed => JoinOutcome::Completed,
            state => unreachable!("writer woke in non-role state {state:?}"),
        }
    }

    /// Cut a group: merge compatible pending writers behind `leader` up to
    /// the adaptive byte budget, preserving arrival order. Also reads the
    /// publication horizon under the same lock, so the default route sees a
    /// consistent (group, last-sequence) pair.
    pub(crate) fn form_group(
        &self,
        leader: &Arc<Writer>,
        sequence: &SequenceCounter,
    ) -> (WriteGroup, SequenceNumber) {
        let mut inner = self.inner.lock();
        debug_assert_eq!(leader.state(), WriterState::Leader);

        let leader_bytes = leader.batch.byte_size();
        let mut budget = if leader_bytes <= SMALL_LEADER_BYTES {
            leader_bytes + SMALL_LEADER_BYTES
        } else {
            MAX_GROUP_BYTES
        };
        budget = budget.max(inner.last_group_bytes).min(MAX_GROUP_BYTES);

        let mut group = WriteGroup::new(Arc::clone(leader));
        while let Some(candidate) = inner.pending.front() {
            if !compatible(leader, candidate) {
                break;
            }
            if group.byte_size() + candidate.batch.byte_size() > budget {
                break;
            }
            let follower = inner.pending.pop_front().expect("front checked above");
            follower.set_state(WriterState::Follower);
            group.push(follower);
        }
        inner.last_group_bytes = group.byte_size();

        let last_published = sequence.last_published();
        (group, last_published)
    }

    /// Hand every non-leader member its own batch to apply. The leader keeps
    /// driving; followers wake as parallel writers.
    pub(crate) fn launch_parallel(&self, group: &Arc<WriteGroup>) {
        let _inner = self.inner.lock();
        group.start_parallel();
        for writer in group.writers() {
            writer.set_group(Arc::clone(group));
            if !Arc::ptr_eq(writer, group.leader()) {
                writer.set_state(WriterState::ParallelWriter);
            }
        }
    }

    /// Called by each parallel writer after applying its range. True for the
    /// last one, which must then finish the group; the rest park until it
    /// does.
    pub(crate) fn complete_parallel_writer(
        &self,
        writer: &Arc<Writer>,
        group: &Arc<WriteGroup>,
    ) -> bool {
        if group.finish_one() {
            return true;
        }
        writer.await_completed();
        false
    }

    /// Finish the group and elect the next leader in one critical section.
    pub(crate) fn exit_group(&self, group: &WriteGroup, group_error: Option<&WriteError>) {
        let mut inner = self.inner.lock();
        Self::complete_members(group, group_error);
        Self::promote_next(&mut inner);
    }

    /// Pipelined handoff: pass leadership on without completing the group,
    /// so the next group's WAL write overlaps this group's application.
    pub(crate) fn hand_off_leadership(&self) {
        let mut inner = self.inner.lock();
        Self::promote_next(&mut inner);
    }

    /// Complete a group whose leadership was already handed off.
    pub(crate) fn complete_group(
        &self,
        group: &WriteGroup,
        group_error: Option<&WriteError>,
    ) {
        let _inner = self.inner.lock();
        Self::complete_members(group, group_error);
    }

    fn complete_members(group: &WriteGroup, group_error: Option<&WriteError>) {
        for writer in group.writers() {
            if let Some(err) = group_error {
                writer.impose_group_error(err.clone());
            }
            writer.clear_group();
            writer.set_state(WriterState::Completed);
        }
    }

    fn promote_next(inner: &mut QueueInner) {
        if let Some(next) = inner.pending.pop_front() {
            next.set_state(WriterState::Leader);
        } else {
            inner.leader_active = false;
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }
}

/// Merge rule, applied front-to-back. The scan stops at the first
/// incompatible writer (never skips past it) so commit order stays FIFO.
fn compatible(leader: &Writer, candidate: &Writer) -> bool {
    // A sync follower under a non-sync leader would be acknowledged
    // without its fsync. The reverse merge is fine.
    if candidate.options.sync && !leader.options.sync {
        return false;
    }
    if candidate.options.disable_wal != leader.options.disable_wal {
        return false;
    }
    if candidate.options.disable_memtable != leader.options.disable_memtable {
        return false;
    }
    if candidate.options.protection_bytes_per_key != leader.options.protection_bytes_per_key {
        return false;
    }
    if candidate.options.rate_limiter_priority != leader.options.rate_limiter_priority {
        return false;
    }
    if let Some(cb) = &candidate.callback {
        if !cb.allow_write_batching() {
            return false;
        }
    }
    true
}
