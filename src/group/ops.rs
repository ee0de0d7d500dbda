/*!
 * Operation Lifecycle
 *
 * admit -> attempt -> (complete | park -> claim -> attempt ...) -> deliver
 *
 * An operation is "in flight" from admission until it is parked or its
 * callback has been handed to a pool thread. Parked operations live in the
 * pending table. The channel's pending bit for the kind is held from
 * admission until the callback is entered, so a second operation of the same
 * kind cannot overtake the first.
 */

use super::{GroupInner, GroupState, PendingOperation};
use crate::channel::{Attempt, ChannelCore, Completion, Operation};
use crate::core::types::{OpId, OpKind};
use crate::core::{CompletionError, GroupError, GroupResult, Timeout};
use crate::dispatch::handler;
use crate::monitoring::GroupCounters;
use crate::pool::PoolKind;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace, warn};

impl GroupInner {
    /// Admit an operation on `core` and try it once right away
    ///
    /// Precondition failures are returned; everything after admission is
    /// reported through the operation's callback.
    pub(crate) fn submit(
        self: &Arc<Self>,
        core: &Arc<ChannelCore>,
        op: Box<dyn Operation>,
        timeout: Timeout,
    ) -> GroupResult<()> {
        let kind = op.kind();
        if !core.is_open() {
            return Err(GroupError::ChannelClosed);
        }
        if self.state() != GroupState::Open {
            return Err(GroupError::GroupShutdown);
        }
        core.reserve(kind)?;

        {
            let mut table = self.table.lock();
            if self.state() != GroupState::Open {
                drop(table);
                core.release(kind);
                return Err(GroupError::GroupShutdown);
            }
            table.begin_flight();
        }

        GroupCounters::bump(&self.counters.issued);
        let deadline = timeout.deadline_from(Instant::now());
        trace!(
            group = %self.id,
            channel = %core.id(),
            kind = %kind,
            timeout_ms = timeout.duration().map(|d| d.as_millis() as u64),
            "Operation admitted"
        );

        match op.attempt(core) {
            Attempt::Complete(completion) => self.finish(core, kind, completion),
            Attempt::Pending(op) => self.park(
                core,
                PendingOperation {
                    id: OpId::next(),
                    channel: core.id(),
                    kind,
                    deadline,
                    op,
                },
            ),
        }
        Ok(())
    }

    /// Move an in-flight operation into the pending table
    pub(crate) fn park(self: &Arc<Self>, core: &ChannelCore, pending: PendingOperation) {
        let (kind, id) = (pending.kind, pending.id);

        let mut table = self.table.lock();
        let rejected = if self.state() == GroupState::Terminated {
            Some(CompletionError::Cancelled)
        } else if !core.is_open() {
            Some(CompletionError::Closed)
        } else {
            None
        };
        if let Some(err) = rejected {
            drop(table);
            let counter = match err {
                CompletionError::Cancelled => &self.counters.cancelled,
                _ => &self.counters.closed,
            };
            GroupCounters::bump(counter);
            self.fail_claimed(core, pending, err);
            self.maybe_terminate();
            return;
        }

        let soonest = table.insert(pending);
        core.set_slot(kind, id);
        table.end_flight();
        drop(table);
        self.drained.notify_all();

        core.rearm(self.backend());
        if soonest {
            // A loop may be sleeping past the new deadline
            let _ = self.backend().wake();
        }
    }

    /// Take the parked operation of `kind` on `core` for an attempt
    pub(crate) fn claim(&self, core: &ChannelCore, kind: OpKind) -> Option<PendingOperation> {
        let mut table = self.table.lock();
        let id = core.take_slot(kind)?;
        let pending = table.remove(id)?;
        table.begin_flight();
        Some(pending)
    }

    /// Run a claimed operation's attempt and route the outcome
    pub(crate) fn resume(self: &Arc<Self>, core: &Arc<ChannelCore>, pending: PendingOperation) {
        let PendingOperation {
            id,
            channel,
            kind,
            deadline,
            op,
        } = pending;

        match op.attempt(core) {
            Attempt::Complete(completion) => self.finish(core, kind, completion),
            Attempt::Pending(op) => self.park(
                core,
                PendingOperation {
                    id,
                    channel,
                    kind,
                    deadline,
                    op,
                },
            ),
        }
    }

    /// Hand a completed in-flight operation's callback off
    pub(crate) fn finish(&self, core: &Arc<ChannelCore>, kind: OpKind, completion: Completion) {
        GroupCounters::bump(&self.counters.completed);
        self.deliver(release_on_entry(core, kind, completion));
        self.end_flight();
        self.maybe_terminate();
    }

    /// Fail an in-flight operation that is no longer in the table
    ///
    /// Only for channels that are closed or groups that are terminated: no
    /// new operation can be admitted, so the pending bit is released at once.
    pub(crate) fn fail_claimed(&self, core: &ChannelCore, pending: PendingOperation, err: CompletionError) {
        debug!(
            group = %self.id,
            channel = %core.id(),
            kind = %pending.kind,
            error = %err,
            "Operation failed without I/O"
        );
        core.release(pending.kind);
        self.deliver(pending.op.fail(err));
        self.end_flight();
    }

    pub(crate) fn end_flight(&self) {
        self.table.lock().end_flight();
        self.drained.notify_all();
    }

    /// Complete every operation whose deadline has passed with `Timeout`
    pub(crate) fn expire_overdue(self: &Arc<Self>) {
        let now = Instant::now();
        let expired = {
            let mut table = self.table.lock();
            if table.next_deadline().map_or(true, |d| d > now) {
                return;
            }
            let expired = table.expire(now);
            for p in &expired {
                if let Some(core) = self.channel(p.channel) {
                    core.clear_slot(p.kind, p.id);
                }
                table.begin_flight();
            }
            expired
        };

        for pending in expired {
            GroupCounters::bump(&self.counters.timed_out);
            match self.channel(pending.channel) {
                Some(core) => {
                    core.rearm(self.backend());
                    trace!(
                        group = %self.id,
                        channel = %core.id(),
                        kind = %pending.kind,
                        "Operation timed out"
                    );
                    let completion = pending.op.fail(CompletionError::Timeout);
                    self.deliver(release_on_entry(&core, pending.kind, completion));
                    self.end_flight();
                }
                None => {
                    self.deliver(pending.op.fail(CompletionError::Timeout));
                    self.end_flight();
                }
            }
        }
        self.maybe_terminate();
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.table.lock().next_deadline()
    }

    /// Schedule a callback on a pool thread
    pub(crate) fn deliver(&self, completion: Completion) {
        match self.pool.kind() {
            PoolKind::Cached => {
                let counters = Arc::clone(&self.counters);
                let group = self.id;
                let outstanding = self.settlement.track();
                let task = Box::new(move || {
                    handler::invoke(&counters, group, completion);
                    drop(outstanding);
                });
                if let Err(task) = self.pool.submit(task) {
                    warn!(group = %self.id, "Pool no longer accepts work; running handler inline");
                    task();
                }
            }
            PoolKind::Fixed => {
                self.tasks.push(completion);
                if self.active_loops.load(Ordering::SeqCst) == 0 {
                    warn!(group = %self.id, "No dispatcher loop left; running handlers inline");
                    self.run_queued();
                } else if !self.pool.is_current_thread_worker() {
                    // Loop threads drain the queue before blocking again
                    let _ = self.backend().wake();
                }
            }
        }
    }

    /// Run callbacks queued for this group's dispatcher loops
    pub(crate) fn run_queued(&self) {
        while let Some(completion) = self.tasks.pop() {
            handler::invoke(&self.counters, self.id, completion);
        }
    }

    pub(crate) fn has_queued(&self) -> bool {
        !self.tasks.is_empty()
    }
}

/// Clear the pending bit as the callback is entered
fn release_on_entry(core: &Arc<ChannelCore>, kind: OpKind, completion: Completion) -> Completion {
    let core = Arc::clone(core);
    Box::new(move || {
        core.release(kind);
        completion()
    })
}
