/*!
 * Group and Pool Statistics
 * Lock-free counters with serializable snapshots
 */

use crate::core::types::{GroupId, PoolId};
use crate::group::GroupState;
use crate::pool::PoolKind;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-group counters
///
/// Cache-line aligned to prevent false sharing with the group's hot fields
#[repr(C, align(64))]
#[derive(Default)]
pub(crate) struct GroupCounters {
    pub issued: AtomicU64,
    pub completed: AtomicU64,
    pub timed_out: AtomicU64,
    pub cancelled: AtomicU64,
    pub closed: AtomicU64,
    pub late_discarded: AtomicU64,
    pub handler_errors: AtomicU64,
    pub handler_panics: AtomicU64,
}

impl GroupCounters {
    #[inline]
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of a group's counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupStats {
    pub id: GroupId,
    pub state: GroupState,
    pub channels: usize,
    pub pending: usize,
    pub issued: u64,
    pub completed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub closed: u64,
    pub late_discarded: u64,
    pub handler_errors: u64,
    pub handler_panics: u64,
}

impl GroupStats {
    pub(crate) fn from_counters(
        id: GroupId,
        state: GroupState,
        channels: usize,
        pending: usize,
        c: &GroupCounters,
    ) -> Self {
        Self {
            id,
            state,
            channels,
            pending,
            issued: c.issued.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            timed_out: c.timed_out.load(Ordering::Relaxed),
            cancelled: c.cancelled.load(Ordering::Relaxed),
            closed: c.closed.load(Ordering::Relaxed),
            late_discarded: c.late_discarded.load(Ordering::Relaxed),
            handler_errors: c.handler_errors.load(Ordering::Relaxed),
            handler_panics: c.handler_panics.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of a worker pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub id: PoolId,
    pub kind: PoolKind,
    pub size: usize,
    pub live_threads: usize,
    pub idle_threads: usize,
    pub attached_groups: usize,
    pub tasks_executed: u64,
    pub task_panics: u64,
    pub shutdown: bool,
}
