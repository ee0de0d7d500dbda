/*!
 * Channel Groups
 *
 * A group binds one worker pool to a cohort of channels. It owns the pending
 * operation table, a completion backend and the lifecycle:
 *
 * ```text
 * OPEN --shutdown()--> SHUTTING_DOWN --table drained--> TERMINATED
 *   \______________shutdown_now()_________________________/
 * ```
 *
 * Dispatcher loops run as tasks on the group's pool. Once the group is
 * terminated the loops exit and the last one releases the pool: an exclusive
 * pool is shut down, a shared one is only detached.
 */

mod ops;
mod pending;
mod state;

pub use state::GroupState;

pub(crate) use pending::{PendingOperation, PendingTable};

use crate::channel::{ChannelCore, Completion};
use crate::core::limits::CACHED_DISPATCH_LOOPS;
use crate::core::types::{ChannelId, GroupId, ProviderId};
use crate::core::{CompletionError, GroupError, GroupResult};
use crate::dispatch;
use crate::dispatch::backend::{self, CompletionBackend};
use crate::monitoring::{GroupCounters, GroupStats};
use crate::pool::{PoolKind, WorkerPool};
use crate::provider::BackendKind;
use ahash::RandomState;
use crossbeam_queue::SegQueue;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use state::{AtomicGroupState, Settlement};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub(crate) struct GroupInner {
    id: GroupId,
    provider: ProviderId,
    pool: WorkerPool,
    exclusive_pool: bool,
    backend: Box<dyn CompletionBackend>,
    state: AtomicGroupState,
    table: Mutex<PendingTable>,
    drained: Condvar,
    channels: DashMap<ChannelId, Arc<ChannelCore>, RandomState>,
    /// Completions waiting for a dispatcher loop (fixed pools only)
    tasks: SegQueue<Completion>,
    loops: usize,
    active_loops: AtomicUsize,
    stop: AtomicBool,
    settlement: Arc<Settlement>,
    counters: Arc<GroupCounters>,
}

impl GroupInner {
    /// Build a group on `pool` and start its dispatcher loops
    pub(crate) fn open(
        provider: ProviderId,
        pool: WorkerPool,
        exclusive_pool: bool,
        backend_kind: BackendKind,
    ) -> GroupResult<Arc<Self>> {
        let backend = match backend::open(backend_kind) {
            Ok(b) => b,
            Err(e) => {
                if exclusive_pool {
                    pool.shutdown();
                }
                return Err(e);
            }
        };
        if let Err(e) = pool.attach() {
            if exclusive_pool {
                pool.shutdown();
            }
            return Err(e);
        }

        let loops = match pool.kind() {
            PoolKind::Fixed => pool.size(),
            PoolKind::Cached => CACHED_DISPATCH_LOOPS,
        };

        let group = Arc::new(Self {
            id: GroupId::next(),
            provider,
            pool,
            exclusive_pool,
            backend,
            state: AtomicGroupState::new(GroupState::Open),
            table: Mutex::new(PendingTable::new()),
            drained: Condvar::new(),
            channels: DashMap::with_hasher(RandomState::new()),
            tasks: SegQueue::new(),
            loops,
            active_loops: AtomicUsize::new(0),
            stop: AtomicBool::new(false),
            settlement: Arc::new(Settlement::default()),
            counters: Arc::new(GroupCounters::default()),
        });

        for _ in 0..loops {
            group.active_loops.fetch_add(1, Ordering::SeqCst);
            let runner = Arc::clone(&group);
            if let Err(e) = group.pool.execute(move || dispatch::run(runner)) {
                group.active_loops.fetch_sub(1, Ordering::SeqCst);
                group.state.terminate();
                group.begin_stop();
                if group.active_loops.load(Ordering::SeqCst) == 0 {
                    group.release_pool();
                }
                return Err(e);
            }
        }

        info!(
            group = %group.id,
            pool = %group.pool.id(),
            kind = %group.pool.kind(),
            exclusive = exclusive_pool,
            loops = loops,
            backend = group.backend.name(),
            "Channel group opened"
        );

        Ok(group)
    }

    #[inline]
    pub(crate) fn id(&self) -> GroupId {
        self.id
    }

    #[inline]
    pub(crate) fn backend(&self) -> &dyn CompletionBackend {
        self.backend.as_ref()
    }

    #[inline]
    pub(crate) fn state(&self) -> GroupState {
        self.state.load()
    }

    pub(crate) fn counters(&self) -> &GroupCounters {
        &self.counters
    }

    pub(crate) fn channel(&self, id: ChannelId) -> Option<Arc<ChannelCore>> {
        self.channels.get(&id).map(|c| Arc::clone(c.value()))
    }

    /// Add a channel to the group
    ///
    /// User-opened channels need an open group. Channels produced by an
    /// accept that was pending before `shutdown` are still admitted.
    pub(crate) fn register_channel(&self, core: &Arc<ChannelCore>, accepted: bool) -> GroupResult<()> {
        let admissible = |state| match state {
            GroupState::Open => true,
            GroupState::ShuttingDown => accepted,
            GroupState::Terminated => false,
        };
        if !admissible(self.state()) {
            return Err(GroupError::GroupShutdown);
        }
        self.channels.insert(core.id(), Arc::clone(core));

        // shutdown_now may have swept the member set in between
        if self.state() == GroupState::Terminated {
            self.channels.remove(&core.id());
            return Err(GroupError::GroupShutdown);
        }
        debug!(group = %self.id, channel = %core.id(), accepted = accepted, "Channel joined group");
        Ok(())
    }

    /// Fail parked operations of a closing channel and forget it
    pub(crate) fn close_channel(self: &Arc<Self>, core: &ChannelCore) {
        let closed = {
            let mut table = self.table.lock();
            let drained = table.drain_channel(core.id());
            for p in &drained {
                core.clear_slot(p.kind, p.id);
                table.begin_flight();
            }
            drained
        };
        self.channels.remove(&core.id());

        for p in closed {
            GroupCounters::bump(&self.counters.closed);
            self.fail_claimed(core, p, CompletionError::Closed);
        }
        self.maybe_terminate();
    }

    /// SHUTTING_DOWN -> TERMINATED once nothing is pending or in flight
    pub(crate) fn maybe_terminate(&self) {
        if self.state() != GroupState::ShuttingDown {
            return;
        }
        let table = self.table.lock();
        if table.is_drained() && self.state.transition(GroupState::ShuttingDown, GroupState::Terminated) {
            drop(table);
            info!(group = %self.id, "Channel group terminated");
            self.begin_stop();
        }
    }

    pub(crate) fn shutdown(&self) {
        if self.state.transition(GroupState::Open, GroupState::ShuttingDown) {
            info!(
                group = %self.id,
                pending = self.table.lock().len(),
                "Channel group shutting down"
            );
        }
        self.maybe_terminate();
    }

    pub(crate) fn shutdown_now(self: &Arc<Self>) {
        let previous = self.state.terminate();

        let cancelled = {
            let mut table = self.table.lock();
            let drained = table.drain();
            // Claimed operations finish their attempt and hand off first
            while table.in_flight() > 0 {
                self.drained.wait(&mut table);
            }
            for _ in &drained {
                table.begin_flight();
            }
            drained
        };

        if previous != GroupState::Terminated || !cancelled.is_empty() {
            info!(
                group = %self.id,
                cancelled = cancelled.len(),
                channels = self.channels.len(),
                "Channel group shut down immediately"
            );
        }

        for p in cancelled {
            match self.channel(p.channel) {
                Some(core) => {
                    core.clear_slot(p.kind, p.id);
                    GroupCounters::bump(&self.counters.cancelled);
                    self.fail_claimed(&core, p, CompletionError::Cancelled);
                }
                None => {
                    GroupCounters::bump(&self.counters.cancelled);
                    self.deliver(p.op.fail(CompletionError::Cancelled));
                    self.end_flight();
                }
            }
        }

        let members: Vec<Arc<ChannelCore>> =
            self.channels.iter().map(|c| Arc::clone(c.value())).collect();
        for core in members {
            core.close();
        }

        self.begin_stop();
    }

    /// Tell every dispatcher loop to exit once its queue is empty
    fn begin_stop(&self) {
        if self.stop.swap(true, Ordering::SeqCst) {
            return;
        }
        for _ in 0..self.loops {
            if let Err(e) = self.backend.wake() {
                warn!(group = %self.id, error = %e, "Failed to wake dispatcher loop");
            }
        }
    }

    #[inline]
    pub(crate) fn stopping(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Called by each dispatcher loop on exit
    pub(crate) fn loop_exited(&self) {
        if self.active_loops.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.release_pool();
        }
    }

    fn release_pool(&self) {
        let remaining = self.pool.detach();
        if self.exclusive_pool {
            self.pool.shutdown();
        }
        info!(
            group = %self.id,
            pool = %self.pool.id(),
            exclusive = self.exclusive_pool,
            groups_remaining = remaining,
            "Worker pool released"
        );

        self.settlement.release_pool();
    }

    pub(crate) fn await_termination(&self, timeout: Duration) -> bool {
        if self.pool.is_current_thread_worker() {
            warn!(group = %self.id, "await_termination called from the group's own pool thread");
        }
        self.settlement.wait(timeout)
    }

    pub(crate) fn stats(&self) -> GroupStats {
        GroupStats::from_counters(
            self.id,
            self.state(),
            self.channels.len(),
            self.table.lock().len(),
            &self.counters,
        )
    }
}

/// Handle to a channel group
///
/// Cloning is cheap; every clone refers to the same group.
#[derive(Clone)]
pub struct ChannelGroup {
    pub(crate) inner: Arc<GroupInner>,
}

impl ChannelGroup {
    pub(crate) fn from_inner(inner: Arc<GroupInner>) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> GroupId {
        self.inner.id
    }

    pub(crate) fn provider_id(&self) -> ProviderId {
        self.inner.provider
    }

    pub fn state(&self) -> GroupState {
        self.inner.state()
    }

    /// True once `shutdown` or `shutdown_now` has been called
    pub fn is_shutdown(&self) -> bool {
        self.inner.state() != GroupState::Open
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.state() == GroupState::Terminated
    }

    /// Operations parked in the pending table
    pub fn pending_count(&self) -> usize {
        self.inner.table.lock().len()
    }

    pub fn channel_count(&self) -> usize {
        self.inner.channels.len()
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.inner.pool
    }

    /// Stop accepting channels and operations; pending ones still complete
    ///
    /// Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Cancel every pending operation, close member channels and terminate
    ///
    /// Each cancelled callback receives `CompletionError::Cancelled` exactly
    /// once. The pending table is empty when this returns.
    pub fn shutdown_now(&self) {
        self.inner.shutdown_now();
    }

    /// Wait until the group is terminated, its pool released and every
    /// callback already handed to the pool has returned
    ///
    /// Returns false if `timeout` elapsed first. Called from one of the
    /// group's own callbacks it can only time out.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        self.inner.await_termination(timeout)
    }

    pub fn stats(&self) -> GroupStats {
        self.inner.stats()
    }
}

impl fmt::Debug for ChannelGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelGroup")
            .field("id", &self.inner.id)
            .field("state", &self.inner.state())
            .field("pool", &self.inner.pool.id())
            .finish()
    }
}

impl PartialEq for ChannelGroup {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ChannelGroup {}
