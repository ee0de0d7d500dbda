/*!
 * Worker Pools
 *
 * Threads that execute dispatcher loops and completion handlers.
 *
 * - **Fixed**: exactly `size` threads, spawned up front, alive until shutdown
 * - **Cached**: threads spawned on demand whenever queued work outnumbers idle
 *   threads; threads idle longer than the keep-alive retire
 *
 * Pools are cheap `Clone` handles. A cached pool may serve several groups;
 * groups attach and detach so the pool can report who still uses it.
 */

mod worker;

use crate::core::limits::{CACHED_KEEP_ALIVE, CPU_COUNT_HINT, DEFAULT_THREAD_NAME_PREFIX};
use crate::core::types::PoolId;
use crate::core::{GroupError, GroupResult};
use crate::monitoring::PoolStats;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info};

pub use worker::current_pool;

/// Unit of work run by a pool thread
pub(crate) type Task = Box<dyn FnOnce() + Send + 'static>;

/// Thread pool flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    Fixed,
    Cached,
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolKind::Fixed => f.write_str("fixed"),
            PoolKind::Cached => f.write_str("cached"),
        }
    }
}

/// Pool construction parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub kind: PoolKind,
    /// Thread count for fixed pools, initial hint for cached pools
    /// (negative means the number of CPUs)
    pub size: isize,
    pub thread_name_prefix: String,
    pub keep_alive: Duration,
}

impl PoolConfig {
    pub fn fixed(size: isize) -> Self {
        Self {
            kind: PoolKind::Fixed,
            size,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
            keep_alive: CACHED_KEEP_ALIVE,
        }
    }

    pub fn cached(initial_size: isize) -> Self {
        Self {
            kind: PoolKind::Cached,
            size: initial_size,
            ..Self::fixed(0)
        }
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Resolve the effective thread count, rejecting invalid sizes
    pub fn resolved_size(&self) -> GroupResult<usize> {
        match self.kind {
            PoolKind::Fixed if self.size <= 0 => Err(GroupError::InvalidConfiguration(format!(
                "fixed pool size must be > 0, got {}",
                self.size
            ))),
            PoolKind::Fixed => Ok(self.size as usize),
            PoolKind::Cached if self.size < 0 => {
                if self.size != CPU_COUNT_HINT {
                    debug!(hint = self.size, "Negative cached pool hint, using CPU count");
                }
                Ok(thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1))
            }
            PoolKind::Cached => Ok(self.size as usize),
        }
    }
}

pub(crate) struct PoolInner {
    id: PoolId,
    kind: PoolKind,
    size: usize,
    thread_name_prefix: String,
    keep_alive: Duration,
    sender: Mutex<Option<flume::Sender<Task>>>,
    receiver: flume::Receiver<Task>,
    live: AtomicUsize,
    idle: AtomicUsize,
    thread_seq: AtomicUsize,
    attached: AtomicUsize,
    executed: AtomicU64,
    panics: AtomicU64,
}

/// Handle to a worker pool
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Create a pool from a configuration
    pub fn new(config: PoolConfig) -> GroupResult<Self> {
        let size = config.resolved_size()?;
        let (sender, receiver) = flume::unbounded();

        let inner = Arc::new(PoolInner {
            id: PoolId::next(),
            kind: config.kind,
            size,
            thread_name_prefix: config.thread_name_prefix,
            keep_alive: config.keep_alive,
            sender: Mutex::new(Some(sender)),
            receiver,
            live: AtomicUsize::new(0),
            idle: AtomicUsize::new(0),
            thread_seq: AtomicUsize::new(0),
            attached: AtomicUsize::new(0),
            executed: AtomicU64::new(0),
            panics: AtomicU64::new(0),
        });

        for _ in 0..size {
            if let Err(e) = PoolInner::spawn_worker(&inner) {
                inner.sender.lock().take();
                return Err(e.into());
            }
        }

        info!(
            pool = %inner.id,
            kind = %inner.kind,
            size = size,
            "Worker pool created"
        );

        Ok(Self { inner })
    }

    /// Fixed pool with exactly `size` threads
    pub fn fixed(size: isize) -> GroupResult<Self> {
        Self::new(PoolConfig::fixed(size))
    }

    /// Cached pool starting with `initial_size` threads
    pub fn cached(initial_size: isize) -> GroupResult<Self> {
        Self::new(PoolConfig::cached(initial_size))
    }

    pub fn id(&self) -> PoolId {
        self.inner.id
    }

    pub fn kind(&self) -> PoolKind {
        self.inner.kind
    }

    /// Configured size (thread count for fixed pools, initial hint for cached)
    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Queue a task for execution on a pool thread
    pub fn execute<F>(&self, task: F) -> GroupResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.execute_boxed(Box::new(task))
    }

    pub(crate) fn execute_boxed(&self, task: Task) -> GroupResult<()> {
        self.submit(task).map_err(|_| GroupError::PoolShutdown)
    }

    /// Queue a task, handing it back if the pool no longer accepts work
    pub(crate) fn submit(&self, task: Task) -> Result<(), Task> {
        let Some(sender) = self.inner.sender.lock().clone() else {
            return Err(task);
        };
        sender.send(task).map_err(|e| e.into_inner())?;

        if self.inner.kind == PoolKind::Cached
            && self.inner.receiver.len() > self.inner.idle.load(Ordering::SeqCst)
        {
            // The task stays queued for the next thread that comes up
            if let Err(e) = PoolInner::spawn_worker(&self.inner) {
                error!(
                    pool = %self.inner.id,
                    live = self.inner.live.load(Ordering::SeqCst),
                    error = %e,
                    "Failed to grow cached pool"
                );
            }
        }

        Ok(())
    }

    /// Stop accepting tasks; threads exit once the queue is drained
    ///
    /// Idempotent.
    pub fn shutdown(&self) {
        if self.inner.sender.lock().take().is_some() {
            info!(
                pool = %self.inner.id,
                live = self.inner.live.load(Ordering::Relaxed),
                "Worker pool shutting down"
            );
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.sender.lock().is_none()
    }

    /// Threads currently alive
    pub fn live_threads(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Threads currently waiting for work
    pub fn idle_threads(&self) -> usize {
        self.inner.idle.load(Ordering::SeqCst)
    }

    /// Groups currently bound to this pool
    pub fn attached_groups(&self) -> usize {
        self.inner.attached.load(Ordering::SeqCst)
    }

    /// True when called from one of this pool's threads
    pub fn is_current_thread_worker(&self) -> bool {
        current_pool() == Some(self.inner.id)
    }

    /// Bind a group to this pool
    ///
    /// A fixed pool runs one dispatcher loop per thread for its group, so it
    /// can only serve one live group at a time.
    pub(crate) fn attach(&self) -> GroupResult<()> {
        if self.is_shutdown() {
            return Err(GroupError::PoolShutdown);
        }
        match self.inner.kind {
            PoolKind::Fixed => self
                .inner
                .attached
                .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
                .map(|_| ())
                .map_err(|_| {
                    GroupError::InvalidConfiguration(format!(
                        "fixed pool {} already serves a group",
                        self.inner.id
                    ))
                }),
            PoolKind::Cached => {
                self.inner.attached.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    /// Unbind a group; returns the number of groups still attached
    pub(crate) fn detach(&self) -> usize {
        let prev = self
            .inner
            .attached
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or(0);
        prev.saturating_sub(1)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            id: self.inner.id,
            kind: self.inner.kind,
            size: self.inner.size,
            live_threads: self.live_threads(),
            idle_threads: self.idle_threads(),
            attached_groups: self.attached_groups(),
            tasks_executed: self.inner.executed.load(Ordering::Relaxed),
            task_panics: self.inner.panics.load(Ordering::Relaxed),
            shutdown: self.is_shutdown(),
        }
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("size", &self.inner.size)
            .field("live", &self.live_threads())
            .finish()
    }
}

impl PoolInner {
    fn spawn_worker(inner: &Arc<PoolInner>) -> std::io::Result<()> {
        let seq = inner.thread_seq.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{}-{}", inner.thread_name_prefix, inner.id.0, seq);

        inner.live.fetch_add(1, Ordering::SeqCst);
        let pool = Arc::clone(inner);
        match thread::Builder::new()
            .name(name)
            .spawn(move || worker::run(pool))
        {
            Ok(_) => Ok(()),
            Err(e) => {
                inner.live.fetch_sub(1, Ordering::SeqCst);
                Err(e)
            }
        }
    }
}
