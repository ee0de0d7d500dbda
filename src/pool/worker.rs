/*!
 * Pool Worker Thread
 * Task loop run by every pool thread
 */

use super::{PoolInner, PoolKind, Task};
use crate::core::types::PoolId;
use flume::RecvTimeoutError;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, trace};

thread_local! {
    static CURRENT_POOL: Cell<Option<PoolId>> = const { Cell::new(None) };
}

/// Pool owning the calling thread, `None` outside any worker pool
pub fn current_pool() -> Option<PoolId> {
    CURRENT_POOL.with(|c| c.get())
}

pub(super) fn run(pool: Arc<PoolInner>) {
    CURRENT_POOL.with(|c| c.set(Some(pool.id)));
    trace!(pool = %pool.id, "Worker started");

    loop {
        pool.idle.fetch_add(1, Ordering::SeqCst);
        let next = match pool.kind {
            PoolKind::Fixed => pool
                .receiver
                .recv()
                .map_err(|_| RecvTimeoutError::Disconnected),
            PoolKind::Cached => pool.receiver.recv_timeout(pool.keep_alive),
        };
        pool.idle.fetch_sub(1, Ordering::SeqCst);

        match next {
            Ok(task) => run_task(&pool, task),
            Err(RecvTimeoutError::Timeout) => {
                // A submitter may have counted us as idle before we gave up
                if !pool.receiver.is_empty() {
                    continue;
                }
                trace!(pool = %pool.id, "Idle worker retiring");
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    pool.live.fetch_sub(1, Ordering::SeqCst);
    CURRENT_POOL.with(|c| c.set(None));
    trace!(pool = %pool.id, "Worker exited");
}

fn run_task(pool: &PoolInner, task: Task) {
    if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
        pool.panics.fetch_add(1, Ordering::Relaxed);
        error!(pool = %pool.id, "Pool task panicked; worker continues");
    }
    pool.executed.fetch_add(1, Ordering::Relaxed);
}
