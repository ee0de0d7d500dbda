/*!
 * Group Lifecycle State
 * OPEN -> SHUTTING_DOWN -> TERMINATED, stored in a single atomic byte, plus
 * the settlement a terminated group waits for before it reports done
 */

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupState {
    Open,
    ShuttingDown,
    Terminated,
}

impl GroupState {
    const fn as_u8(self) -> u8 {
        match self {
            GroupState::Open => 0,
            GroupState::ShuttingDown => 1,
            GroupState::Terminated => 2,
        }
    }

    const fn from_u8(v: u8) -> Self {
        match v {
            0 => GroupState::Open,
            1 => GroupState::ShuttingDown,
            _ => GroupState::Terminated,
        }
    }
}

impl fmt::Display for GroupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupState::Open => f.write_str("open"),
            GroupState::ShuttingDown => f.write_str("shutting_down"),
            GroupState::Terminated => f.write_str("terminated"),
        }
    }
}

/// Atomic cell holding a `GroupState`
///
/// Transitions only move forward.
pub(crate) struct AtomicGroupState(AtomicU8);

impl AtomicGroupState {
    pub fn new(state: GroupState) -> Self {
        Self(AtomicU8::new(state.as_u8()))
    }

    #[inline]
    pub fn load(&self) -> GroupState {
        GroupState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`; false if the state was not `from`
    pub fn transition(&self, from: GroupState, to: GroupState) -> bool {
        self.0
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Force the terminal state, returning the previous one
    pub fn terminate(&self) -> GroupState {
        GroupState::from_u8(self.0.swap(GroupState::Terminated.as_u8(), Ordering::AcqRel))
    }
}

#[derive(Debug, Default)]
struct Settling {
    pool_released: bool,
    callbacks: usize,
}

/// Pool release plus the callbacks handed to a pool and not yet returned
#[derive(Debug, Default)]
pub(crate) struct Settlement {
    state: Mutex<Settling>,
    settled: Condvar,
}

impl Settlement {
    pub fn release_pool(&self) {
        let mut state = self.state.lock();
        state.pool_released = true;
        self.settled.notify_all();
    }

    /// Count a callback until the returned guard is dropped
    pub fn track(self: &Arc<Self>) -> OutstandingCallback {
        self.state.lock().callbacks += 1;
        OutstandingCallback(Arc::clone(self))
    }

    /// Wait for the pool release and the last tracked callback
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        while !(state.pool_released && state.callbacks == 0) {
            match deadline {
                Some(deadline) => {
                    if self.settled.wait_until(&mut state, deadline).timed_out() {
                        return state.pool_released && state.callbacks == 0;
                    }
                }
                None => self.settled.wait(&mut state),
            }
        }
        true
    }
}

/// Held by a callback task; dropping it, run or not, settles the callback
pub(crate) struct OutstandingCallback(Arc<Settlement>);

impl Drop for OutstandingCallback {
    fn drop(&mut self) {
        let mut state = self.0.state.lock();
        state.callbacks -= 1;
        if state.callbacks == 0 {
            self.0.settled.notify_all();
        }
    }
}
