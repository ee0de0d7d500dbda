/*!
 * Completion Dispatcher
 *
 * Each group runs one or more dispatcher loops as tasks on its pool. A loop:
 *
 * 1. runs callbacks queued for the group (fixed pools)
 * 2. waits on the backend until readiness, a wake-up or the soonest deadline
 * 3. claims and retries the operations made ready
 * 4. expires overdue operations
 *
 * Loops exit once the group is terminated and their queue is empty.
 */

pub(crate) mod backend;
pub(crate) mod handler;

use crate::core::limits::{BACKEND_ERROR_BACKOFF, EVENT_BATCH_CAPACITY, IDLE_WAIT_CAP};
use crate::core::timeout::wait_millis;
use crate::core::types::{ChannelId, OpKind};
use crate::group::GroupInner;
use crate::monitoring::GroupCounters;
use backend::Event;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, error, trace};

/// Dispatcher loop body, run on a pool thread
pub(crate) fn run(group: Arc<GroupInner>) {
    let current = thread::current();
    debug!(group = %group.id(), thread = current.name(), "Dispatcher loop started");
    let mut events: Vec<Event> = Vec::with_capacity(EVENT_BATCH_CAPACITY);

    loop {
        group.run_queued();

        if group.stopping() {
            if group.has_queued() {
                continue;
            }
            break;
        }

        let now = Instant::now();
        let cap = now + IDLE_WAIT_CAP;
        let until = group.next_deadline().map_or(cap, |d| d.min(cap));
        let timeout = wait_millis(Some(until), now);

        match group.backend().wait(&mut events, timeout) {
            Ok(()) => {
                for event in events.drain(..) {
                    dispatch_event(&group, event);
                }
            }
            Err(e) => {
                error!(group = %group.id(), error = %e, "Backend wait failed");
                thread::sleep(BACKEND_ERROR_BACKOFF);
            }
        }

        group.expire_overdue();
    }

    debug!(group = %group.id(), "Dispatcher loop exiting");
    group.loop_exited();
}

fn dispatch_event(group: &Arc<GroupInner>, event: Event) {
    let channel = ChannelId(event.token);
    let Some(core) = group.channel(channel) else {
        GroupCounters::bump(&group.counters().late_discarded);
        trace!(group = %group.id(), channel = %channel, "Readiness for unknown channel discarded");
        return;
    };

    let mut claimed = 0usize;
    for kind in OpKind::ALL {
        let ready = if kind.interest().is_readable() {
            event.readable
        } else {
            event.writable
        };
        if !ready {
            continue;
        }
        if let Some(pending) = group.claim(&core, kind) {
            trace!(group = %group.id(), channel = %channel, kind = %kind, "Operation ready");
            claimed += 1;
            group.resume(&core, pending);
        }
    }

    if claimed == 0 {
        GroupCounters::bump(&group.counters().late_discarded);
        trace!(group = %group.id(), channel = %channel, "Readiness with nothing pending discarded");
    }

    // One-shot registration: arm again for whatever is still parked
    core.rearm(group.backend());
}
