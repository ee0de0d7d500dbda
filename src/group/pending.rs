/*!
 * Pending Operation Table
 *
 * Every admitted operation that could not finish immediately lives here until
 * it is claimed by the dispatcher, expires, is cancelled or its channel closes.
 * Removal from the table is the single claim point: whoever removes an entry
 * owns its callback.
 *
 * `in_flight` counts operations taken out of the table (or not yet parked)
 * whose callback has not been handed off. Shutdown waits for both the table
 * and this count to reach zero.
 */

use crate::channel::Operation;
use crate::core::types::{ChannelId, OpId, OpKind};
use ahash::RandomState;
use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

pub(crate) struct PendingOperation {
    pub id: OpId,
    pub channel: ChannelId,
    pub kind: OpKind,
    pub deadline: Option<Instant>,
    pub op: Box<dyn Operation>,
}

pub(crate) struct PendingTable {
    ops: HashMap<OpId, PendingOperation, RandomState>,
    deadlines: BTreeSet<(Instant, OpId)>,
    in_flight: usize,
}

impl PendingTable {
    pub fn new() -> Self {
        Self {
            ops: HashMap::with_hasher(RandomState::new()),
            deadlines: BTreeSet::new(),
            in_flight: 0,
        }
    }

    /// Park an operation; returns true when its deadline is now the soonest
    pub fn insert(&mut self, pending: PendingOperation) -> bool {
        let mut soonest = false;
        if let Some(deadline) = pending.deadline {
            soonest = self
                .deadlines
                .first()
                .map_or(true, |(first, _)| deadline < *first);
            self.deadlines.insert((deadline, pending.id));
        }
        self.ops.insert(pending.id, pending);
        soonest
    }

    pub fn remove(&mut self, id: OpId) -> Option<PendingOperation> {
        let pending = self.ops.remove(&id)?;
        if let Some(deadline) = pending.deadline {
            self.deadlines.remove(&(deadline, id));
        }
        Some(pending)
    }

    /// Remove every operation whose deadline is at or before `now`
    pub fn expire(&mut self, now: Instant) -> Vec<PendingOperation> {
        let mut expired = Vec::new();
        while let Some(&(deadline, id)) = self.deadlines.first() {
            if deadline > now {
                break;
            }
            self.deadlines.pop_first();
            if let Some(pending) = self.ops.remove(&id) {
                expired.push(pending);
            }
        }
        expired
    }

    pub fn drain(&mut self) -> Vec<PendingOperation> {
        self.deadlines.clear();
        self.ops.drain().map(|(_, p)| p).collect()
    }

    pub fn drain_channel(&mut self, channel: ChannelId) -> Vec<PendingOperation> {
        let ids: Vec<OpId> = self
            .ops
            .values()
            .filter(|p| p.channel == channel)
            .map(|p| p.id)
            .collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.first().map(|(deadline, _)| *deadline)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn begin_flight(&mut self) {
        self.in_flight += 1;
    }

    pub fn end_flight(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// No parked operations and none in flight
    pub fn is_drained(&self) -> bool {
        self.ops.is_empty() && self.in_flight == 0
    }
}
