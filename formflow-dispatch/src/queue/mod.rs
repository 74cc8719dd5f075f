//! Dispatch queue management

pub mod retry;

use std::collections::{HashSet, VecDeque};

use formflow_common::DispatchId;
use parking_lot::Mutex;

use crate::types::{WorkItem, WorkKey};

#[derive(Debug, Default)]
struct QueueState {
    /// Descending priority; equal priorities keep insertion order.
    pending: VecDeque<WorkItem>,
    in_flight: HashSet<WorkKey>,
}

/// Queue and in-flight counts read under one lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub queue_length: usize,
    pub in_flight: usize,
}

/// Priority-ordered queue of pending work plus the set of claimed items
///
/// Both halves sit behind one lock so that claiming an item and marking it in
/// flight happen together.
#[derive(Debug, Default)]
pub struct DispatchQueue {
    state: Mutex<QueueState>,
}

impl DispatchQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert before the first item with a strictly lower priority, so it
    /// lands behind every item of the same or higher urgency.
    pub fn enqueue(&self, item: WorkItem) {
        let mut state = self.state.lock();
        let position = state
            .pending
            .iter()
            .position(|queued| queued.priority < item.priority)
            .unwrap_or(state.pending.len());
        state.pending.insert(position, item);
    }

    /// Take the most urgent item and mark it in flight.
    pub fn claim_next(&self) -> Option<WorkItem> {
        self.claim_next_within(usize::MAX)
    }

    /// Like [`claim_next`](Self::claim_next), but only while fewer than
    /// `limit` items are in flight.
    pub fn claim_next_within(&self, limit: usize) -> Option<WorkItem> {
        let mut state = self.state.lock();
        if state.in_flight.len() >= limit {
            return None;
        }

        let item = state.pending.pop_front()?;
        state.in_flight.insert(item.key());
        Some(item)
    }

    /// Returns `true` if the key was in flight.
    pub fn complete(&self, key: WorkKey) -> bool {
        self.state.lock().in_flight.remove(&key)
    }

    /// Remove and return every pending item, most urgent first.
    pub fn drain(&self) -> Vec<WorkItem> {
        self.state.lock().pending.drain(..).collect()
    }

    /// Pending ids with their priorities, in service order.
    pub fn snapshot(&self) -> Vec<(DispatchId, u32)> {
        self.state
            .lock()
            .pending
            .iter()
            .map(|item| (item.id, item.priority))
            .collect()
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            queue_length: state.pending.len(),
            in_flight: state.in_flight.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().pending.is_empty()
    }

    pub fn in_flight_count(&self) -> usize {
        self.state.lock().in_flight.len()
    }
}
