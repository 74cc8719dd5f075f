//! Backoff timers for scheduled retries
//!
//! While its timer runs a retry is owned here, not by the queue, so shutdown
//! can find it and decide whether it gets a last attempt.

use std::{collections::HashMap, sync::Arc, time::Duration};

use formflow_common::DispatchId;
use parking_lot::Mutex;
use tokio::{task::AbortHandle, time::Instant};

use super::Orchestrator;
use crate::types::WorkItem;

#[derive(Debug)]
struct ScheduledRetry {
    item: WorkItem,
    due: Instant,
    timer: AbortHandle,
}

#[derive(Debug, Default)]
pub(super) struct RetryScheduler {
    waiting: Mutex<HashMap<DispatchId, ScheduledRetry>>,
}

impl RetryScheduler {
    fn take(&self, id: DispatchId) -> Option<WorkItem> {
        self.waiting.lock().remove(&id).map(|retry| retry.item)
    }

    pub(super) fn len(&self) -> usize {
        self.waiting.lock().len()
    }

    /// Stop every timer and hand back the waiting items, earliest due first.
    pub(super) fn cancel_all(&self) -> Vec<WorkItem> {
        let mut retries = self
            .waiting
            .lock()
            .drain()
            .map(|(_, retry)| retry)
            .collect::<Vec<_>>();

        retries.sort_by_key(|retry| retry.due);
        retries
            .into_iter()
            .map(|retry| {
                retry.timer.abort();
                retry.item
            })
            .collect()
    }
}

impl Orchestrator {
    /// Re-enqueue `item` once `delay` has elapsed.
    pub(super) fn schedule(self: &Arc<Self>, item: WorkItem, delay: Duration) {
        let id = item.id;
        let mut waiting = self.scheduler.waiting.lock();

        let this = Arc::clone(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(item) = this.scheduler.take(id) {
                this.requeue(item);
            }
        });

        waiting.insert(
            id,
            ScheduledRetry {
                item,
                due: Instant::now() + delay,
                timer: timer.abort_handle(),
            },
        );
    }
}
