//! Fixed-size worker pool
//!
//! A worker slot is claimed by taking a [`SlotToken`]. The token holds a
//! semaphore permit and the slot's index; dropping it marks the slot idle on
//! every exit path, including early returns and cancellation.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::{
    error::{DispatchError, SystemError},
    policy::{Pipeline, PipelineOutcome},
    types::WorkItem,
};

#[derive(Debug)]
struct SlotTable {
    busy: Vec<AtomicBool>,
    idle: Mutex<Vec<usize>>,
}

impl SlotTable {
    fn new(size: usize) -> Self {
        Self {
            busy: (0..size).map(|_| AtomicBool::new(false)).collect(),
            idle: Mutex::new((0..size).rev().collect()),
        }
    }
}

/// A claimed worker slot, released on drop.
#[derive(Debug)]
pub struct SlotToken {
    slot: usize,
    table: Arc<SlotTable>,
    _permit: OwnedSemaphorePermit,
}

impl SlotToken {
    #[must_use]
    pub const fn slot(&self) -> usize {
        self.slot
    }
}

impl Drop for SlotToken {
    fn drop(&mut self) {
        self.table.busy[self.slot].store(false, Ordering::Release);
        self.table.idle.lock().push(self.slot);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    pub busy: usize,
    pub available: usize,
}

pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    table: Arc<SlotTable>,
    pipeline: Arc<Pipeline>,
}

impl WorkerPool {
    #[must_use]
    pub fn new(size: usize, pipeline: Arc<Pipeline>) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            table: Arc::new(SlotTable::new(size)),
            pipeline,
        }
    }

    fn claim(&self, permit: OwnedSemaphorePermit) -> Option<SlotToken> {
        let slot = self.table.idle.lock().pop()?;
        self.table.busy[slot].store(true, Ordering::Release);

        Some(SlotToken {
            slot,
            table: Arc::clone(&self.table),
            _permit: permit,
        })
    }

    /// Claim an idle slot without waiting.
    pub fn try_acquire(&self) -> Option<SlotToken> {
        let permit = Arc::clone(&self.semaphore).try_acquire_owned().ok()?;
        self.claim(permit)
    }

    /// Wait for an idle slot.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::ShuttingDown`] once the pool is closed.
    pub async fn acquire(&self) -> Result<SlotToken, DispatchError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| SystemError::ShuttingDown)?;

        self.claim(permit)
            .ok_or_else(|| SystemError::Internal("permit granted without an idle slot".to_string()).into())
    }

    /// Run `item` on an idle slot.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::NoAvailableWorker`] if every slot is busy.
    pub async fn process(&self, item: &WorkItem) -> Result<PipelineOutcome, DispatchError> {
        let token = self.try_acquire().ok_or(SystemError::NoAvailableWorker)?;
        Ok(self.run(token, item).await)
    }

    /// Run `item` on the slot `token` holds; the slot is idle again on return.
    #[tracing::instrument(level = "trace", skip_all, fields(slot = token.slot()))]
    pub async fn run(&self, token: SlotToken, item: &WorkItem) -> PipelineOutcome {
        let outcome = self.pipeline.run(item).await;
        drop(token);
        outcome
    }

    /// Stop handing out slots; waiting acquirers fail.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn stats(&self) -> PoolStats {
        let total = self.total_slots();
        let busy = self
            .table
            .busy
            .iter()
            .filter(|slot| slot.load(Ordering::Acquire))
            .count();

        PoolStats {
            total,
            busy,
            available: total - busy,
        }
    }

    pub fn total_slots(&self) -> usize {
        self.table.busy.len()
    }

    pub fn busy_slots(&self) -> usize {
        self.stats().busy
    }

    pub fn available_slots(&self) -> usize {
        self.stats().available
    }
}
