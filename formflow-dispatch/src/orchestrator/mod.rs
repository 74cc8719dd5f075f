//! Dispatch orchestration
//!
//! The [`Orchestrator`] owns the queue, the worker pool and the retry
//! scheduler. Every time work arrives or a worker finishes it drains the queue
//! onto idle slots, never letting more than the concurrency limit run at once.

mod drain;
mod scheduler;

use std::{
    collections::VecDeque,
    pin::pin,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use formflow_common::{DispatchId, DispatchState, Signal, Submission, internal};
use formflow_rules::{CustomerConfig, CustomerConfigStore, EndpointConfig, EndpointRegistry, FieldRules};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, broadcast};

use self::scheduler::RetryScheduler;
use crate::{
    config::DispatchConfig,
    enrich::Enricher,
    error::{DispatchError, SystemError},
    policy::{Pipeline, RetryPolicy},
    pool::{PoolStats, WorkerPool},
    queue::DispatchQueue,
    rate_limiter::RateLimiter,
    transport::Transport,
    types::WorkItem,
};

/// What shutdown does with retries that are waiting on their backoff timer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryDisposition {
    /// Enqueue them immediately and give them one last attempt.
    #[default]
    Flush,
    /// Mark them failed without another attempt.
    Drop,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchRecord {
    pub request_id: String,
    pub customer_id: String,
    pub endpoint: String,
    pub state: DispatchState,
    /// Pipeline runs so far, including the one in progress.
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub queue_length: usize,
    pub in_flight: usize,
    pub scheduled_retries: usize,
    /// Dispatches accepted but not yet in a terminal state.
    pub outstanding: usize,
    pub workers: PoolStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Scheduled retries given one last attempt.
    pub flushed: usize,
    /// Scheduled retries failed without another attempt.
    pub dropped: usize,
    /// Queued items failed because the timeout elapsed first.
    pub abandoned: usize,
    /// Items still running when the timeout elapsed.
    pub in_flight: usize,
}

impl ShutdownReport {
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.abandoned == 0 && self.in_flight == 0
    }
}

pub struct Orchestrator {
    queue: DispatchQueue,
    pool: WorkerPool,
    customers: Arc<CustomerConfigStore>,
    endpoints: Arc<EndpointRegistry>,
    retry: RetryPolicy,
    concurrency_limit: usize,
    status_interval: Duration,
    shutdown_timeout: Duration,
    on_shutdown: RetryDisposition,
    scheduler: RetryScheduler,
    records: DashMap<DispatchId, DispatchRecord>,
    /// Finished dispatches, oldest first, for evicting their records.
    finished: Mutex<VecDeque<DispatchId>>,
    retained_records: usize,
    outstanding: AtomicUsize,
    accepting: AtomicBool,
    idle: Notify,
}

pub struct OrchestratorBuilder {
    config: DispatchConfig,
    customers: CustomerConfigStore,
    endpoints: EndpointRegistry,
    rules: FieldRules,
    transport: Option<Arc<dyn Transport>>,
    enricher: Option<Arc<dyn Enricher>>,
}

impl OrchestratorBuilder {
    #[must_use]
    pub fn config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn customers(mut self, customers: CustomerConfigStore) -> Self {
        self.customers = customers;
        self
    }

    #[must_use]
    pub fn endpoints(mut self, endpoints: EndpointRegistry) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Replaces the standard field table.
    #[must_use]
    pub fn rules(mut self, rules: FieldRules) -> Self {
        self.rules = rules;
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    /// # Errors
    ///
    /// Returns an error if no transport was supplied, there are no worker
    /// slots, or a customer enables an endpoint that is not registered.
    pub fn build(self) -> Result<Arc<Orchestrator>, DispatchError> {
        let transport = self
            .transport
            .ok_or_else(|| SystemError::Internal("no transport configured".to_string()))?;

        if self.config.concurrency_limit() == 0 {
            return Err(SystemError::Internal(
                "max_workers and max_concurrent must both be at least 1".to_string(),
            )
            .into());
        }

        self.customers.validate(&self.endpoints)?;

        let mut pipeline = Pipeline::new(
            Arc::new(self.rules),
            transport,
            RateLimiter::new(self.config.rate_limit.clone()),
            self.config.delivery_timeout(),
        );
        if let Some(enricher) = self.enricher {
            pipeline = pipeline.with_enricher(enricher);
        }

        internal!(
            level = INFO,
            "Dispatcher configured with {} workers, {} concurrent, {} customers, {} endpoints",
            self.config.max_workers,
            self.config.concurrency_limit(),
            self.customers.len(),
            self.endpoints.len()
        );

        Ok(Arc::new(Orchestrator {
            queue: DispatchQueue::new(),
            pool: WorkerPool::new(self.config.max_workers, Arc::new(pipeline)),
            customers: Arc::new(self.customers),
            endpoints: Arc::new(self.endpoints),
            retry: self.config.retry,
            concurrency_limit: self.config.concurrency_limit(),
            status_interval: self.config.status_interval(),
            shutdown_timeout: self.config.shutdown_timeout(),
            on_shutdown: self.config.on_shutdown,
            scheduler: RetryScheduler::default(),
            records: DashMap::new(),
            finished: Mutex::new(VecDeque::new()),
            retained_records: self.config.retained_records,
            outstanding: AtomicUsize::new(0),
            accepting: AtomicBool::new(true),
            idle: Notify::new(),
        }))
    }
}

impl Orchestrator {
    #[must_use]
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder {
            config: DispatchConfig::default(),
            customers: CustomerConfigStore::new(),
            endpoints: EndpointRegistry::new(),
            rules: FieldRules::standard(),
            transport: None,
            enricher: None,
        }
    }

    fn ensure_accepting(&self) -> Result<(), DispatchError> {
        if self.accepting.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(SystemError::ShuttingDown.into())
        }
    }

    /// Fan a submission out to every endpoint its customer enables.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the customer or one of its endpoints
    /// is unknown, in which case nothing is enqueued, or
    /// [`SystemError::ShuttingDown`] once shutdown has begun.
    pub fn submit(
        self: &Arc<Self>,
        submission: Submission,
        priority: u32,
    ) -> Result<Vec<DispatchId>, DispatchError> {
        self.ensure_accepting()?;
        let customer = self.customers.lookup(submission.customer_id())?;
        let endpoints = customer
            .enabled_endpoints(&submission)
            .map(|name| self.endpoints.get(name))
            .collect::<Result<Vec<_>, _>>()?;

        let ids = endpoints
            .into_iter()
            .map(|endpoint| {
                self.enqueue_new(submission.clone(), Arc::clone(&customer), endpoint, priority)
            })
            .collect::<Vec<_>>();

        tracing::info!(
            request_id = %submission.request_id(),
            customer_id = %submission.customer_id(),
            dispatches = ids.len(),
            "Submission accepted"
        );

        self.drain();
        Ok(ids)
    }

    /// Dispatch a submission to one named endpoint.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the customer or endpoint is unknown,
    /// or [`SystemError::ShuttingDown`] once shutdown has begun.
    pub fn submit_to(
        self: &Arc<Self>,
        submission: Submission,
        endpoint: &str,
        priority: u32,
    ) -> Result<DispatchId, DispatchError> {
        self.ensure_accepting()?;
        let customer = self.customers.lookup(submission.customer_id())?;
        let endpoint = self.endpoints.get(endpoint)?;

        let id = self.enqueue_new(submission, customer, endpoint, priority);
        self.drain();
        Ok(id)
    }

    fn enqueue_new(
        &self,
        submission: Submission,
        customer: Arc<CustomerConfig>,
        endpoint: Arc<EndpointConfig>,
        priority: u32,
    ) -> DispatchId {
        let item = WorkItem::new(submission, customer, endpoint, priority);
        let id = item.id;

        self.records.insert(
            id,
            DispatchRecord {
                request_id: item.submission.request_id().to_string(),
                customer_id: item.submission.customer_id().to_string(),
                endpoint: item.endpoint.name.clone(),
                state: DispatchState::Queued,
                attempts: 0,
            },
        );
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        self.queue.enqueue(item);
        id
    }

    fn set_state(&self, id: DispatchId, state: DispatchState) {
        if let Some(mut record) = self.records.get_mut(&id) {
            record.state = state;
        }
    }

    /// Record a terminal state and wake `wait_idle` callers once nothing is left.
    fn finish(&self, id: DispatchId, state: DispatchState) {
        self.set_state(id, state);
        self.retire(id);
        if self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }

    /// Forget the oldest finished records beyond the retention limit.
    fn retire(&self, id: DispatchId) {
        let evicted = {
            let mut finished = self.finished.lock();
            finished.push_back(id);
            let excess = finished.len().saturating_sub(self.retained_records);
            finished.drain(..excess).collect::<Vec<_>>()
        };

        for id in evicted {
            self.records.remove(&id);
        }
    }

    /// Remove and return the record of a finished dispatch.
    ///
    /// Returns `None` if the id is unknown, already evicted, or still in
    /// progress.
    pub fn take_record(&self, id: &DispatchId) -> Option<DispatchRecord> {
        let (_, record) = self
            .records
            .remove_if(id, |_, record| record.state.is_terminal())?;
        self.finished.lock().retain(|finished| finished != id);
        Some(record)
    }

    #[must_use]
    pub fn status(&self) -> StatusSnapshot {
        let queue = self.queue.stats();
        StatusSnapshot {
            queue_length: queue.queue_length,
            in_flight: queue.in_flight,
            scheduled_retries: self.scheduler.len(),
            outstanding: self.outstanding.load(Ordering::Acquire),
            workers: self.pool.stats(),
        }
    }

    #[must_use]
    pub fn state(&self, id: &DispatchId) -> Option<DispatchState> {
        self.records.get(id).map(|record| record.state.clone())
    }

    #[must_use]
    pub fn record(&self, id: &DispatchId) -> Option<DispatchRecord> {
        self.records.get(id).map(|record| record.value().clone())
    }

    /// Every retained dispatch, ordered by id.
    #[must_use]
    pub fn records(&self) -> Vec<(DispatchId, DispatchRecord)> {
        let mut records = self
            .records
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect::<Vec<_>>();
        records.sort_by_key(|(id, _)| *id);
        records
    }

    /// Pending ids with their priorities, in service order.
    #[must_use]
    pub fn pending(&self) -> Vec<(DispatchId, u32)> {
        self.queue.snapshot()
    }

    /// Resolve once every accepted dispatch has reached a terminal state.
    pub async fn wait_idle(&self) {
        loop {
            let mut notified = pin!(self.idle.notified());
            notified.as_mut().enable();

            if self.outstanding.load(Ordering::Acquire) == 0 {
                return;
            }

            notified.await;
        }
    }

    /// Stop accepting submissions, deal with scheduled retries according to
    /// `disposition`, then wait up to `timeout` for remaining work.
    ///
    /// Queued work still waiting when the timeout elapses is marked failed.
    pub async fn shutdown(
        self: &Arc<Self>,
        disposition: RetryDisposition,
        timeout: Duration,
    ) -> ShutdownReport {
        self.accepting.store(false, Ordering::Release);
        internal!(level = INFO, "Dispatcher shutting down ({disposition:?} scheduled retries)");

        let mut report = ShutdownReport::default();
        let waiting = self.scheduler.cancel_all();

        match disposition {
            RetryDisposition::Flush => {
                report.flushed = waiting.len();
                for item in waiting {
                    self.set_state(item.id, DispatchState::Queued);
                    self.queue.enqueue(item);
                }
                self.drain();
            }
            RetryDisposition::Drop => {
                report.dropped = waiting.len();
                for item in waiting {
                    let reason = item.last_error.as_deref().unwrap_or("unknown error");
                    self.finish(
                        item.id,
                        DispatchState::Failed(format!("Dropped at shutdown after: {reason}")),
                    );
                }
            }
        }

        if tokio::time::timeout(timeout, self.wait_idle()).await.is_err() {
            for item in self.queue.drain() {
                self.finish(
                    item.id,
                    DispatchState::Failed("Abandoned at shutdown".to_string()),
                );
                report.abandoned += 1;
            }
            report.in_flight = self.queue.in_flight_count();

            tracing::warn!(
                abandoned = report.abandoned,
                in_flight = report.in_flight,
                "Shutdown timeout exceeded"
            );
        }

        self.pool.close();
        internal!(level = INFO, "Dispatcher shutdown complete");
        report
    }

    /// Log status periodically until a shutdown signal arrives, then shut
    /// down with the configured retry disposition and timeout.
    #[tracing::instrument(level = "trace", skip_all)]
    pub async fn serve(self: &Arc<Self>, mut shutdown: broadcast::Receiver<Signal>) -> ShutdownReport {
        internal!(level = INFO, "Dispatcher starting");

        let mut status_timer = tokio::time::interval(self.status_interval);
        status_timer.tick().await;

        loop {
            tokio::select! {
                _ = status_timer.tick() => {
                    let status = self.status();
                    tracing::info!(
                        queue_length = status.queue_length,
                        in_flight = status.in_flight,
                        scheduled_retries = status.scheduled_retries,
                        busy_workers = status.workers.busy,
                        "Dispatcher status"
                    );
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown) => {
                            internal!(level = INFO, "Dispatcher received shutdown signal");
                        }
                        Err(e) => {
                            tracing::error!("Dispatcher shutdown channel error: {e}");
                        }
                    }
                    break;
                }
            }
        }

        self.shutdown(self.on_shutdown, self.shutdown_timeout).await
    }
}
