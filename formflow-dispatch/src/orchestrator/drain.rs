//! Moving work from the queue onto worker slots, and back again on failure

use std::sync::{Arc, atomic::Ordering};

use formflow_common::DispatchState;

use super::Orchestrator;
use crate::{
    error::{DispatchError, PermanentError},
    policy::PipelineOutcome,
    types::WorkItem,
};

impl Orchestrator {
    /// Start queued work on idle slots until the queue, the idle slots or the
    /// concurrency limit runs out. Returns how many items were started.
    pub(super) fn drain(self: &Arc<Self>) -> usize {
        let mut started = 0;

        while let Some(token) = self.pool.try_acquire() {
            let Some(item) = self.queue.claim_next_within(self.concurrency_limit) else {
                break;
            };

            if let Some(mut record) = self.records.get_mut(&item.id) {
                record.state = DispatchState::Claimed;
                record.attempts += 1;
            }

            let this = Arc::clone(self);
            tokio::spawn(async move {
                let outcome = this.pool.run(token, &item).await;
                this.complete(item, outcome);
            });
            started += 1;
        }

        started
    }

    fn complete(self: &Arc<Self>, item: WorkItem, outcome: PipelineOutcome) {
        self.queue.complete(item.key());

        match outcome {
            PipelineOutcome::Delivered(response) => {
                tracing::info!(
                    dispatch_id = %item.id,
                    customer_id = %item.customer.id,
                    endpoint = %item.endpoint.name,
                    status = response.status,
                    attempts = item.retry_count + 1,
                    "Dispatch delivered"
                );
                self.finish(item.id, DispatchState::Succeeded);
            }
            PipelineOutcome::Terminal(error) => {
                tracing::error!(
                    dispatch_id = %item.id,
                    customer_id = %item.customer.id,
                    endpoint = %item.endpoint.name,
                    retry_count = item.retry_count,
                    reason = %error,
                    "Dispatch failed"
                );
                let state = error.validation_reasons().map_or_else(
                    || DispatchState::Failed(error.to_string()),
                    |reasons| DispatchState::ValidationFailed(reasons.to_vec()),
                );
                self.finish(item.id, state);
            }
            PipelineOutcome::Retry(error) => self.retry_later(item, &error),
        }

        self.drain();
    }

    fn retry_later(self: &Arc<Self>, item: WorkItem, error: &DispatchError) {
        let policy = self.retry.with_override(item.endpoint.retry);

        if !policy.should_retry(item.retry_count) {
            let attempts = item.retry_count + 1;
            let exhausted = DispatchError::from(PermanentError::RetriesExhausted {
                attempts,
                reason: error.to_string(),
            });
            tracing::error!(
                dispatch_id = %item.id,
                customer_id = %item.customer.id,
                endpoint = %item.endpoint.name,
                retry_count = item.retry_count,
                reason = %exhausted,
                "Dispatch failed"
            );
            self.finish(
                item.id,
                DispatchState::RetriesExhausted {
                    attempts,
                    reason: error.to_string(),
                },
            );
            return;
        }

        if !self.accepting.load(Ordering::Acquire) {
            tracing::warn!(
                dispatch_id = %item.id,
                endpoint = %item.endpoint.name,
                reason = %error,
                "Dispatch failed during shutdown, not retrying"
            );
            self.finish(
                item.id,
                DispatchState::Failed(format!("Shut down before retry: {error}")),
            );
            return;
        }

        let next = item.into_retry(error);
        let delay = policy.delay_for(next.retry_count);

        tracing::warn!(
            dispatch_id = %next.id,
            customer_id = %next.customer.id,
            endpoint = %next.endpoint.name,
            retry_count = next.retry_count,
            remaining_retries = policy.remaining_retries(next.retry_count),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            reason = %error,
            "Dispatch failed, retry scheduled"
        );

        self.set_state(
            next.id,
            DispatchState::RetryScheduled {
                retry_count: next.retry_count,
                delay,
            },
        );
        self.schedule(next, delay);
    }

    /// Put a retry whose backoff has elapsed back on the queue.
    pub(super) fn requeue(self: &Arc<Self>, item: WorkItem) {
        tracing::debug!(dispatch_id = %item.id, retry_count = item.retry_count, "Retry due");
        self.set_state(item.id, DispatchState::Queued);
        self.queue.enqueue(item);
        self.drain();
    }
}
