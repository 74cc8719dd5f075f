use std::sync::Arc;

use formflow_common::{DispatchId, Submission};
use formflow_rules::{CustomerConfig, EndpointConfig};
use tokio::time::Instant;

use crate::error::DispatchError;

/// Identifies one attempt of a dispatch: its id plus how often it was retried.
pub type WorkKey = (DispatchId, u32);

/// One pending delivery of a submission to a single endpoint.
///
/// A work item is owned by exactly one place at a time: the queue, a worker,
/// or the retry scheduler.
#[derive(Debug)]
pub struct WorkItem {
    pub id: DispatchId,
    pub submission: Submission,
    pub customer: Arc<CustomerConfig>,
    pub endpoint: Arc<EndpointConfig>,
    /// Higher values are served first.
    pub priority: u32,
    pub enqueued_at: Instant,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

impl WorkItem {
    #[must_use]
    pub fn new(
        submission: Submission,
        customer: Arc<CustomerConfig>,
        endpoint: Arc<EndpointConfig>,
        priority: u32,
    ) -> Self {
        Self {
            id: DispatchId::new(),
            submission,
            customer,
            endpoint,
            priority,
            enqueued_at: Instant::now(),
            retry_count: 0,
            last_error: None,
        }
    }

    #[must_use]
    pub const fn key(&self) -> WorkKey {
        (self.id, self.retry_count)
    }

    /// The follow-up attempt after `error`: same id, one more retry, and a
    /// priority one step more urgent so it is served ahead of newer work.
    #[must_use]
    pub fn into_retry(self, error: &DispatchError) -> Self {
        Self {
            priority: self.priority.saturating_add(1),
            enqueued_at: Instant::now(),
            retry_count: self.retry_count + 1,
            last_error: Some(error.to_string()),
            ..self
        }
    }
}
