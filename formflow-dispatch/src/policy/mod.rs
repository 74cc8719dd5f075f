//! Policy abstractions for dispatch operations.
//!
//! - [`RetryPolicy`]: decides whether and when a failed dispatch is retried
//! - [`Pipeline`]: the stages a work item passes through on a worker

pub mod pipeline;
pub mod retry;

pub use pipeline::{Pipeline, PipelineOutcome};
pub use retry::RetryPolicy;
