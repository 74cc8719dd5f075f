//! Dispatch engine for form submissions
//!
//! This crate provides:
//! - A priority-ordered dispatch queue with an in-flight set
//! - A fixed-size worker pool running validate → transform → enrich → deliver
//! - An orchestrator that couples the two, enforces the concurrency ceiling
//!   and schedules retries with exponential backoff
//! - HTTP delivery, optional enrichment, per-target rate limiting and a TTL
//!   secret store used for collaborator credentials

mod config;
mod enrich;
mod error;
mod orchestrator;
pub mod policy;
mod pool;
pub mod queue;
mod rate_limiter;
mod secrets;
mod service;
mod transport;
mod types;

pub use config::DispatchConfig;
pub use enrich::{Enricher, EnrichmentConfig, HttpEnricher};
pub use error::{DispatchError, PermanentError, SystemError, TemporaryError};
pub use formflow_common::{DispatchId, DispatchState};
pub use orchestrator::{
    DispatchRecord, Orchestrator, OrchestratorBuilder, RetryDisposition, ShutdownReport,
    StatusSnapshot,
};
pub use policy::{Pipeline, PipelineOutcome, RetryPolicy};
pub use pool::{PoolStats, SlotToken, WorkerPool};
pub use queue::{DispatchQueue, QueueStats};
pub use rate_limiter::{RateLimitConfig, RateLimiter, TargetRateLimit};
pub use secrets::{Secret, SecretStore};
pub use service::DispatchQueryService;
pub use transport::{
    DeliveryRequest, DeliveryResponse, Destination, HttpTransport, Transport, WEBHOOK_SECRET_HEADER,
};
pub use types::{WorkItem, WorkKey};
