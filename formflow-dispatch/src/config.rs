use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{orchestrator::RetryDisposition, policy::RetryPolicy, rate_limiter::RateLimitConfig};

const fn default_max_workers() -> usize {
    4
}

const fn default_max_concurrent() -> usize {
    4
}

const fn default_delivery_timeout_ms() -> u64 {
    10_000
}

const fn default_status_interval_secs() -> u64 {
    30
}

const fn default_shutdown_timeout_secs() -> u64 {
    30
}

const fn default_retained_records() -> usize {
    10_000
}

/// Tunables for the dispatch engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Number of worker slots.
    ///
    /// Default: 4
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Ceiling on dispatches in flight at once. The effective limit is the
    /// smaller of this and `max_workers`.
    ///
    /// Default: 4
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    #[serde(default)]
    pub retry: RetryPolicy,

    /// How long one delivery may take before it counts as a temporary failure.
    ///
    /// Default: 10000 milliseconds
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// How often `serve` logs a status line.
    ///
    /// Default: 30 seconds
    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,

    /// How long shutdown waits for in-flight work.
    ///
    /// Default: 30 seconds
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// What shutdown does with retries still waiting on their backoff.
    ///
    /// Default: `Flush`
    #[serde(default)]
    pub on_shutdown: RetryDisposition,

    /// How many finished dispatch records are kept for queries. The oldest
    /// finished record is forgotten once this is exceeded; dispatches still
    /// in progress are always kept.
    ///
    /// Default: 10000
    #[serde(default = "default_retained_records")]
    pub retained_records: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            max_concurrent: default_max_concurrent(),
            retry: RetryPolicy::default(),
            delivery_timeout_ms: default_delivery_timeout_ms(),
            rate_limit: RateLimitConfig::default(),
            status_interval_secs: default_status_interval_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            on_shutdown: RetryDisposition::default(),
            retained_records: default_retained_records(),
        }
    }
}

impl DispatchConfig {
    #[must_use]
    pub const fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    #[must_use]
    pub const fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }

    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// The number of dispatches allowed in flight at once.
    #[must_use]
    pub fn concurrency_limit(&self) -> usize {
        self.max_concurrent.min(self.max_workers)
    }
}
