//! Per-target rate limiting using the token bucket algorithm
//!
//! Each delivery target (a webhook host, or the REST transport as a whole)
//! has its own bucket so a slow downstream cannot be flooded by retries.
//!
//! A bucket starts full at `burst_size` tokens and earns `requests_per_second`
//! tokens back over time. Each delivery spends one token; an empty bucket makes
//! the delivery sleep until the next token is earned.

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Default deliveries per second per target. Zero or less disables limiting.
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,

    /// Default burst size (max tokens in bucket)
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,

    /// Per-target overrides, keyed by host (or `rest` for the REST transport)
    #[serde(default)]
    pub target_limits: ahash::AHashMap<String, TargetRateLimit>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst_size: default_burst_size(),
            target_limits: ahash::AHashMap::default(),
        }
    }
}

const fn default_requests_per_second() -> f64 {
    5.0
}

const fn default_burst_size() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetRateLimit {
    pub requests_per_second: f64,
    pub burst_size: u32,
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    per_second: f64,
    updated: Instant,
}

impl TokenBucket {
    fn new(limit: &TargetRateLimit) -> Self {
        let capacity = f64::from(limit.burst_size.max(1));
        Self {
            tokens: capacity,
            capacity,
            per_second: limit.requests_per_second,
            updated: Instant::now(),
        }
    }

    const fn unlimited(&self) -> bool {
        self.per_second <= 0.0
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let earned = now.duration_since(self.updated).as_secs_f64() * self.per_second;
        self.tokens = (self.tokens + earned).min(self.capacity);
        self.updated = now;
    }

    /// Take one token, or report how long until one is earned.
    fn take(&mut self) -> Result<(), Duration> {
        if self.unlimited() {
            return Ok(());
        }

        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - self.tokens) / self.per_second))
        }
    }
}

type Bucket = Arc<Mutex<TokenBucket>>;

/// Token buckets shared by every delivery through one transport
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: DashMap<String, Bucket>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
        }
    }

    fn limit_for(&self, target: &str) -> TargetRateLimit {
        self.config
            .target_limits
            .get(target)
            .cloned()
            .unwrap_or(TargetRateLimit {
                requests_per_second: self.config.requests_per_second,
                burst_size: self.config.burst_size,
            })
    }

    fn bucket(&self, target: &str) -> Bucket {
        if let Some(bucket) = self.buckets.get(target) {
            return Arc::clone(bucket.value());
        }

        let bucket = self
            .buckets
            .entry(target.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::new(&self.limit_for(target)))));
        Arc::clone(bucket.value())
    }

    /// Returns `Ok(())` if a delivery may go now, or how long to wait.
    ///
    /// # Errors
    ///
    /// Returns the wait time when the target's bucket is empty.
    pub fn check(&self, target: &str) -> Result<(), Duration> {
        let outcome = self.bucket(target).lock().take();

        if let Err(wait) = outcome {
            tracing::debug!(
                target_key = %target,
                wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                "Rate limited"
            );
        }
        outcome
    }

    /// Wait until a token for `target` is available and take it.
    pub async fn acquire(&self, target: &str) {
        while let Err(wait) = self.check(target) {
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }
}
