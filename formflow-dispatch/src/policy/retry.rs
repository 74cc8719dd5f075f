//! Retry policy for dispatch operations.
//!
//! Decides whether a failed dispatch gets another attempt and how long it
//! waits first, independently of the orchestrator that acts on the answer.

use std::time::Duration;

use formflow_rules::RetryOverride;
use serde::{Deserialize, Serialize};

use crate::queue::retry::calculate_retry_delay;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt, so a dispatch is tried at most
    /// `max_retries + 1` times.
    ///
    /// Default: 3
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    /// The delay before retry `n` is `base * 2^n`.
    ///
    /// Default: 5000 milliseconds
    #[serde(default = "defaults::base_retry_delay_ms")]
    pub base_retry_delay_ms: u64,

    /// Default: 300000 milliseconds (5 minutes)
    #[serde(default = "defaults::max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    /// Delays are randomised within ±`retry_jitter_factor`.
    ///
    /// Default: 0.0 (exact delays)
    #[serde(default = "defaults::retry_jitter_factor")]
    pub retry_jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: defaults::max_retries(),
            base_retry_delay_ms: defaults::base_retry_delay_ms(),
            max_retry_delay_ms: defaults::max_retry_delay_ms(),
            retry_jitter_factor: defaults::retry_jitter_factor(),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an endpoint's overrides on top of this policy.
    #[must_use]
    pub fn with_override(mut self, retry: Option<RetryOverride>) -> Self {
        if let Some(retry) = retry {
            self.max_retries = retry.max_retries.unwrap_or(self.max_retries);
            self.base_retry_delay_ms = retry.base_delay_ms.unwrap_or(self.base_retry_delay_ms);
        }
        self
    }

    /// Returns `true` while a dispatch that has already been retried
    /// `retry_count` times may be retried again.
    #[must_use]
    pub const fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// Delay before retry number `retry` (1-indexed).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        calculate_retry_delay(
            retry,
            self.base_retry_delay_ms,
            self.max_retry_delay_ms,
            self.retry_jitter_factor,
        )
    }

    #[must_use]
    pub const fn remaining_retries(&self, retry_count: u32) -> u32 {
        self.max_retries.saturating_sub(retry_count)
    }
}

mod defaults {
    pub const fn max_retries() -> u32 {
        3
    }

    pub const fn base_retry_delay_ms() -> u64 {
        5000
    }

    pub const fn max_retry_delay_ms() -> u64 {
        300_000
    }

    pub const fn retry_jitter_factor() -> f64 {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base_retry_delay_ms, 5000);
        assert_eq!(policy.max_retry_delay_ms, 300_000);
        assert!(policy.retry_jitter_factor.abs() < f64::EPSILON);
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::default();

        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(10));

        assert_eq!(policy.remaining_retries(1), 2);
        assert_eq!(policy.remaining_retries(5), 0);
    }

    #[test]
    fn test_zero_retries_means_single_attempt() {
        let policy = RetryPolicy {
            max_retries: 0,
            ..RetryPolicy::default()
        };
        assert!(!policy.should_retry(0));
    }

    #[test]
    fn test_delays_grow() {
        let policy = RetryPolicy {
            base_retry_delay_ms: 1000,
            ..RetryPolicy::default()
        };

        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
    }

    #[test]
    fn test_endpoint_override() {
        let policy = RetryPolicy::default().with_override(Some(RetryOverride {
            max_retries: Some(5),
            base_delay_ms: None,
        }));
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.base_retry_delay_ms, 5000);

        let unchanged = RetryPolicy::default().with_override(None);
        assert_eq!(unchanged, RetryPolicy::default());
    }
}
