//! Retry delays with exponential backoff

use std::time::Duration;

use rand::Rng;

/// Calculate how long to wait before retry number `retry` (1-indexed)
///
/// # Formula
/// `delay = min(base * 2^retry, max_delay) * (1 ± jitter)`
///
/// With a base of one second the first three retries wait 2s, 4s and 8s.
pub fn calculate_retry_delay(
    retry: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
) -> Duration {
    let delay = if retry >= 63 {
        max_delay_ms
    } else {
        base_delay_ms.saturating_mul(1u64 << retry).min(max_delay_ms)
    };

    if jitter_factor <= 0.0 {
        return Duration::from_millis(delay);
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let jittered = {
        let jitter_range = (delay as f64) * jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        ((delay as f64) + jitter).max(0.0) as u64
    };

    Duration::from_millis(jittered)
}
