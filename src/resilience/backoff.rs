//! Exponential backoff with jitter between connection creation retries.

use std::time::Duration;
use rand::Rng;

/// Calculate exponential backoff delay with jitter.
///
/// `attempt` is 1-based; doubling stops after `max_doublings` so a flapping
/// database is retried at most every `base * 2^max_doublings`.
pub fn calculate_backoff(attempt: u32, base: Duration, max_doublings: u32) -> Duration {
    if attempt == 0 || base.is_zero() {
        return Duration::ZERO;
    }

    let exponent = (attempt - 1).min(max_doublings);
    let base_ms = base.as_millis() as u64;
    let delay_ms = base_ms.saturating_mul(2u64.saturating_pow(exponent));

    // Apply jitter (0 to 10% of the delay)
    let jitter_range = delay_ms / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(delay_ms.saturating_add(jitter))
}
