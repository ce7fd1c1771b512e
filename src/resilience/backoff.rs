//! Exponential backoff: resurrection delays and retry pauses.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryBackoffConfig;

/// Delay before a node that failed `dead_count` consecutive times may be
/// tried again.
///
/// `min(max(base * 2^(dead_count - 1), base), cap)`, saturating at every
/// step so large failure counts clamp to `cap`.
pub fn resurrect_delay(dead_count: u32, base: Duration, cap: Duration) -> Duration {
    let base_ms = duration_ms(base);
    let cap_ms = duration_ms(cap).max(base_ms);
    Duration::from_millis(doubled(base_ms, dead_count.saturating_sub(1)).max(base_ms).min(cap_ms))
}

/// Pause before retry number `retry` (1-based).
///
/// The doubled base is a floor: jitter of up to a quarter is added on top
/// and the sum is clamped to `max_ms`. Zero when `retry` or `base_ms` is 0.
pub fn retry_delay<R: Rng>(retry: u32, config: &RetryBackoffConfig, rng: &mut R) -> Duration {
    if retry == 0 || config.base_ms == 0 {
        return Duration::ZERO;
    }
    let cap_ms = config.max_ms.max(config.base_ms);
    let floor_ms = doubled(config.base_ms, retry - 1).min(cap_ms);
    let spread = floor_ms / 4;
    let jitter = if spread == 0 { 0 } else { rng.gen_range(0..=spread) };
    Duration::from_millis(floor_ms.saturating_add(jitter).min(cap_ms))
}

/// `base * 2^exponent`, saturating.
fn doubled(base_ms: u64, exponent: u32) -> u64 {
    let factor = if exponent >= 64 { u64::MAX } else { 1u64 << exponent };
    base_ms.saturating_mul(factor)
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
