//! Exponential reconnect delays.

use std::time::Duration;

/// Delay before reconnect attempt `attempt` (0-indexed): `base * 2^attempt`.
///
/// The multiplier saturates at `u32::MAX` and the product at `Duration::MAX`,
/// so a misconfigured attempt ceiling never panics.
pub fn delay_for_attempt(base: Duration, attempt: u32) -> Duration {
    // 2^attempt via checked shift so attempts >= 32 saturate.
    let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    base.checked_mul(multiplier).unwrap_or(Duration::MAX)
}

/// Sum of every delay a watchdog waits through before giving up.
pub fn total_backoff(base: Duration, max_attempts: u32) -> Duration {
    (0..max_attempts)
        .map(|attempt| delay_for_attempt(base, attempt))
        .fold(Duration::ZERO, Duration::saturating_add)
}
