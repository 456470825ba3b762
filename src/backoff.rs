//! Reconnect delay policy.
//!
//! Pure capped exponential backoff consulted by the feed lifecycle loop
//! between reconnect attempts. No side effects, no clock access.

use std::time::Duration;

/// Default base delay before the first reconnect attempt.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default upper bound on the reconnect delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default number of reconnect attempts before giving up.
pub const DEFAULT_RETRY_CEILING: u32 = 5;

/// Capped exponential backoff: `min(base * 2^retry_count, cap)`.
///
/// `ceiling` is the retry budget: once the retry count exceeds it the caller
/// should stop reconnecting and surface a terminal state instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    base: Duration,
    cap: Duration,
    ceiling: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE_DELAY,
            cap: DEFAULT_MAX_DELAY,
            ceiling: DEFAULT_RETRY_CEILING,
        }
    }
}

impl ExponentialBackoff {
    pub fn new(base: Duration, cap: Duration, ceiling: u32) -> Self {
        Self { base, cap, ceiling }
    }

    /// Delay to wait before the reconnect attempt following `retry_count`
    /// unplanned closes. Non-decreasing in `retry_count`, never above `cap`.
    pub fn next_delay(&self, retry_count: u32) -> Duration {
        // Shift guard: 2^32 ms already dwarfs any sane cap.
        let mult = 1u64 << retry_count.min(31);
        let base_ms = self.base.as_millis().min(u64::MAX as u128) as u64;
        let delay = Duration::from_millis(base_ms.saturating_mul(mult));
        delay.min(self.cap)
    }

    /// True once the retry budget is spent.
    pub fn should_give_up(&self, retry_count: u32) -> bool {
        retry_count > self.ceiling
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }
}
