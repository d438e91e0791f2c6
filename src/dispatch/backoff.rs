use std::time::Duration;

/// Maximum retry attempts after the initial request attempt.
pub const MAX_RETRIES: u32 = 3;
/// Delay before the first retry.
pub const BASE_DELAY: Duration = Duration::from_millis(1000);
/// Growth factor between consecutive retries.
pub const BACKOFF_MULTIPLIER: u32 = 2;
/// Upper bound for any single retry delay.
pub const MAX_DELAY: Duration = Duration::from_millis(10_000);

/// Exponential backoff: `min(base * multiplier^attempt, max)`.
///
/// Pure and deterministic. The transport sleeps for `delay_for(attempt)`
/// before re-issuing attempt `attempt + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: BASE_DELAY,
            multiplier: BACKOFF_MULTIPLIER,
            max_delay: MAX_DELAY,
            max_retries: MAX_RETRIES,
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt.min(30));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// True while another attempt is allowed after attempt index `attempt` failed.
    pub fn can_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// Delay for `attempt` under the default policy.
pub fn delay_for(attempt: u32) -> Duration {
    BackoffPolicy::default().delay_for(attempt)
}
