//! Deterministic backoff for reconnection attempts

use std::time::Duration;

/// Maximum delay between attempts, regardless of the configured base
const MAX_DELAY: Duration = Duration::from_secs(60);

/// Capped exponential backoff.
///
/// The delay for attempt `n` (1-based) is `base * 2^(n-1)`, capped at 60s.
/// Deliberately jitter-free: the published `nextRetryIn` value must be
/// reproducible from the config and the retry count alone.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Base delay between attempts
    base: Duration,
    /// Cap on consecutive reconnect attempts
    max_retries: u32,
}

impl RetryPolicy {
    /// Create a policy from the per-tunnel configuration
    pub fn new(retry_interval_ms: u64, max_retries: u32) -> Self {
        Self {
            base: Duration::from_millis(retry_interval_ms),
            max_retries,
        }
    }

    /// Whether the given consecutive-failure count exhausts the budget
    pub fn exhausted(&self, retry_count: u32) -> bool {
        retry_count > self.max_retries
    }

    /// Delay before attempt `retry_count` (1-based)
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let shift = retry_count.saturating_sub(1).min(30);
        let delay = self.base.saturating_mul(1u32 << shift);
        delay.min(MAX_DELAY)
    }

    /// Configured retry cap
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles() {
        let policy = RetryPolicy::new(1000, 5);
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
    }

    #[test]
    fn test_delay_capped() {
        let policy = RetryPolicy::new(30_000, 10);
        assert_eq!(policy.delay_for(1), Duration::from_secs(30));
        assert_eq!(policy.delay_for(2), Duration::from_secs(60));
        assert_eq!(policy.delay_for(8), Duration::from_secs(60));
    }

    #[test]
    fn test_delay_is_deterministic() {
        let policy = RetryPolicy::new(500, 3);
        assert_eq!(policy.delay_for(2), policy.delay_for(2));
    }

    #[test]
    fn test_exhaustion_boundary() {
        let policy = RetryPolicy::new(1000, 2);
        assert!(!policy.exhausted(0));
        assert!(!policy.exhausted(1));
        assert!(!policy.exhausted(2));
        assert!(policy.exhausted(3));
    }

    #[test]
    fn test_zero_retries_allows_only_initial_attempt() {
        let policy = RetryPolicy::new(1000, 0);
        assert!(policy.exhausted(1));
    }

    #[test]
    fn test_large_count_does_not_overflow() {
        let policy = RetryPolicy::new(60_000, u32::MAX);
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(60));
    }
}
