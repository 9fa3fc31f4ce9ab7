//! Retry Policy
//!
//! Decides whether a failed attempt is retried and how long to wait first.
//! Attempt state travels with the queued request itself, so the policy is a
//! pure function of the attempt count and the request's budget.

use std::time::Duration;

use crate::request::RequestConfig;

/// Backoff ceiling
pub const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Retry decision parameters
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Global switch; when off every failure is terminal
    pub auto_retry_enabled: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            auto_retry_enabled: true,
        }
    }
}

impl RetryPolicy {
    /// Create a policy
    #[must_use]
    pub fn new(auto_retry_enabled: bool) -> Self {
        Self { auto_retry_enabled }
    }

    /// Whether a request that has already been retried `retries_so_far`
    /// times may be retried again
    #[must_use]
    pub fn should_retry(&self, retries_so_far: u32, config: &RequestConfig) -> bool {
        self.auto_retry_enabled && config.max_retries > 0 && retries_so_far < config.max_retries
    }

    /// Delay before retry number `attempt` (1 for the first retry):
    /// `min(2^(attempt-1), 10)` seconds
    #[must_use]
    pub fn next_delay(attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let secs = 1u64 << exponent;
        Duration::from_secs(secs).min(MAX_BACKOFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_sequence() {
        let delays: Vec<u64> = (1..=6).map(|n| RetryPolicy::next_delay(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
    }

    #[test]
    fn test_backoff_never_overflows() {
        assert_eq!(RetryPolicy::next_delay(u32::MAX), MAX_BACKOFF);
        assert_eq!(RetryPolicy::next_delay(0), Duration::from_secs(1));
    }

    #[test]
    fn test_budget_exhaustion() {
        let policy = RetryPolicy::default();
        let config = RequestConfig::new("x").with_max_retries(3);

        assert!(policy.should_retry(0, &config));
        assert!(policy.should_retry(2, &config));
        assert!(!policy.should_retry(3, &config));
    }

    #[test]
    fn test_zero_budget_never_retries() {
        let config = RequestConfig::new("x").with_max_retries(0);
        assert!(!RetryPolicy::default().should_retry(0, &config));
    }

    #[test]
    fn test_disabled_policy_never_retries() {
        let config = RequestConfig::new("x").with_max_retries(5);
        assert!(!RetryPolicy::new(false).should_retry(0, &config));
    }
}
