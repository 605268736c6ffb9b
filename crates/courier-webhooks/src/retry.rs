//! Exponential backoff with jitter for failed deliveries.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

/// Default maximum attempts per delivery (initial + 9 retries).
pub const DEFAULT_MAX_ATTEMPTS: i32 = 10;

/// Default delay before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(10);

/// Default ceiling for any single delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(3600);

/// Default jitter fraction (+/- 10%).
pub const DEFAULT_JITTER: f64 = 0.1;

/// Retry schedule for retryable delivery failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: i32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: DEFAULT_JITTER,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of attempts (at least 1).
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Set the jitter fraction, clamped to `[0, 1]`.
    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = if jitter.is_finite() {
            jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    #[must_use]
    pub fn max_attempts(&self) -> i32 {
        self.max_attempts
    }

    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    #[must_use]
    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Whether another attempt is allowed after `attempt_count` attempts.
    #[must_use]
    pub fn should_retry(&self, attempt_count: i32) -> bool {
        attempt_count < self.max_attempts
    }

    /// Delay before the next attempt, without jitter.
    ///
    /// `base * 2^(attempt_count - 1)`, capped at `max_delay`.
    #[must_use]
    pub fn base_delay_for(&self, attempt_count: i32) -> Duration {
        let exponent = u32::try_from(attempt_count.saturating_sub(1)).unwrap_or(0);
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay before the next attempt, jittered and clamped to `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt_count: i32) -> Duration {
        let base = self.base_delay_for(attempt_count);
        if self.jitter == 0.0 {
            return base;
        }

        let factor = rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        base.mul_f64(factor).min(self.max_delay)
    }

    /// Not-before time of the next attempt.
    ///
    /// Always strictly after `previous`, even when jitter shrinks the delay.
    #[must_use]
    pub fn next_attempt_at(
        &self,
        now: DateTime<Utc>,
        attempt_count: i32,
        previous: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let delay = chrono::Duration::from_std(self.delay_for(attempt_count))
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let candidate = now + delay;
        let floor = previous + chrono::Duration::milliseconds(1);
        candidate.max(floor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy_without_jitter() -> RetryPolicy {
        RetryPolicy::new()
            .with_base_delay(Duration::from_secs(10))
            .with_max_delay(Duration::from_secs(3600))
            .with_jitter(0.0)
    }

    #[test]
    fn test_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 10);
        assert_eq!(policy.base_delay(), Duration::from_secs(10));
        assert_eq!(policy.max_delay(), Duration::from_secs(3600));
        assert!((policy.jitter() - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_backoff_doubles_from_base() {
        let policy = policy_without_jitter();
        assert_eq!(policy.delay_for(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for(2), Duration::from_secs(20));
        assert_eq!(policy.delay_for(3), Duration::from_secs(40));
        assert_eq!(policy.delay_for(4), Duration::from_secs(80));
    }

    #[test]
    fn test_backoff_capped() {
        let policy = policy_without_jitter();
        assert_eq!(policy.delay_for(10), Duration::from_secs(3600));
        assert_eq!(policy.delay_for(40), Duration::from_secs(3600));
        assert_eq!(policy.delay_for(i32::MAX), Duration::from_secs(3600));
    }

    #[test]
    fn test_backoff_non_decreasing_without_jitter() {
        let policy = policy_without_jitter();
        let mut last = Duration::ZERO;
        for n in 1..=20 {
            let d = policy.delay_for(n);
            assert!(d >= last, "delay for attempt {n} decreased");
            last = d;
        }
    }

    #[test]
    fn test_jitter_stays_within_bounds_and_cap() {
        let policy = RetryPolicy::new()
            .with_base_delay(Duration::from_secs(10))
            .with_max_delay(Duration::from_secs(60))
            .with_jitter(0.5);
        for _ in 0..200 {
            let first = policy.delay_for(1);
            assert!(first >= Duration::from_secs(5) && first <= Duration::from_secs(15));
            assert!(policy.delay_for(8) <= Duration::from_secs(60));
        }
    }

    #[test]
    fn test_next_attempt_strictly_after_previous() {
        let policy = RetryPolicy::new()
            .with_base_delay(Duration::ZERO)
            .with_jitter(0.0);
        let now = Utc::now();
        let previous = now + chrono::Duration::seconds(5);
        let next = policy.next_attempt_at(now, 1, previous);
        assert!(next > previous);
    }

    #[test]
    fn test_next_attempt_monotonic_across_attempts() {
        let policy = RetryPolicy::default();
        let mut now = Utc::now();
        let mut previous = now;
        for attempt in 1..policy.max_attempts() {
            let next = policy.next_attempt_at(now, attempt, previous);
            assert!(next > previous);
            previous = next;
            now = next;
        }
    }

    #[test]
    fn test_should_retry_until_max() {
        let policy = RetryPolicy::new().with_max_attempts(3);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert_eq!(RetryPolicy::new().with_max_attempts(0).max_attempts(), 1);
    }

    #[test]
    fn test_invalid_jitter_is_sanitized() {
        assert_eq!(RetryPolicy::new().with_jitter(f64::NAN).jitter(), 0.0);
        assert_eq!(RetryPolicy::new().with_jitter(3.0).jitter(), 1.0);
        assert_eq!(RetryPolicy::new().with_jitter(-1.0).jitter(), 0.0);
    }
}
