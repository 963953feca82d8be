//! Reconnect delay schedule.

use std::time::Duration;

/// Exponential backoff with a ceiling and a bounded number of attempts.
///
/// `delay(attempt) = min(base_delay * 2^attempt, max_delay)`, where `attempt`
/// is 1 for the first reconnect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay unit that gets doubled per attempt.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Number of reconnects allowed before giving up.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    /// Create a policy with the default schedule.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base delay.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the delay ceiling.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the maximum number of reconnect attempts.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Delay to wait before reconnect number `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        match 2u32.checked_pow(attempt) {
            Some(factor) => self.base_delay.saturating_mul(factor).min(self.max_delay),
            None => self.max_delay,
        }
    }

    /// Whether reconnect number `attempt` is still within budget.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_from_first_attempt() {
        let policy = BackoffPolicy::new()
            .base_delay(Duration::from_millis(100))
            .max_delay(Duration::from_secs(60));

        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
        assert_eq!(policy.delay(3), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = BackoffPolicy::new()
            .base_delay(Duration::from_secs(1))
            .max_delay(Duration::from_secs(5));

        assert_eq!(policy.delay(2), Duration::from_secs(4));
        assert_eq!(policy.delay(3), Duration::from_secs(5));
        assert_eq!(policy.delay(10), Duration::from_secs(5));
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(64), policy.max_delay);
        assert_eq!(policy.delay(u32::MAX), policy.max_delay);
    }

    #[test]
    fn test_attempt_budget() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert!(policy.allows(1));
        assert!(policy.allows(5));
        assert!(!policy.allows(6));
    }
}
