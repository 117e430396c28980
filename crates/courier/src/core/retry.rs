//! Retry policy for connection establishment.

use std::time::Duration;
use serde::{Deserialize, Serialize};

/// Shape of the delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backoff {
    Fixed(Duration),
    Exponential { initial: Duration, max: Duration },
}

/// How often and how patiently to retry a failed connection attempt.
///
/// Which errors are worth retrying is decided by the caller; the policy only
/// answers "may I try again" and "how long do I wait first".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: Option<u32>,
    backoff: Backoff,
}

impl Default for RetryPolicy {
    /// Unbounded attempts, five seconds apart.
    fn default() -> Self {
        Self::fixed(Duration::from_secs(5))
    }
}

impl RetryPolicy {
    /// Unbounded attempts with a constant delay.
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            max_attempts: None,
            backoff: Backoff::Fixed(delay),
        }
    }

    /// Unbounded attempts, doubling the delay from `initial` up to `max`.
    pub const fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            max_attempts: None,
            backoff: Backoff::Exponential { initial, max },
        }
    }

    /// Caps the total number of attempts, the first one included.
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub const fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// Whether attempt number `attempt` (1-based) may be made.
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt <= max)
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { initial, max } => {
                let exponent = attempt.saturating_sub(1).min(31);
                initial.saturating_mul(1u32 << exponent).min(max)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_delay_is_constant() {
        let policy = RetryPolicy::fixed(Duration::from_secs(5));
        for attempt in 1..10 {
            assert_eq!(policy.delay_for(attempt), Duration::from_secs(5));
        }
        assert!(policy.allows(u32::MAX));
    }

    #[test]
    fn test_exponential_delay_doubles_and_caps() {
        let policy = RetryPolicy::exponential(Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for(5), Duration::from_secs(1));
        assert_eq!(policy.delay_for(200), Duration::from_secs(1));
    }

    #[test]
    fn test_max_attempts() {
        let policy = RetryPolicy::default().with_max_attempts(3);
        assert!(policy.allows(1));
        assert!(policy.allows(3));
        assert!(!policy.allows(4));
    }
}
