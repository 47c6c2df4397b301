//! Retry and backoff policy for failed steps.
//!
//! `delay = base_delay * 2^attempt`, capped at `max_attempts` attempts per
//! step. Every error kind is retried the same way.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Outcome of consulting the policy after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub retry: bool,
    pub delay: Duration,
}

impl RetryDecision {
    pub fn stop() -> Self {
        Self {
            retry: false,
            delay: Duration::ZERO,
        }
    }
}

/// Retry policy for failed steps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Unit delay in milliseconds, multiplied by 2^attempt
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay() -> u64 {
    1000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay_ms: base_delay.as_millis() as u64,
        }
    }

    /// Retries without sleeping between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    /// Calculate delay after a failed attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }

    /// Decide whether a failed attempt is retried, and after how long.
    ///
    /// The error is not inspected: rate limits, bad credentials and network
    /// failures are all retried alike.
    pub fn should_retry(&self, attempt: u32, _error: &anyhow::Error) -> RetryDecision {
        if attempt < self.max_attempts {
            RetryDecision {
                retry: true,
                delay: self.delay_for_attempt(attempt),
            }
        } else {
            RetryDecision::stop()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
    }

    #[test]
    fn test_should_retry_stops_at_max_attempts() {
        let policy = RetryPolicy::default();
        let error = anyhow::anyhow!("model unavailable");

        let first = policy.should_retry(1, &error);
        assert!(first.retry);
        assert_eq!(first.delay, Duration::from_secs(2));

        assert!(policy.should_retry(2, &error).retry);
        assert_eq!(policy.should_retry(3, &error), RetryDecision::stop());
        assert!(!policy.should_retry(4, &error).retry);
    }

    #[test]
    fn test_policy_yaml_defaults() {
        let policy: RetryPolicy = serde_yaml::from_str("max_attempts: 5").unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay_ms, 1000);
    }

    #[test]
    fn test_immediate_policy_never_sleeps() {
        let policy = RetryPolicy::immediate(3);
        let error = anyhow::anyhow!("rate limited");
        assert_eq!(policy.should_retry(1, &error).delay, Duration::ZERO);
    }
}
