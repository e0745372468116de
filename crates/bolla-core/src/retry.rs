//! Retry policy for transient collaborator failures
//!
//! Exponential backoff with optional jitter. Callers drive their own retry
//! loops (the uploader needs record-granularity bookkeeping between
//! attempts); this module owns the attempt ceiling and delay schedule.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts (1 = no retries).
    pub max_attempts: u32,
    /// Base delay, doubled after every failed attempt.
    pub base_delay_ms: u64,
    /// Cap on any single delay.
    pub max_delay_ms: u64,
    /// Whether to randomize delays to avoid thundering herds.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2_000,
            max_delay_ms: 60_000,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Delay to sleep after the given zero-based failed attempt.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay_ms
            .saturating_mul(1u64 << attempt.min(20))
            .min(self.max_delay_ms);

        let millis = if self.jitter && exp > 0 {
            // Uniform in [exp/2, exp]: keeps the schedule roughly
            // exponential while decorrelating concurrent retriers.
            rand::thread_rng().gen_range(exp / 2..=exp)
        } else {
            exp
        };

        Duration::from_millis(millis)
    }

    /// True when another attempt is allowed after `attempt` failures.
    pub fn should_retry(&self, failed_attempts: u32) -> bool {
        failed_attempts < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(base: u64, max: u64, attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts: attempts,
            base_delay_ms: base,
            max_delay_ms: max,
            jitter: false,
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let config = no_jitter(100, 10_000, 5);
        assert_eq!(config.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(config.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(config.backoff_delay(2), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_capped() {
        let config = no_jitter(100, 250, 5);
        assert_eq!(config.backoff_delay(4), Duration::from_millis(250));
        // Large attempt numbers must not overflow.
        assert_eq!(config.backoff_delay(u32::MAX), Duration::from_millis(250));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let config = RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            jitter: true,
        };
        for _ in 0..50 {
            let d = config.backoff_delay(1).as_millis() as u64;
            assert!((1_000..=2_000).contains(&d), "delay {} out of range", d);
        }
    }

    #[test]
    fn test_should_retry_ceiling() {
        let config = no_jitter(1, 1, 3);
        assert!(config.should_retry(0));
        assert!(config.should_retry(2));
        assert!(!config.should_retry(3));
    }
}
