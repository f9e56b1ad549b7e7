//! Retry Policy and Jittered Backoff
//!
//! Delay before retry `k` (0-indexed) is
//! `min(base_delay * 2^k + uniform(0, jitter_max), max_delay)`, with the
//! jitter redrawn for every attempt.

use crate::error::OperationError;
use backoff::backoff::Backoff;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// =============================================================================
// Retry Policy
// =============================================================================

/// Retry configuration for a transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries allowed after the initial attempt
    pub max_retries: u32,
    /// Base delay in milliseconds, doubled per retry
    pub base_delay_ms: u64,
    /// Upper bound of the uniform jitter added to every delay
    pub jitter_max_ms: u64,
    /// Hard cap on a single delay
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            jitter_max_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay before retry `attempt` for a given jitter draw
    pub fn delay_for_attempt(&self, attempt: u32, jitter_ms: u64) -> Duration {
        let exponential = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        let delay_ms = exponential
            .saturating_add(jitter_ms)
            .min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    /// Whether a failure at `attempt` (0 = initial call) should be retried
    pub fn should_retry(&self, attempt: u32, error: &OperationError) -> bool {
        attempt < self.max_retries && error.kind.is_retryable()
    }

    /// Backoff schedule for one logical call
    pub fn backoff(&self) -> JitteredBackoff {
        JitteredBackoff::new(self.clone())
    }
}

// =============================================================================
// Jittered Backoff
// =============================================================================

/// Exponential backoff with additive uniform jitter and a retry budget
///
/// Yields `None` once `max_retries` delays have been handed out, which ends
/// the retry loop.
#[derive(Debug, Clone)]
pub struct JitteredBackoff {
    policy: RetryPolicy,
    attempt: u32,
}

impl JitteredBackoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Retries handed out so far
    pub fn retries(&self) -> u32 {
        self.attempt
    }

    fn draw_jitter(&self) -> u64 {
        if self.policy.jitter_max_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.policy.jitter_max_ms)
        }
    }
}

impl Backoff for JitteredBackoff {
    fn reset(&mut self) {
        self.attempt = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_retries {
            return None;
        }
        let delay = self
            .policy
            .delay_for_attempt(self.attempt, self.draw_jitter());
        self.attempt += 1;
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay_ms: 1000,
            jitter_max_ms: 1000,
            max_delay_ms: 30_000,
        };

        assert_eq!(policy.delay_for_attempt(0, 0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(1, 0), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(2, 250), Duration::from_millis(4250));
        assert_eq!(policy.delay_for_attempt(5, 999), Duration::from_millis(30_000));
        assert_eq!(policy.delay_for_attempt(63, 0), Duration::from_millis(30_000));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = RetryPolicy {
            max_retries: 50,
            base_delay_ms: 10,
            jitter_max_ms: 1000,
            max_delay_ms: 30_000,
        };
        let mut backoff = policy.backoff();

        for attempt in 0..10 {
            let delay = backoff.next_backoff().unwrap();
            let floor = policy.delay_for_attempt(attempt, 0);
            assert!(delay >= floor);
            assert!(delay <= floor + Duration::from_millis(1000));
        }
    }

    #[test]
    fn test_backoff_budget() {
        let mut backoff = RetryPolicy {
            max_retries: 3,
            base_delay_ms: 1,
            jitter_max_ms: 0,
            max_delay_ms: 100,
        }
        .backoff();

        assert!(backoff.next_backoff().is_some());
        assert!(backoff.next_backoff().is_some());
        assert!(backoff.next_backoff().is_some());
        assert!(backoff.next_backoff().is_none());
        assert_eq!(backoff.retries(), 3);

        backoff.reset();
        assert_eq!(backoff.retries(), 0);
        assert!(backoff.next_backoff().is_some());
    }

    #[test]
    fn test_should_retry_predicate() {
        let policy = RetryPolicy::default();
        let server = OperationError::from_status(502, "");
        let limited = OperationError::from_status(429, "");
        let missing = OperationError::from_status(404, "");
        let reset = OperationError::transient("connection reset");

        assert!(policy.should_retry(0, &server));
        assert!(policy.should_retry(2, &limited));
        assert!(policy.should_retry(1, &reset));
        assert!(!policy.should_retry(3, &server));
        assert!(!policy.should_retry(0, &missing));
        assert!(!RetryPolicy::no_retry().should_retry(0, &server));
    }
}
