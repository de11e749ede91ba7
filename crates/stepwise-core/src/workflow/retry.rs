//! Retry decisions and backoff schedule for failed steps.
//!
//! A step is re-attempted as a whole. Only retryable failures consume the
//! retry budget; a permanent failure ends the step on the attempt it
//! happened.

use std::time::Duration;

use stepwise_types::config::EngineConfig;
use stepwise_types::workflow::RetryPolicy;

// ---------------------------------------------------------------------------
// RetrySchedule
// ---------------------------------------------------------------------------

/// A step's retry policy with engine defaults filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrySchedule {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
}

impl RetrySchedule {
    /// Resolve a step's optional policy against engine configuration.
    pub fn resolve(policy: Option<&RetryPolicy>, config: &EngineConfig) -> Self {
        let max_retries = policy.map_or(config.default_max_retries, |p| p.max_retries);
        let backoff_ms = policy
            .and_then(|p| p.backoff_ms)
            .unwrap_or(config.default_backoff_ms);
        let multiplier = policy
            .and_then(|p| p.backoff_multiplier)
            .unwrap_or(config.backoff_multiplier)
            .max(1.0);
        let max_backoff_ms = policy
            .and_then(|p| p.max_backoff_ms)
            .unwrap_or(config.max_backoff_ms);

        Self {
            max_retries,
            initial_backoff: Duration::from_millis(backoff_ms),
            multiplier,
            max_backoff: Duration::from_millis(max_backoff_ms),
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            multiplier: 1.0,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(32) as i32;
        let ms = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = ms.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }
}

// ---------------------------------------------------------------------------
// RetryHandler
// ---------------------------------------------------------------------------

/// Stateless retry decision logic.
pub struct RetryHandler;

impl RetryHandler {
    /// Whether to try again after `attempt` (1-based) failed.
    pub fn should_retry(schedule: &RetrySchedule, attempt: u32, retryable: bool) -> bool {
        retryable && attempt <= schedule.max_retries
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(max_retries: u32) -> RetrySchedule {
        RetrySchedule {
            max_retries,
            initial_backoff: Duration::from_millis(100),
            multiplier: 2.0,
            max_backoff: Duration::from_millis(350),
        }
    }

    #[test]
    fn test_should_retry_within_budget() {
        let s = schedule(2);
        assert!(RetryHandler::should_retry(&s, 1, true));
        assert!(RetryHandler::should_retry(&s, 2, true));
        assert!(!RetryHandler::should_retry(&s, 3, true));
    }

    #[test]
    fn test_permanent_failure_never_retried() {
        assert!(!RetryHandler::should_retry(&schedule(5), 1, false));
    }

    #[test]
    fn test_zero_retries() {
        assert!(!RetryHandler::should_retry(&RetrySchedule::none(), 1, true));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let s = schedule(5);
        assert_eq!(s.backoff(1), Duration::from_millis(100));
        assert_eq!(s.backoff(2), Duration::from_millis(200));
        assert_eq!(s.backoff(3), Duration::from_millis(350));
        assert_eq!(s.backoff(30), Duration::from_millis(350));
    }

    #[test]
    fn test_resolve_uses_engine_defaults() {
        let config = EngineConfig {
            default_max_retries: 1,
            default_backoff_ms: 250,
            ..Default::default()
        };
        let s = RetrySchedule::resolve(None, &config);
        assert_eq!(s.max_retries, 1);
        assert_eq!(s.initial_backoff, Duration::from_millis(250));
        assert_eq!(s.multiplier, 2.0);

        let policy = RetryPolicy {
            max_retries: 4,
            backoff_ms: Some(10),
            backoff_multiplier: None,
            max_backoff_ms: Some(20),
        };
        let s = RetrySchedule::resolve(Some(&policy), &config);
        assert_eq!(s.max_retries, 4);
        assert_eq!(s.initial_backoff, Duration::from_millis(10));
        assert_eq!(s.max_backoff, Duration::from_millis(20));
    }
}
