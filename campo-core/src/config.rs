//! Engine tuning.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::GatewayError;

/// How often the sync worker looks at the queue.
pub const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_secs(3);

/// Timeout for a single remote request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How often the optional health probe runs.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub drain_interval: Duration,
    pub request_timeout: Duration,
    pub probe_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            drain_interval: DEFAULT_DRAIN_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            retry: RetryPolicy::default(),
        }
    }
}

/// What the worker does with a mutation whose replay failed.
///
/// With the default `max_attempts` of 1 every failed mutation is dropped
/// after its first replay attempt. Raising it keeps mutations that failed
/// with a retryable error at the head of the queue, with exponential
/// backoff between attempts. Rejections are always dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Drop every failure after one attempt.
    pub fn drop_on_failure() -> Self {
        Self::default()
    }

    /// Keep retrying transient failures up to `max_attempts` times.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Delay before the next attempt, or `None` if the mutation should be
    /// dropped. `attempts` counts the attempt that just failed.
    pub fn next_delay(&self, attempts: u32, error: &GatewayError) -> Option<Duration> {
        if !error.is_retryable() || attempts >= self.max_attempts {
            return None;
        }
        let exponent = attempts.saturating_sub(1).min(16);
        let delay = self.initial_backoff.saturating_mul(1u32 << exponent);
        Some(delay.min(self.max_backoff))
    }

    /// Wall-clock time of the next attempt.
    pub(crate) fn retry_at(&self, now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
        now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transient() -> GatewayError {
        GatewayError::Transient("connection refused".into())
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.drain_interval, Duration::from_secs(3));
        assert_eq!(config.retry.max_attempts, 1);
    }

    #[test]
    fn test_default_policy_drops_after_one_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(1, &transient()), None);
    }

    #[test]
    fn test_rejections_are_never_retried() {
        let policy = RetryPolicy::default().with_max_attempts(10);
        let rejected = GatewayError::Rejected {
            status: 400,
            message: "bad".into(),
        };
        assert_eq!(policy.next_delay(1, &rejected), None);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 20,
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(60),
        };
        assert_eq!(policy.next_delay(1, &transient()), Some(Duration::from_secs(5)));
        assert_eq!(policy.next_delay(2, &transient()), Some(Duration::from_secs(10)));
        assert_eq!(policy.next_delay(3, &transient()), Some(Duration::from_secs(20)));
        assert_eq!(policy.next_delay(5, &transient()), Some(Duration::from_secs(60)));
        assert_eq!(policy.next_delay(20, &transient()), None);
    }

    #[test]
    fn test_max_attempts_is_at_least_one() {
        assert_eq!(RetryPolicy::default().with_max_attempts(0).max_attempts, 1);
    }
}
