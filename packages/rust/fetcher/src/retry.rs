//! Retry classification and exponential backoff.

use std::time::Duration;

use subharvest_shared::{FetchConfig, FetchOutcome};

/// Upper bound on a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// How many times a source is retried and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each one after.
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_backoff: Duration::from_millis(config.backoff_ms),
        }
    }

    /// Sleep before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32
            .checked_shl(retry.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }

    /// Whether a failed outcome is worth another attempt.
    ///
    /// Timeouts, connection errors, 429 and 5xx are transient; other statuses
    /// will not change on retry.
    pub fn is_transient(outcome: &FetchOutcome) -> bool {
        match outcome {
            FetchOutcome::Success { .. } => false,
            FetchOutcome::Timeout | FetchOutcome::Connection { .. } => true,
            FetchOutcome::Status { code } => *code == 429 || (500..600).contains(code),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&FetchConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 2,
            base_backoff: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(40), MAX_BACKOFF);
    }

    #[test]
    fn transient_classification() {
        assert!(RetryPolicy::is_transient(&FetchOutcome::Timeout));
        assert!(RetryPolicy::is_transient(&FetchOutcome::Status { code: 503 }));
        assert!(RetryPolicy::is_transient(&FetchOutcome::Status { code: 429 }));
        assert!(!RetryPolicy::is_transient(&FetchOutcome::Status { code: 404 }));
        assert!(!RetryPolicy::is_transient(&FetchOutcome::Success {
            body: String::new()
        }));
    }

    #[test]
    fn default_matches_config_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.base_backoff, Duration::from_millis(500));
    }
}
