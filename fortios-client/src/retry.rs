//! Retry configuration and policy.

use rand::Rng;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Connection refused, reset, or not established.
    Connection,
    /// Per-attempt timeout elapsed.
    Timeout,
    /// HTTP 5xx, or a backend error reporting a 5xx status.
    Server,
    /// HTTP 429.
    RateLimited,
    /// HTTP 4xx other than 429.
    Client,
    /// Backend reported `status: error` with a non-5xx code.
    Application,
}

impl FailureClass {
    /// Network failures, timeouts, 5xx and 429 are retryable.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Connection | Self::Timeout | Self::Server | Self::RateLimited
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Timeout => "timeout",
            Self::Server => "server",
            Self::RateLimited => "rate_limited",
            Self::Client => "client",
            Self::Application => "application",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for the delay, then attempt again.
    Retry(Duration),
    /// Surface the failure.
    GiveUp,
}

/// Outcome of one physical attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    RetryableFailure,
    FatalFailure,
}

/// One attempt within a logical request's retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    /// 1-based attempt number.
    pub attempt: u32,
    pub delay_before: Duration,
    pub outcome: AttemptOutcome,
}

/// Retry configuration.
///
/// The delay after failed attempt `n` (1-based) is
/// `base_delay * 2^(n-1) * factor`, where `factor` is drawn uniformly from
/// `[1 - jitter, 1 + jitter]`, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Jitter ratio in `0.0..=1.0`.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: 0.5,
        }
    }
}

impl RetryConfig {
    /// Create a retry config with exponential backoff.
    pub fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Default::default()
        }
    }

    /// Create a retry config with no delay.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            jitter: 0.0,
            ..Default::default()
        }
    }

    /// Single attempt, never retry.
    pub fn disabled() -> Self {
        Self::immediate(1)
    }

    /// Set the delay cap.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Set the jitter ratio; clamped to `0.0..=1.0`.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Calculate the delay after failed attempt `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let jitter = if self.jitter.is_finite() {
            self.jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let factor = if jitter > 0.0 {
            rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter))
        } else {
            1.0
        };

        let nanos = self.base_delay.as_nanos() as f64 * 2f64.powi(exponent) * factor;
        let capped = nanos.min(self.max_delay.as_nanos() as f64).round();
        Duration::from_nanos(capped as u64)
    }

    /// Decide whether to retry after failed attempt `attempt` (1-based).
    ///
    /// A server-supplied `retry_after` hint raises the delay, still
    /// bounded by `max_delay`.
    pub fn decide(
        &self,
        class: FailureClass,
        attempt: u32,
        retry_after: Option<Duration>,
    ) -> RetryDecision {
        if !class.is_retryable() || attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }

        let delay = self.delay_for_attempt(attempt);
        let delay = match retry_after {
            Some(hint) => delay.max(hint).min(self.max_delay),
            None => delay,
        };
        RetryDecision::Retry(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff() {
        let config = RetryConfig::exponential(5, Duration::from_millis(100))
            .with_jitter(0.0)
            .with_max_delay(Duration::from_secs(10));

        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = RetryConfig::exponential(50, Duration::from_millis(100))
            .with_jitter(0.0)
            .with_max_delay(Duration::from_secs(1));

        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_bounds() {
        let config = RetryConfig::exponential(5, Duration::from_millis(1000)).with_jitter(0.25);

        for _ in 0..100 {
            let delay = config.delay_for_attempt(1);
            assert!(delay >= Duration::from_millis(750), "{:?}", delay);
            assert!(delay <= Duration::from_millis(1250), "{:?}", delay);
        }
    }

    #[test]
    fn test_decide_retryable_classes() {
        let config = RetryConfig::immediate(3);

        for class in [
            FailureClass::Connection,
            FailureClass::Timeout,
            FailureClass::Server,
            FailureClass::RateLimited,
        ] {
            assert_eq!(config.decide(class, 1, None), RetryDecision::Retry(Duration::ZERO));
        }

        assert_eq!(config.decide(FailureClass::Client, 1, None), RetryDecision::GiveUp);
        assert_eq!(config.decide(FailureClass::Application, 1, None), RetryDecision::GiveUp);
    }

    #[test]
    fn test_decide_caps_attempts() {
        let config = RetryConfig::immediate(3);
        assert!(matches!(config.decide(FailureClass::Server, 2, None), RetryDecision::Retry(_)));
        assert_eq!(config.decide(FailureClass::Server, 3, None), RetryDecision::GiveUp);
        assert_eq!(
            RetryConfig::disabled().decide(FailureClass::Server, 1, None),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn test_retry_after_hint() {
        let config = RetryConfig::exponential(3, Duration::from_millis(100))
            .with_jitter(0.0)
            .with_max_delay(Duration::from_secs(5));

        assert_eq!(
            config.decide(FailureClass::RateLimited, 1, Some(Duration::from_secs(2))),
            RetryDecision::Retry(Duration::from_secs(2))
        );
        assert_eq!(
            config.decide(FailureClass::RateLimited, 1, Some(Duration::from_secs(60))),
            RetryDecision::Retry(Duration::from_secs(5))
        );
    }
}
