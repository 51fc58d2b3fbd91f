//! Circuit breaker pattern implementation.

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, requests are allowed.
    Closed,
    /// Circuit is open, requests are rejected.
    Open,
    /// Cooldown elapsed; a single probe request is in flight.
    HalfOpen,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures to open the circuit.
    pub failure_threshold: u32,
    /// Time to wait after the last failure before allowing a probe.
    pub cooldown: Duration,
    /// Whether non-retryable backend answers (4xx, application errors)
    /// count as failures.
    pub count_client_errors: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            count_client_errors: true,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new circuit breaker config.
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            ..Default::default()
        }
    }

    /// Set whether client errors count as breaker failures.
    pub fn with_count_client_errors(mut self, count: bool) -> Self {
        self.count_client_errors = count;
        self
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub cooldown: Duration,
    /// Time since the last recorded failure.
    pub since_last_failure: Option<Duration>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
}

/// Per-backend circuit breaker. Never fails; queried and updated by the
/// clients around every attempt.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker on the system clock.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }

    /// Create a circuit breaker on a custom clock.
    pub fn with_clock(config: CircuitBreakerConfig, clock: impl Clock) -> Self {
        Self {
            config,
            clock: Arc::new(clock),
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
            }),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get the current circuit state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Check if an attempt may be made.
    ///
    /// When open and the cooldown has elapsed, moves to half-open and
    /// grants exactly one probe.
    pub fn may_attempt(&self) -> bool {
        self.admit().is_some()
    }

    /// Like [`may_attempt`](Self::may_attempt), but also reports whether the
    /// granted attempt is the half-open probe. Decided under one lock, so
    /// only the caller that moved the breaker to half-open holds the probe.
    pub(crate) fn admit(&self) -> Option<bool> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => Some(false),
            CircuitState::HalfOpen => None,
            CircuitState::Open => {
                let cooled = inner
                    .last_failure
                    .is_none_or(|at| now.saturating_duration_since(at) >= self.config.cooldown);
                if !cooled {
                    return None;
                }
                debug!("Circuit breaker transitioning to half-open");
                inner.state = CircuitState::HalfOpen;
                Some(true)
            }
        }
    }

    /// Record a successful attempt.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;

        if inner.state == CircuitState::HalfOpen {
            info!("Circuit breaker closing");
            inner.state = CircuitState::Closed;
        }
    }

    /// Record a failed attempt.
    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure = Some(now);

        match inner.state {
            CircuitState::Closed if inner.consecutive_failures >= self.config.failure_threshold => {
                warn!(
                    failures = inner.consecutive_failures,
                    "Circuit breaker opening"
                );
                inner.state = CircuitState::Open;
            }
            CircuitState::HalfOpen => {
                warn!("Circuit breaker probe failed, reopening");
                inner.state = CircuitState::Open;
            }
            _ => {}
        }
    }

    /// Give back a probe that never produced an outcome. The breaker returns
    /// to open without counting a failure, so the next cooldown check can
    /// grant a fresh probe.
    pub fn abandon_probe(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            debug!("Circuit breaker probe abandoned");
            inner.state = CircuitState::Open;
        }
    }

    /// Get consecutive failure count.
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// Reset the circuit breaker to closed state.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.last_failure = None;
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let now = self.clock.now();
        let inner = self.inner.lock();
        CircuitBreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            failure_threshold: self.config.failure_threshold,
            cooldown: self.config.cooldown,
            since_last_failure: inner.last_failure.map(|at| now.saturating_duration_since(at)),
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("inner", &*self.inner.lock())
            .finish()
    }
}
