//! Request statistics and operation history.
//!
//! Tracking never fails and never affects the request it observes: the
//! counters saturate instead of underflowing and the history buffers drop
//! their oldest entry once full.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::circuit_breaker::{CircuitBreakerSnapshot, CircuitState};
use crate::request::HttpMethod;
use crate::retry::FailureClass;

/// Final outcome of one attempt, as logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestOutcome {
    Success,
    Failure,
    Cancelled,
}

/// One completed attempt in the operation history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationLogEntry {
    pub timestamp: DateTime<Utc>,
    pub method: HttpMethod,
    pub endpoint: String,
    pub params: Vec<(String, String)>,
    pub duration: Duration,
    /// HTTP status, when a response was received.
    pub status_code: Option<u16>,
    pub success: bool,
    pub outcome: RequestOutcome,
}

/// Connection counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStats {
    pub total_requests: u64,
    pub active_requests: u64,
    pub pool_exhaustion_count: u64,
    pub max_connections: usize,
    pub consecutive_failures: u32,
    pub circuit_breaker: CircuitBreakerSnapshot,
}

/// Aggregate health view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub cancelled_requests: u64,
    /// Successes over completed, non-cancelled attempts; 1.0 before any.
    pub success_rate: f64,
    pub average_response_time: Duration,
    pub last_response_time: Option<Duration>,
    pub circuit_state: CircuitState,
    pub consecutive_failures: u32,
    /// Circuit closed and success rate at least 0.5.
    pub healthy: bool,
}

/// Retry counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetryStats {
    pub total_retries: u64,
    pub retries_by_class: HashMap<FailureClass, u64>,
    /// Logical requests that succeeded after at least one retry.
    pub recovered_requests: u64,
    /// Logical requests that failed with retries exhausted.
    pub exhausted_requests: u64,
    pub last_retry_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct TrackerState {
    total: u64,
    active: u64,
    pool_exhaustion: u64,
    successes: u64,
    failures: u64,
    cancelled: u64,
    total_duration: Duration,
    last_duration: Option<Duration>,
    operations: VecDeque<OperationLogEntry>,
    write_operations: VecDeque<OperationLogEntry>,
    retry: RetryStats,
}

/// Observability counters shared by all requests on a client.
#[derive(Debug)]
pub struct StatsTracker {
    capacity: usize,
    max_connections: usize,
    inner: Mutex<TrackerState>,
}

impl StatsTracker {
    /// `capacity` bounds each history buffer; `max_connections` of 0
    /// disables exhaustion accounting.
    pub fn new(capacity: usize, max_connections: usize) -> Self {
        Self {
            capacity,
            max_connections,
            inner: Mutex::new(TrackerState::default()),
        }
    }

    /// An attempt is starting.
    pub fn on_request_start(&self) {
        let mut inner = self.inner.lock();
        if self.max_connections > 0 && inner.active >= self.max_connections as u64 {
            inner.pool_exhaustion = inner.pool_exhaustion.saturating_add(1);
        }
        inner.active = inner.active.saturating_add(1);
        inner.total = inner.total.saturating_add(1);
    }

    /// An attempt waited for a free connection slot.
    pub fn record_pool_exhaustion(&self) {
        let mut inner = self.inner.lock();
        inner.pool_exhaustion = inner.pool_exhaustion.saturating_add(1);
    }

    /// An attempt finished. Mutating methods also go to the write history.
    pub fn on_request_end(&self, entry: OperationLogEntry) {
        let mut inner = self.inner.lock();
        inner.active = inner.active.saturating_sub(1);

        match entry.outcome {
            RequestOutcome::Success => inner.successes = inner.successes.saturating_add(1),
            RequestOutcome::Failure => inner.failures = inner.failures.saturating_add(1),
            RequestOutcome::Cancelled => inner.cancelled = inner.cancelled.saturating_add(1),
        }
        if entry.outcome != RequestOutcome::Cancelled {
            inner.total_duration = inner.total_duration.saturating_add(entry.duration);
            inner.last_duration = Some(entry.duration);
        }

        if self.capacity == 0 {
            return;
        }
        if entry.method.is_write() {
            push_bounded(&mut inner.write_operations, entry.clone(), self.capacity);
        }
        push_bounded(&mut inner.operations, entry, self.capacity);
    }

    /// A retry is about to happen after a failure of `class`.
    pub fn record_retry(&self, class: FailureClass) {
        let mut inner = self.inner.lock();
        inner.retry.total_retries = inner.retry.total_retries.saturating_add(1);
        *inner.retry.retries_by_class.entry(class).or_insert(0) += 1;
        inner.retry.last_retry_at = Some(Utc::now());
    }

    /// A logical request succeeded after retrying.
    pub fn record_recovered(&self) {
        let mut inner = self.inner.lock();
        inner.retry.recovered_requests = inner.retry.recovered_requests.saturating_add(1);
    }

    /// A logical request failed with its attempts exhausted.
    pub fn record_exhausted(&self) {
        let mut inner = self.inner.lock();
        inner.retry.exhausted_requests = inner.retry.exhausted_requests.saturating_add(1);
    }

    pub fn connection_stats(&self, breaker: CircuitBreakerSnapshot) -> ConnectionStats {
        let inner = self.inner.lock();
        ConnectionStats {
            total_requests: inner.total,
            active_requests: inner.active,
            pool_exhaustion_count: inner.pool_exhaustion,
            max_connections: self.max_connections,
            consecutive_failures: breaker.consecutive_failures,
            circuit_breaker: breaker,
        }
    }

    pub fn health_metrics(&self, breaker: CircuitBreakerSnapshot) -> HealthMetrics {
        let inner = self.inner.lock();
        let completed = inner.successes + inner.failures;
        let success_rate = if completed == 0 {
            1.0
        } else {
            inner.successes as f64 / completed as f64
        };
        let average_response_time = if completed == 0 {
            Duration::ZERO
        } else {
            inner.total_duration / completed.min(u32::MAX as u64) as u32
        };

        HealthMetrics {
            total_requests: inner.total,
            successful_requests: inner.successes,
            failed_requests: inner.failures,
            cancelled_requests: inner.cancelled,
            success_rate,
            average_response_time,
            last_response_time: inner.last_duration,
            circuit_state: breaker.state,
            consecutive_failures: breaker.consecutive_failures,
            healthy: breaker.state == CircuitState::Closed && success_rate >= 0.5,
        }
    }

    pub fn retry_stats(&self) -> RetryStats {
        self.inner.lock().retry.clone()
    }

    /// Operation history, oldest first.
    pub fn operations(&self) -> Vec<OperationLogEntry> {
        self.inner.lock().operations.iter().cloned().collect()
    }

    /// Write-operation history, oldest first.
    pub fn write_operations(&self) -> Vec<OperationLogEntry> {
        self.inner.lock().write_operations.iter().cloned().collect()
    }

    /// Most recently completed attempt.
    pub fn last_request(&self) -> Option<OperationLogEntry> {
        self.inner.lock().operations.back().cloned()
    }
}

fn push_bounded(buffer: &mut VecDeque<OperationLogEntry>, entry: OperationLogEntry, capacity: usize) {
    while buffer.len() >= capacity {
        buffer.pop_front();
    }
    buffer.push_back(entry);
}
