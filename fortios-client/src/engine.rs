//! Shared request pipeline behind the async and blocking clients.
//!
//! Both flavours drive the same per-attempt state machine: gate on the
//! circuit breaker, send, classify the outcome, record it, then either
//! finish or sleep and go again. Only the send and the sleep differ.

use bytes::Bytes;
use chrono::Utc;
use http::{HeaderMap, HeaderValue, header};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::clock::Clock;
use crate::config::ClientConfig;
use crate::error::{FortiOsError, NetworkFailure, Result, ValidationError};
use crate::request::{HttpMethod, IntoRequest, RequestDescriptor, is_dot_segment};
use crate::response::{RequestMetadata, ResponseEnvelope};
use crate::retry::{AttemptOutcome, AttemptRecord, FailureClass, RetryDecision};
use crate::stats::{
    ConnectionStats, HealthMetrics, OperationLogEntry, RequestOutcome, RetryStats, StatsTracker,
};
use crate::transport::{TransportError, TransportRequest, TransportResponse};

/// Observability and lifecycle surface shared by both client flavours.
pub trait ResilientClient {
    #[doc(hidden)]
    fn core(&self) -> &ClientCore;

    /// Connection counters and the breaker snapshot.
    fn connection_stats(&self) -> ConnectionStats {
        let core = self.core();
        core.stats.connection_stats(core.breaker.snapshot())
    }

    /// Aggregate success rate, latency and breaker health.
    fn health_metrics(&self) -> HealthMetrics {
        let core = self.core();
        core.stats.health_metrics(core.breaker.snapshot())
    }

    fn retry_stats(&self) -> RetryStats {
        self.core().stats.retry_stats()
    }

    fn circuit_breaker_state(&self) -> CircuitState {
        self.core().breaker.state()
    }

    /// Recent attempts, oldest first.
    fn operations(&self) -> Vec<OperationLogEntry> {
        self.core().stats.operations()
    }

    /// Recent POST, PUT and DELETE attempts, oldest first.
    fn write_operations(&self) -> Vec<OperationLogEntry> {
        self.core().stats.write_operations()
    }

    fn last_request(&self) -> Option<OperationLogEntry> {
        self.core().stats.last_request()
    }

    /// Force the breaker closed and clear its failure count.
    fn reset_circuit_breaker(&self) {
        self.core().breaker.reset();
    }

    /// Refuse further requests. Requests already running finish normally.
    fn close(&self) {
        self.core().close();
    }

    fn is_closed(&self) -> bool {
        self.core().is_closed()
    }
}

/// State owned by one client instance.
#[derive(Debug)]
pub struct ClientCore {
    pub(crate) config: ClientConfig,
    base_url: Url,
    pub(crate) breaker: CircuitBreaker,
    pub(crate) stats: StatsTracker,
    closed: AtomicBool,
}

impl ClientCore {
    pub(crate) fn new(config: ClientConfig, clock: impl Clock) -> Result<Self> {
        config.validate()?;
        let base_url = config.base_url()?;
        let breaker = CircuitBreaker::with_clock(config.circuit_breaker.clone(), clock);
        let stats = StatsTracker::new(config.operation_log_capacity, config.max_connections);

        Ok(Self {
            config,
            base_url,
            breaker,
            stats,
            closed: AtomicBool::new(false),
        })
    }

    pub(crate) fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(host = %self.config.host, "FortiOS client closed");
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Validate and render a request. Nothing is sent and nothing is
    /// recorded when this fails.
    pub(crate) fn prepare(&self, request: impl IntoRequest) -> Result<Prepared> {
        if self.is_closed() {
            return Err(FortiOsError::Closed);
        }

        let descriptor = request.into_request()?;
        let url = self.render_url(&descriptor)?;
        let headers = self.headers(descriptor.body().is_some())?;
        let body = descriptor
            .body()
            .map(|body| serde_json::to_vec(body).map(Bytes::from))
            .transpose()
            .map_err(|e| FortiOsError::Json(e.to_string()))?;

        Ok(Prepared {
            metadata: descriptor.metadata(),
            params: descriptor.query().to_pairs(),
            transport: TransportRequest {
                method: descriptor.method().to_http(),
                url,
                headers,
                body,
                timeout: self.config.timeout,
            },
        })
    }

    fn render_url(&self, descriptor: &RequestDescriptor) -> Result<Url> {
        let endpoint = descriptor.endpoint();
        if endpoint.split('/').any(is_dot_segment) {
            return Err(ValidationError::new("path", "must not contain '.' or '..' segments")
                .with_constraint("path")
                .with_value(endpoint)
                .into());
        }
        let mut url = self
            .base_url
            .join(&endpoint)
            .map_err(|e| FortiOsError::InvalidUrl(format!("{}: {}", endpoint, e)))?;

        let mut pairs = descriptor.query().to_pairs();
        if let Some((key, value)) = descriptor.scope().query_pair(self.config.vdom.as_deref()) {
            pairs.push((key.to_string(), value));
        }
        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }
        Ok(url)
    }

    fn headers(&self, has_body: bool) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        if has_body {
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        if let Some(token) = &self.config.token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| FortiOsError::Config("token is not a valid header value".to_string()))?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Ask the breaker for permission to make an attempt. Returns whether
    /// the attempt is the half-open probe.
    pub(crate) fn gate(&self) -> Result<bool> {
        self.breaker.admit().ok_or_else(|| {
            debug!(host = %self.config.host, "Request rejected by open circuit");
            FortiOsError::CircuitOpen {
                host: self.config.host.clone(),
            }
        })
    }

    /// Start tracking an attempt.
    pub(crate) fn begin<'a>(&'a self, prepared: &Prepared, probe: bool) -> InFlight<'a> {
        self.stats.on_request_start();
        InFlight {
            core: self,
            method: prepared.metadata.method,
            endpoint: prepared.metadata.path.clone(),
            params: prepared.params.clone(),
            started: Instant::now(),
            probe,
            finished: false,
        }
    }

    /// Classify and record the outcome of attempt `attempt` (1-based), then
    /// decide what happens next.
    pub(crate) fn complete(
        &self,
        prepared: &Prepared,
        log: &mut AttemptLog,
        in_flight: InFlight<'_>,
        outcome: std::result::Result<TransportResponse, TransportError>,
    ) -> Step {
        let attempt = log.current();
        let metadata = prepared.metadata.clone();
        let (status_code, retry_after, failure) = match outcome {
            Ok(response) => {
                let status = response.status;
                let retry_after = response.retry_after();
                match classify_response(response, metadata) {
                    Ok(envelope) => {
                        self.breaker.record_success();
                        in_flight.finish(Some(status), RequestOutcome::Success);
                        log.push(AttemptOutcome::Success);
                        if attempt > 1 {
                            self.stats.record_recovered();
                            debug!(attempt, endpoint = %prepared.metadata.path, "Request recovered after retry");
                        }
                        return Step::Done(Ok(envelope));
                    }
                    Err(failure) => (Some(status), retry_after, failure),
                }
            }
            Err(error) => (None, None, classify_transport(error)),
        };

        let (class, error) = failure;
        let decision = match class {
            Some(class) => self.config.retry.decide(class, attempt, retry_after),
            None => RetryDecision::GiveUp,
        };

        // The breaker sees one failure per logical request, at its terminal
        // attempt. A failed half-open attempt reopens it at once.
        let counts = class.is_none_or(|c| c.is_retryable())
            || self.config.circuit_breaker.count_client_errors;
        let terminal = !matches!(decision, RetryDecision::Retry(_));
        if matches!(error, FortiOsError::Transport(_)) {
            // Never reached the backend.
            if in_flight.probe {
                self.breaker.abandon_probe();
            }
        } else if !counts {
            // The backend answered.
            self.breaker.record_success();
        } else if terminal || in_flight.probe {
            self.breaker.record_failure();
        }
        in_flight.finish(status_code, RequestOutcome::Failure);

        match (decision, class) {
            (RetryDecision::Retry(delay), Some(class)) => {
                log.push(AttemptOutcome::RetryableFailure);
                log.pending_delay = delay;
                self.stats.record_retry(class);
                debug!(
                    attempt,
                    class = %class,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying FortiOS request"
                );
                log.last_error = Some(error);
                Step::Retry(delay)
            }
            _ => {
                if class.is_some_and(FailureClass::is_retryable) {
                    log.push(AttemptOutcome::RetryableFailure);
                    self.stats.record_exhausted();
                } else {
                    log.push(AttemptOutcome::FatalFailure);
                }
                warn!(
                    attempt,
                    waited_ms = log.waited().as_millis() as u64,
                    history = ?log.records(),
                    method = %prepared.metadata.method,
                    endpoint = %prepared.metadata.path,
                    error = %error,
                    "FortiOS request failed"
                );
                Step::Done(Err(error))
            }
        }
    }

    /// Rejection at the gate. A retry refused after a real failure surfaces
    /// that failure rather than the open circuit.
    pub(crate) fn rejected(&self, log: &mut AttemptLog, error: FortiOsError) -> FortiOsError {
        let Some(last) = log.last_error.take() else {
            return error;
        };
        self.stats.record_exhausted();
        warn!(
            attempts = log.records().len(),
            history = ?log.records(),
            error = %last,
            "FortiOS request failed, retry refused by open circuit"
        );
        last
    }
}

/// A validated request, ready to send any number of times.
#[derive(Debug, Clone)]
pub(crate) struct Prepared {
    pub(crate) metadata: RequestMetadata,
    pub(crate) params: Vec<(String, String)>,
    pub(crate) transport: TransportRequest,
}

/// Attempts made so far by one logical request.
#[derive(Debug, Default)]
pub(crate) struct AttemptLog {
    records: Vec<AttemptRecord>,
    pending_delay: Duration,
    last_error: Option<FortiOsError>,
}

impl AttemptLog {
    /// 1-based number of the attempt about to be made.
    pub(crate) fn current(&self) -> u32 {
        self.records.len() as u32 + 1
    }

    pub(crate) fn records(&self) -> &[AttemptRecord] {
        &self.records
    }

    /// Total backoff slept between attempts.
    pub(crate) fn waited(&self) -> Duration {
        self.records.iter().map(|r| r.delay_before).sum()
    }

    fn push(&mut self, outcome: AttemptOutcome) {
        let attempt = self.current();
        self.records.push(AttemptRecord {
            attempt,
            delay_before: std::mem::take(&mut self.pending_delay),
            outcome,
        });
    }
}

/// What the retry loop does after an attempt.
#[derive(Debug)]
pub(crate) enum Step {
    Done(Result<ResponseEnvelope>),
    Retry(Duration),
}

/// Tracks one in-flight attempt.
///
/// Dropping it without calling `finish` (the future was dropped or the
/// caller cancelled) logs the attempt as cancelled and gives back the
/// breaker probe, if this attempt held it.
pub(crate) struct InFlight<'a> {
    core: &'a ClientCore,
    method: HttpMethod,
    endpoint: String,
    params: Vec<(String, String)>,
    started: Instant,
    probe: bool,
    finished: bool,
}

impl InFlight<'_> {
    fn finish(mut self, status_code: Option<u16>, outcome: RequestOutcome) {
        self.finished = true;
        self.record(status_code, outcome);
    }

    fn record(&mut self, status_code: Option<u16>, outcome: RequestOutcome) {
        let entry = OperationLogEntry {
            timestamp: Utc::now(),
            method: self.method,
            endpoint: std::mem::take(&mut self.endpoint),
            params: std::mem::take(&mut self.params),
            duration: self.started.elapsed(),
            status_code,
            success: outcome == RequestOutcome::Success,
            outcome,
        };
        self.core.stats.on_request_end(entry);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        debug!(endpoint = %self.endpoint, "FortiOS request cancelled");
        if self.probe {
            self.core.breaker.abandon_probe();
        }
        self.record(None, RequestOutcome::Cancelled);
    }
}

type Failure = (Option<FailureClass>, FortiOsError);

fn classify_transport(error: TransportError) -> Failure {
    match error {
        TransportError::Connect(message) => (
            Some(FailureClass::Connection),
            FortiOsError::TransientNetwork {
                kind: NetworkFailure::Connection,
                message,
            },
        ),
        TransportError::Local(message) => (None, FortiOsError::Transport(message)),
        TransportError::Timeout(after) => (
            Some(FailureClass::Timeout),
            FortiOsError::TransientNetwork {
                kind: NetworkFailure::Timeout,
                message: format!("no response within {:?}", after),
            },
        ),
    }
}

/// Turn a received response into an envelope or a classified failure.
///
/// A 2xx whose body cannot be decoded has no failure class: it is fatal
/// and never retried.
fn classify_response(
    response: TransportResponse,
    metadata: RequestMetadata,
) -> std::result::Result<ResponseEnvelope, Failure> {
    let status = response.status;

    if (200..300).contains(&status) {
        let envelope =
            ResponseEnvelope::parse(status, &response.body, metadata).map_err(|e| (None, e))?;
        if envelope.is_success() {
            return Ok(envelope);
        }

        let reported = envelope.reported_status.unwrap_or(status);
        let message = envelope
            .error_message
            .clone()
            .unwrap_or_else(|| "backend reported an error".to_string());
        return Err(if reported >= 500 {
            (
                Some(FailureClass::Server),
                FortiOsError::Server {
                    status: reported,
                    error_code: envelope.error_code,
                    message,
                },
            )
        } else {
            (
                Some(FailureClass::Application),
                FortiOsError::ClientRequest {
                    status: reported,
                    error_code: envelope.error_code,
                    message,
                },
            )
        });
    }

    let envelope = ResponseEnvelope::parse_lenient(status, &response.body, metadata);
    let message = envelope
        .error_message
        .unwrap_or_else(|| format!("HTTP {}", status));

    Err(match status {
        429 => (
            Some(FailureClass::RateLimited),
            FortiOsError::RateLimited {
                retry_after: response.retry_after(),
                message,
            },
        ),
        500.. => (
            Some(FailureClass::Server),
            FortiOsError::Server {
                status,
                error_code: envelope.error_code,
                message,
            },
        ),
        _ => (
            Some(FailureClass::Client),
            FortiOsError::ClientRequest {
                status,
                error_code: envelope.error_code,
                message,
            },
        ),
    })
}
