//! FortiOS client error types.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::config::ErrorMode;
use crate::response::{RequestMetadata, ResponseEnvelope};
use crate::retry::FailureClass;

/// Result type for FortiOS client operations.
pub type Result<T> = std::result::Result<T, FortiOsError>;

/// A malformed request, detected before any network call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    /// Parameter that failed validation.
    pub field: String,
    /// Human-readable message.
    pub message: String,
    /// Constraint that failed (`required`, `enum`, `range`, `filter`).
    pub constraint: String,
    /// Offending value, when one was supplied.
    pub value: Option<String>,
}

impl ValidationError {
    /// Create a new validation error.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            constraint: "custom".to_string(),
            value: None,
        }
    }

    /// Set the constraint name.
    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraint = constraint.into();
        self
    }

    /// Set the invalid value.
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Kind of network-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkFailure {
    /// Connection refused, reset, or otherwise not established.
    Connection,
    /// The attempt exceeded its per-attempt timeout.
    Timeout,
}

impl fmt::Display for NetworkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => f.write_str("connection"),
            Self::Timeout => f.write_str("timeout"),
        }
    }
}

/// FortiOS client errors.
#[derive(Debug, Error)]
pub enum FortiOsError {
    /// Request failed validation and was never sent.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Circuit breaker is open, rejecting requests.
    #[error("Circuit breaker is open for {host}, request rejected")]
    CircuitOpen {
        /// Backend host the breaker protects.
        host: String,
    },

    /// Connection failure or timeout, after retries were exhausted.
    #[error("Network error ({kind}): {message}")]
    TransientNetwork {
        /// Connection or timeout.
        kind: NetworkFailure,
        /// Last error message.
        message: String,
    },

    /// HTTP 5xx, or a backend error reporting a 5xx status.
    #[error("Server error: {status} - {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Backend error code.
        error_code: Option<i64>,
        /// Backend error message.
        message: String,
    },

    /// HTTP 429.
    #[error("Rate limited: {message}")]
    RateLimited {
        /// Server-supplied retry hint.
        retry_after: Option<Duration>,
        /// Backend error message.
        message: String,
    },

    /// HTTP 4xx other than 429, or an application-level error.
    #[error("Request rejected: {status} - {message}")]
    ClientRequest {
        /// HTTP status code.
        status: u16,
        /// Backend error code.
        error_code: Option<i64>,
        /// Backend error message.
        message: String,
    },

    /// Caller cancelled the request.
    #[error("Request cancelled")]
    Cancelled,

    /// The client was closed before the request was issued.
    #[error("Client is closed")]
    Closed,

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),

    /// Invalid client configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport could not be constructed.
    #[error("Transport error: {0}")]
    Transport(String),
}

impl FortiOsError {
    /// Failure class of a backend outcome, if this error is one.
    pub fn failure_class(&self) -> Option<FailureClass> {
        match self {
            Self::TransientNetwork {
                kind: NetworkFailure::Connection,
                ..
            } => Some(FailureClass::Connection),
            Self::TransientNetwork {
                kind: NetworkFailure::Timeout,
                ..
            } => Some(FailureClass::Timeout),
            Self::Server { .. } => Some(FailureClass::Server),
            Self::RateLimited { .. } => Some(FailureClass::RateLimited),
            Self::ClientRequest { .. } => Some(FailureClass::Client),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.failure_class().is_some_and(FailureClass::is_retryable)
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::TransientNetwork {
                kind: NetworkFailure::Timeout,
                ..
            }
        )
    }

    /// Check if this is a connection error.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            Self::TransientNetwork {
                kind: NetworkFailure::Connection,
                ..
            }
        )
    }

    /// Get the HTTP status code if the backend answered.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Server { status, .. } | Self::ClientRequest { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }

    /// Get the backend error code, if one was reported.
    pub fn error_code(&self) -> Option<i64> {
        match self {
            Self::Server { error_code, .. } | Self::ClientRequest { error_code, .. } => *error_code,
            _ => None,
        }
    }
}

/// Apply an error presentation mode to the outcome of a request.
///
/// `Raise` passes the result through, `Return` folds an error into an
/// error-status envelope and `Print` emits the summary and yields `None`.
pub fn present(
    result: Result<ResponseEnvelope>,
    mode: ErrorMode,
    metadata: RequestMetadata,
) -> Result<Option<ResponseEnvelope>> {
    match (result, mode) {
        (Ok(envelope), _) => Ok(Some(envelope)),
        (Err(error), ErrorMode::Raise) => Err(error),
        (Err(error), ErrorMode::Return) => Ok(Some(ResponseEnvelope::from_error(&error, metadata))),
        (Err(error), ErrorMode::Print) => {
            tracing::error!(
                method = %metadata.method,
                path = %metadata.path,
                error = %error,
                "FortiOS request failed"
            );
            Ok(None)
        }
    }
}
