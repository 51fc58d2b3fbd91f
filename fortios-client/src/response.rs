//! Normalized FortiOS response envelope.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FortiOsError, Result};
use crate::request::{HttpMethod, Scope};

/// Logical outcome reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalStatus {
    Success,
    Error,
}

/// Request details echoed into every envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestMetadata {
    pub method: HttpMethod,
    /// `{api_type}/{path}`.
    pub path: String,
    pub scope: Scope,
}

/// Response to one completed attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseEnvelope {
    /// HTTP status of the response, or 0 when no response was received.
    pub http_status: u16,
    pub status: LogicalStatus,
    /// `results` field: an object, a list of objects, or absent.
    pub results: Option<Value>,
    pub error_code: Option<i64>,
    pub error_message: Option<String>,
    /// `http_status` as reported inside the body, when present.
    pub reported_status: Option<u16>,
    pub vdom: Option<String>,
    pub serial: Option<String>,
    pub version: Option<String>,
    pub build: Option<i64>,
    pub request: RequestMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct BackendBody {
    http_status: Option<u16>,
    status: Option<String>,
    results: Option<Value>,
    error: Option<i64>,
    message: Option<String>,
    vdom: Option<String>,
    serial: Option<String>,
    version: Option<String>,
    build: Option<i64>,
}

impl ResponseEnvelope {
    /// Parse a backend response body.
    pub fn parse(http_status: u16, body: &[u8], request: RequestMetadata) -> Result<Self> {
        let backend = if body.iter().all(u8::is_ascii_whitespace) {
            BackendBody::default()
        } else {
            match serde_json::from_slice::<Value>(body).map_err(|e| FortiOsError::Json(e.to_string()))? {
                object @ Value::Object(_) => {
                    serde_json::from_value(object).map_err(|e| FortiOsError::Json(e.to_string()))?
                }
                other => BackendBody {
                    results: Some(other),
                    ..Default::default()
                },
            }
        };
        Ok(Self::from_backend(http_status, backend, request))
    }

    /// Parse a body that may not be JSON (proxy error pages and the like);
    /// undecodable text becomes the error message.
    pub fn parse_lenient(http_status: u16, body: &[u8], request: RequestMetadata) -> Self {
        match Self::parse(http_status, body, request.clone()) {
            Ok(envelope) => envelope,
            Err(_) => {
                let text = String::from_utf8_lossy(body).trim().to_string();
                let backend = BackendBody {
                    message: (!text.is_empty()).then_some(text),
                    ..Default::default()
                };
                Self::from_backend(http_status, backend, request)
            }
        }
    }

    fn from_backend(http_status: u16, backend: BackendBody, request: RequestMetadata) -> Self {
        let reported_error = backend.status.as_deref() == Some("error");
        let status = if (200..300).contains(&http_status) && !reported_error {
            LogicalStatus::Success
        } else {
            LogicalStatus::Error
        };

        Self {
            http_status,
            status,
            results: backend.results,
            error_code: backend.error,
            error_message: backend.message,
            reported_status: backend.http_status,
            vdom: backend.vdom,
            serial: backend.serial,
            version: backend.version,
            build: backend.build,
            request,
        }
    }

    /// Fold an error into an error-status envelope.
    pub fn from_error(error: &FortiOsError, request: RequestMetadata) -> Self {
        Self {
            http_status: error.status_code().unwrap_or(0),
            status: LogicalStatus::Error,
            results: None,
            error_code: error.error_code(),
            error_message: Some(error.to_string()),
            reported_status: None,
            vdom: None,
            serial: None,
            version: None,
            build: None,
            request,
        }
    }

    /// Check if the response was logically successful.
    pub fn is_success(&self) -> bool {
        self.status == LogicalStatus::Success
    }

    /// Deserialize the `results` field.
    pub fn results_as<T: DeserializeOwned>(&self) -> Result<T> {
        let results = self.results.clone().unwrap_or(Value::Null);
        serde_json::from_value(results).map_err(|e| FortiOsError::Json(e.to_string()))
    }

    /// `results` as a list; a single object becomes a one-element list.
    pub fn results_list(&self) -> Vec<Value> {
        match &self.results {
            Some(Value::Array(items)) => items.clone(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => vec![other.clone()],
        }
    }
}
