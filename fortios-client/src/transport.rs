//! Transport layer beneath the resilient clients.

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, header};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::ClientConfig;
use crate::error::{FortiOsError, Result};

/// One physical HTTP request.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    /// Per-attempt timeout.
    pub timeout: Duration,
}

/// Raw HTTP response.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// `Retry-After` hint, in delta-seconds form.
    pub fn retry_after(&self) -> Option<Duration> {
        self.headers
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }
}

/// Failure before a response was received.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connection refused, reset, or otherwise failed.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The attempt exceeded its timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Failure on this side of the wire, such as a request that cannot be
    /// built or a body that cannot be decoded. Never retried.
    #[error("request failed: {0}")]
    Local(String),
}

impl TransportError {
    pub(crate) fn from_reqwest(error: reqwest::Error, timeout: Duration) -> Self {
        if error.is_timeout() {
            Self::Timeout(timeout)
        } else if error.is_connect() || error.is_request() || error.is_body() {
            Self::Connect(error.to_string())
        } else {
            Self::Local(error.to_string())
        }
    }
}

/// Asynchronous transport.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> std::result::Result<TransportResponse, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn send(&self, request: TransportRequest) -> std::result::Result<TransportResponse, TransportError> {
        (**self).send(request).await
    }
}

/// `reqwest`-backed asynchronous transport.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    inner: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport from the client configuration.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.max_keepalive_connections)
            .danger_accept_invalid_certs(!config.verify_tls)
            .user_agent(&config.user_agent)
            .gzip(true)
            .build()
            .map_err(|e| FortiOsError::Transport(e.to_string()))?;

        Ok(Self { inner })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> std::result::Result<TransportResponse, TransportError> {
        let timeout = request.timeout;
        let mut builder = self
            .inner
            .request(request.method, request.url)
            .headers(request.headers)
            .timeout(timeout);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(e, timeout))?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::from_reqwest(e, timeout))?;

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}
