//! Blocking resilient client.
//!
//! A logical request occupies the calling thread for its whole duration,
//! retry sleeps included. Do not use it from inside an async runtime.

use std::sync::Arc;
use std::thread;

use crate::clock::{Clock, SystemClock};
use crate::config::ClientConfig;
use crate::engine::{AttemptLog, ClientCore, ResilientClient, Step};
use crate::error::{FortiOsError, Result, present};
use crate::request::IntoRequest;
use crate::response::ResponseEnvelope;
use crate::transport::{TransportError, TransportRequest, TransportResponse};

/// Blocking transport.
pub trait BlockingTransport: Send + Sync {
    fn send(&self, request: TransportRequest) -> std::result::Result<TransportResponse, TransportError>;
}

impl<T: BlockingTransport + ?Sized> BlockingTransport for Arc<T> {
    fn send(&self, request: TransportRequest) -> std::result::Result<TransportResponse, TransportError> {
        (**self).send(request)
    }
}

/// `reqwest`-backed blocking transport.
#[derive(Debug, Clone)]
pub struct ReqwestBlockingTransport {
    inner: reqwest::blocking::Client,
}

impl ReqwestBlockingTransport {
    /// Build a transport from the client configuration.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let inner = reqwest::blocking::Client::builder()
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

impl BlockingTransport for ReqwestBlockingTransport {
    fn send(&self, request: TransportRequest) -> std::result::Result<TransportResponse, TransportError> {
        let timeout = request.timeout;
        let mut builder = self
            .inner
            .request(request.method, request.url)
            .headers(request.headers)
            .timeout(timeout);
        if let Some(body) = request.body {
            builder = builder.body(body.to_vec());
        }

        let response = builder
            .send()
            .map_err(|e| TransportError::from_reqwest(e, timeout))?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .map_err(|e| TransportError::from_reqwest(e, timeout))?;

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

/// FortiOS client for blocking use.
#[derive(Clone)]
pub struct BlockingClient {
    core: Arc<ClientCore>,
    transport: Arc<dyn BlockingTransport>,
}

impl BlockingClient {
    /// Create a client backed by `reqwest`'s blocking client.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = ReqwestBlockingTransport::new(&config)?;
        Self::with_transport(config, transport)
    }

    /// Create a client over a custom transport.
    pub fn with_transport(
        config: ClientConfig,
        transport: impl BlockingTransport + 'static,
    ) -> Result<Self> {
        Self::with_transport_and_clock(config, transport, SystemClock)
    }

    /// Create a client over a custom transport and breaker clock.
    pub fn with_transport_and_clock(
        config: ClientConfig,
        transport: impl BlockingTransport + 'static,
        clock: impl Clock,
    ) -> Result<Self> {
        Ok(Self {
            core: Arc::new(ClientCore::new(config, clock)?),
            transport: Arc::new(transport),
        })
    }

    /// Get the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.core.config
    }

    /// Execute a logical request.
    pub fn execute(&self, request: impl IntoRequest) -> Result<ResponseEnvelope> {
        let core = &*self.core;
        let prepared = core.prepare(request)?;
        let mut log = AttemptLog::default();

        loop {
            let probe = core.gate().map_err(|e| core.rejected(&mut log, e))?;
            let in_flight = core.begin(&prepared, probe);
            let outcome = self.transport.send(prepared.transport.clone());

            match core.complete(&prepared, &mut log, in_flight, outcome) {
                Step::Done(result) => return result,
                Step::Retry(delay) => thread::sleep(delay),
            }
        }
    }

    /// Execute a logical request and present any failure according to the
    /// configured error mode.
    pub fn call(&self, request: impl IntoRequest) -> Result<Option<ResponseEnvelope>> {
        let metadata = request.metadata();
        let result = self.execute(request);
        present(result, self.core.config.error_mode, metadata)
    }
}

impl ResilientClient for BlockingClient {
    fn core(&self) -> &ClientCore {
        &self.core
    }
}

impl std::fmt::Debug for BlockingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingClient")
            .field("host", &self.core.config.host)
            .field("closed", &self.core.is_closed())
            .finish()
    }
}
