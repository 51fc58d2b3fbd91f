//! Asynchronous resilient client.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::blocking::BlockingClient;
use crate::clock::{Clock, SystemClock};
use crate::config::{ClientConfig, Mode};
use crate::engine::{AttemptLog, ClientCore, Prepared, ResilientClient, Step};
use crate::error::{FortiOsError, Result, present};
use crate::request::IntoRequest;
use crate::response::ResponseEnvelope;
use crate::transport::{ReqwestTransport, Transport, TransportError, TransportResponse};

/// FortiOS client for cooperative (async) use.
///
/// Network I/O and retry sleeps are suspension points, so many logical
/// requests can run concurrently on one client. Clones share the circuit
/// breaker, the statistics and the connection limit.
#[derive(Clone)]
pub struct AsyncClient {
    core: Arc<ClientCore>,
    transport: Arc<dyn Transport>,
    permits: Option<Arc<Semaphore>>,
}

impl AsyncClient {
    /// Create a client backed by `reqwest`.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(&config)?;
        Self::with_transport(config, transport)
    }

    /// Create a client over a custom transport.
    pub fn with_transport(config: ClientConfig, transport: impl Transport + 'static) -> Result<Self> {
        Self::with_transport_and_clock(config, transport, SystemClock)
    }

    /// Create a client over a custom transport and breaker clock.
    pub fn with_transport_and_clock(
        config: ClientConfig,
        transport: impl Transport + 'static,
        clock: impl Clock,
    ) -> Result<Self> {
        let permits = (config.max_connections > 0)
            .then(|| Arc::new(Semaphore::new(config.max_connections.min(Semaphore::MAX_PERMITS))));
        let core = ClientCore::new(config, clock)?;

        Ok(Self {
            core: Arc::new(core),
            transport: Arc::new(transport),
            permits,
        })
    }

    /// Get the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.core.config
    }

    /// Execute a logical request.
    pub async fn execute(&self, request: impl IntoRequest) -> Result<ResponseEnvelope> {
        self.run(request, None).await
    }

    /// Execute a logical request, giving up with [`FortiOsError::Cancelled`]
    /// as soon as `cancel` fires.
    pub async fn execute_with_cancel(
        &self,
        request: impl IntoRequest,
        cancel: &CancellationToken,
    ) -> Result<ResponseEnvelope> {
        self.run(request, Some(cancel)).await
    }

    /// Execute a logical request and present any failure according to the
    /// configured error mode.
    pub async fn call(&self, request: impl IntoRequest) -> Result<Option<ResponseEnvelope>> {
        let metadata = request.metadata();
        let result = self.execute(request).await;
        present(result, self.core.config.error_mode, metadata)
    }

    async fn run(
        &self,
        request: impl IntoRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<ResponseEnvelope> {
        let core = &*self.core;
        let prepared = core.prepare(request)?;
        let mut log = AttemptLog::default();

        loop {
            let step = {
                let _permit = self.acquire(cancel).await?;
                let probe = core.gate().map_err(|e| core.rejected(&mut log, e))?;
                let in_flight = core.begin(&prepared, probe);
                let outcome = cancellable(cancel, self.send(&prepared)).await?;
                core.complete(&prepared, &mut log, in_flight, outcome)
            };

            match step {
                Step::Done(result) => return result,
                Step::Retry(delay) => cancellable(cancel, tokio::time::sleep(delay)).await?,
            }
        }
    }

    async fn send(&self, prepared: &Prepared) -> std::result::Result<TransportResponse, TransportError> {
        let timeout = prepared.transport.timeout;
        match tokio::time::timeout(timeout, self.transport.send(prepared.transport.clone())).await {
            Ok(outcome) => outcome,
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
    }

    async fn acquire(&self, cancel: Option<&CancellationToken>) -> Result<Option<OwnedSemaphorePermit>> {
        let Some(permits) = &self.permits else {
            return Ok(None);
        };

        match permits.clone().try_acquire_owned() {
            Ok(permit) => return Ok(Some(permit)),
            Err(TryAcquireError::Closed) => return Err(FortiOsError::Closed),
            Err(TryAcquireError::NoPermits) => {}
        }

        self.core.stats.record_pool_exhaustion();
        debug!(
            max_connections = self.core.config.max_connections,
            "Connection limit reached, waiting"
        );
        cancellable(cancel, permits.clone().acquire_owned())
            .await?
            .map(Some)
            .map_err(|_| FortiOsError::Closed)
    }
}

impl ResilientClient for AsyncClient {
    fn core(&self) -> &ClientCore {
        &self.core
    }
}

impl std::fmt::Debug for AsyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncClient")
            .field("host", &self.core.config.host)
            .field("closed", &self.core.is_closed())
            .finish()
    }
}

/// Run `future` unless `cancel` fires first.
async fn cancellable<F: Future>(cancel: Option<&CancellationToken>, future: F) -> Result<F::Output> {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(FortiOsError::Cancelled),
            output = future => Ok(output),
        },
        None => Ok(future.await),
    }
}

/// A client in the mode chosen by [`ClientConfig::mode`].
#[derive(Debug)]
pub enum Client {
    Async(AsyncClient),
    Blocking(BlockingClient),
}

impl Client {
    /// Build the client flavour selected by the configuration.
    pub fn new(config: ClientConfig) -> Result<Self> {
        match config.mode {
            Mode::Async => AsyncClient::new(config).map(Self::Async),
            Mode::Blocking => BlockingClient::new(config).map(Self::Blocking),
        }
    }

    pub fn as_async(&self) -> Option<&AsyncClient> {
        match self {
            Self::Async(client) => Some(client),
            Self::Blocking(_) => None,
        }
    }

    pub fn as_blocking(&self) -> Option<&BlockingClient> {
        match self {
            Self::Blocking(client) => Some(client),
            Self::Async(_) => None,
        }
    }

    pub fn mode(&self) -> Mode {
        match self {
            Self::Async(_) => Mode::Async,
            Self::Blocking(_) => Mode::Blocking,
        }
    }
}

impl ResilientClient for Client {
    fn core(&self) -> &ClientCore {
        match self {
            Self::Async(client) => client.core(),
            Self::Blocking(client) => client.core(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{ApiType, HttpMethod, RequestDescriptor};
    use crate::retry::RetryConfig;
    use crate::stats::RequestOutcome;
    use crate::transport::TransportRequest;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Never answers.
    struct Hang;

    #[async_trait]
    impl Transport for Hang {
        async fn send(
            &self,
            _request: TransportRequest,
        ) -> std::result::Result<TransportResponse, TransportError> {
            std::future::pending().await
        }
    }

    struct Count(AtomicU32);

    #[async_trait]
    impl Transport for Count {
        async fn send(
            &self,
            _request: TransportRequest,
        ) -> std::result::Result<TransportResponse, TransportError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(TransportResponse::new(200, r#"{"status":"success","results":[]}"#))
        }
    }

    fn request() -> RequestDescriptor {
        RequestDescriptor::new(ApiType::Monitor, HttpMethod::Get, "system/status")
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_retried() {
        let config = ClientConfig::builder()
            .timeout(Duration::from_secs(5))
            .retry(RetryConfig::immediate(2))
            .build();
        let client = AsyncClient::with_transport(config, Hang).unwrap();

        let err = client.execute(request()).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(client.retry_stats().total_retries, 1);
        assert_eq!(client.connection_stats().total_requests, 2);
        assert_eq!(client.health_metrics().failed_requests, 2);
    }

    #[tokio::test]
    async fn test_cancel_in_flight() {
        let client = AsyncClient::with_transport(ClientConfig::default(), Hang).unwrap();
        let token = CancellationToken::new();

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                token.cancel();
            })
        };
        let result = client.execute_with_cancel(request(), &token).await;
        canceller.await.unwrap();

        assert!(matches!(result, Err(FortiOsError::Cancelled)));
        let stats = client.connection_stats();
        assert_eq!(stats.active_requests, 0);
        assert_eq!(stats.consecutive_failures, 0);
        assert_eq!(client.last_request().unwrap().outcome, RequestOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_closed_client_refuses() {
        let transport = Arc::new(Count(AtomicU32::new(0)));
        let client = AsyncClient::with_transport(ClientConfig::default(), transport.clone()).unwrap();

        client.execute(request()).await.unwrap();
        client.close();
        assert!(client.is_closed());
        assert!(matches!(client.execute(request()).await, Err(FortiOsError::Closed)));
        assert_eq!(transport.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_client_new_selects_mode() {
        let client = Client::new(ClientConfig::builder().mode(Mode::Blocking).build()).unwrap();
        assert_eq!(client.mode(), Mode::Blocking);
        assert!(client.as_blocking().is_some());
        assert_eq!(client.connection_stats().total_requests, 0);
    }
}
