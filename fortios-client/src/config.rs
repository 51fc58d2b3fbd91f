//! FortiOS client configuration.

use std::time::Duration;
use url::Url;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::{FortiOsError, Result};
use crate::retry::RetryConfig;

/// Operating mode selected at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Cooperative: network I/O and retry sleeps yield to the runtime.
    #[default]
    Async,
    /// Blocking: a request occupies the calling thread.
    Blocking,
}

/// How request failures are presented to callers of `call()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorMode {
    /// Return the error.
    #[default]
    Raise,
    /// Fold the error into an error-status envelope.
    Return,
    /// Log a summary and return nothing.
    Print,
}

/// FortiOS client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend host name or address.
    pub host: String,
    /// Backend port.
    pub port: u16,
    /// `https` unless talking to a plain-HTTP test backend.
    pub scheme: String,
    /// Verify the backend's TLS certificate.
    pub verify_tls: bool,
    /// Default vdom for requests with default scope.
    pub vdom: Option<String>,
    /// API token sent as a bearer credential.
    pub token: Option<String>,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Circuit breaker configuration.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Maximum concurrent connections; 0 for unlimited.
    pub max_connections: usize,
    /// Maximum idle keep-alive connections.
    pub max_keepalive_connections: usize,
    /// Idle keep-alive timeout.
    pub pool_idle_timeout: Duration,
    /// User agent string.
    pub user_agent: String,
    /// Capacity of each operation history buffer.
    pub operation_log_capacity: usize,
    /// Presentation of failures by `call()`.
    pub error_mode: ErrorMode,
    /// Client flavour built by `Client::new`.
    pub mode: Mode,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 443,
            scheme: "https".to_string(),
            verify_tls: true,
            vdom: None,
            token: None,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            max_connections: 100,
            max_keepalive_connections: 20,
            pool_idle_timeout: Duration::from_secs(90),
            user_agent: format!("fortios-client/{}", env!("CARGO_PKG_VERSION")),
            operation_log_capacity: 1000,
            error_mode: ErrorMode::Raise,
            mode: Mode::Async,
        }
    }
}

impl ClientConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// `{scheme}://{host}:{port}/api/v2/`.
    pub fn base_url(&self) -> Result<Url> {
        if self.host.trim().is_empty() {
            return Err(FortiOsError::Config("host must not be empty".to_string()));
        }
        let raw = format!("{}://{}:{}/api/v2/", self.scheme, self.host, self.port);
        Url::parse(&raw).map_err(|e| FortiOsError::InvalidUrl(format!("{}: {}", raw, e)))
    }

    /// Check the invariants the clients rely on.
    pub fn validate(&self) -> Result<()> {
        self.base_url()?;
        if self.retry.max_attempts == 0 {
            return Err(FortiOsError::Config("retry.max_attempts must be at least 1".to_string()));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(FortiOsError::Config(
                "circuit_breaker.failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(FortiOsError::Config("timeout must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Builder for client configuration.
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Set the backend host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set the backend port.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the URL scheme.
    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.config.scheme = scheme.into();
        self
    }

    /// Enable or disable TLS certificate verification.
    pub fn verify_tls(mut self, verify: bool) -> Self {
        self.config.verify_tls = verify;
        self
    }

    /// Set the default vdom.
    pub fn vdom(mut self, vdom: impl Into<String>) -> Self {
        self.config.vdom = Some(vdom.into());
        self
    }

    /// Set the API token.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.config.token = Some(token.into());
        self
    }

    /// Set the per-attempt timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set retry configuration.
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.config.retry = config;
        self
    }

    /// Set circuit breaker configuration.
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.config.circuit_breaker = config;
        self
    }

    /// Set the maximum number of concurrent connections.
    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = max;
        self
    }

    /// Set the maximum idle keep-alive connections.
    pub fn max_keepalive_connections(mut self, max: usize) -> Self {
        self.config.max_keepalive_connections = max;
        self
    }

    /// Set the connection pool idle timeout.
    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.pool_idle_timeout = timeout;
        self
    }

    /// Set the user agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Set the operation history capacity.
    pub fn operation_log_capacity(mut self, capacity: usize) -> Self {
        self.config.operation_log_capacity = capacity;
        self
    }

    /// Set the error presentation mode.
    pub fn error_mode(mut self, mode: ErrorMode) -> Self {
        self.config.error_mode = mode;
        self
    }

    /// Set the operating mode.
    pub fn mode(mut self, mode: Mode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ClientConfig {
        self.config
    }
}
