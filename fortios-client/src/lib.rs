//! # FortiOS Client
//!
//! Resilient transport core for the FortiOS REST API: request building and
//! validation, retries with exponential backoff, a per-backend circuit
//! breaker, and request statistics.
//!
//! ## Features
//!
//! - **Request Builder**: typed parameters, filter normalization, primary-key
//!   path encoding and declared enum/range validation
//! - **Retry with Backoff**: exponential backoff with jitter, honouring
//!   `Retry-After`
//! - **Circuit Breaker**: short-circuits calls to a failing backend and
//!   probes it again after a cooldown
//! - **Statistics**: connection counters, health metrics, retry counters and
//!   bounded operation history
//! - **Two Modes**: [`AsyncClient`] for tokio, [`BlockingClient`] for
//!   synchronous callers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fortios_client::{ApiType, AsyncClient, ClientConfig, OperationSpec, ParamSpec, HttpMethod};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder()
//!         .host("192.0.2.1")
//!         .token("api-token")
//!         .vdom("root")
//!         .build();
//!     let client = AsyncClient::new(config)?;
//!
//!     let addresses = OperationSpec::new(ApiType::Cmdb, HttpMethod::Get, "firewall/address")
//!         .with_mkey("name", false)
//!         .paginated()
//!         .param(ParamSpec::one_of("format", &["name", "subnet"]));
//!
//!     let response = client
//!         .execute(addresses.request().param("count", 10).filter("type==ipmask"))
//!         .await?;
//!
//!     for entry in response.results_list() {
//!         println!("{}", entry["name"]);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Blocking
//!
//! ```rust,no_run
//! use fortios_client::{ApiType, BlockingClient, ClientConfig, HttpMethod, RequestDescriptor};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = BlockingClient::new(ClientConfig::builder().host("192.0.2.1").build())?;
//!     let status = client.execute(RequestDescriptor::new(
//!         ApiType::Monitor,
//!         HttpMethod::Get,
//!         "system/status",
//!     ))?;
//!     println!("{:?}", status.version);
//!     Ok(())
//! }
//! ```

mod blocking;
mod circuit_breaker;
mod client;
mod clock;
mod config;
mod engine;
mod error;
mod request;
mod response;
mod retry;
mod stats;
mod transport;

pub use blocking::{BlockingClient, BlockingTransport, ReqwestBlockingTransport};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState,
};
pub use client::{AsyncClient, Client};
pub use clock::{Clock, MockClock, SystemClock};
pub use config::{ClientConfig, ClientConfigBuilder, ErrorMode, Mode};
pub use engine::{ClientCore, ResilientClient};
pub use error::{FortiOsError, NetworkFailure, Result, ValidationError, present};
pub use request::{
    ApiType, Constraint, Filter, HttpMethod, IntoRequest, OperationSpec, ParamSpec, ParamValue,
    Params, RequestBuilder, RequestDescriptor, Scope, encode_path_component, normalize_filter,
};
pub use response::{LogicalStatus, RequestMetadata, ResponseEnvelope};
pub use retry::{AttemptOutcome, AttemptRecord, FailureClass, RetryConfig, RetryDecision};
pub use stats::{
    ConnectionStats, HealthMetrics, OperationLogEntry, RequestOutcome, RetryStats, StatsTracker,
};
pub use transport::{
    ReqwestTransport, Transport, TransportError, TransportRequest, TransportResponse,
};

// Re-export common types
pub use tokio_util::sync::CancellationToken;
pub use url::Url;

/// Prelude for common imports.
///
/// ```
/// use fortios_client::prelude::*;
/// ```
pub mod prelude {
    pub use crate::blocking::BlockingClient;
    pub use crate::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    pub use crate::client::{AsyncClient, Client};
    pub use crate::config::{ClientConfig, ErrorMode, Mode};
    pub use crate::engine::ResilientClient;
    pub use crate::error::{FortiOsError, Result, ValidationError};
    pub use crate::request::{
        ApiType, HttpMethod, OperationSpec, ParamSpec, Params, RequestDescriptor, Scope,
    };
    pub use crate::response::ResponseEnvelope;
    pub use crate::retry::RetryConfig;
    pub use tokio_util::sync::CancellationToken;
}
