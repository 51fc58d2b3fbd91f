//! Integration tests for fortios-client

use async_trait::async_trait;
use fortios_client::*;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Clone)]
enum Reply {
    Status(u16, &'static str),
    Refused,
}

const OK_BODY: &str = r#"{"http_status":200,"status":"success","vdom":"root","results":[{"name":"h1"}]}"#;

/// In-memory transport that replays scripted replies; the last reply
/// repeats once the script runs out.
struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    last: Mutex<Reply>,
    calls: AtomicU32,
    seen: Mutex<Vec<TransportRequest>>,
    latency: Duration,
}

impl ScriptedTransport {
    fn new(replies: Vec<Reply>) -> Arc<Self> {
        Self::with_latency(replies, Duration::ZERO)
    }

    fn with_latency(replies: Vec<Reply>, latency: Duration) -> Arc<Self> {
        let last = replies.last().cloned().unwrap_or(Reply::Status(200, OK_BODY));
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            last: Mutex::new(last),
            calls: AtomicU32::new(0),
            seen: Mutex::new(Vec::new()),
            latency,
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn set_reply(&self, reply: Reply) {
        self.replies.lock().unwrap().clear();
        *self.last.lock().unwrap() = reply;
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        request: TransportRequest,
    ) -> std::result::Result<TransportResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(request);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.last.lock().unwrap().clone());
        match reply {
            Reply::Status(status, body) => Ok(TransportResponse::new(status, body)),
            Reply::Refused => Err(TransportError::Connect("connection refused".to_string())),
        }
    }
}

fn address_get() -> OperationSpec {
    OperationSpec::new(ApiType::Cmdb, HttpMethod::Get, "firewall/address")
        .with_mkey("name", false)
        .paginated()
        .param(ParamSpec::one_of("action", &["default", "schema"]))
}

fn address_delete() -> OperationSpec {
    OperationSpec::new(ApiType::Cmdb, HttpMethod::Delete, "firewall/address").with_mkey("name", true)
}

fn client(config: ClientConfig, transport: Arc<ScriptedTransport>) -> AsyncClient {
    AsyncClient::with_transport(config, transport).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried() {
    let transport = ScriptedTransport::new(vec![
        Reply::Status(503, "unavailable"),
        Reply::Status(503, "unavailable"),
        Reply::Status(200, OK_BODY),
    ]);
    let client = client(ClientConfig::default(), transport.clone());

    let response = client.execute(address_get().request()).await.unwrap();

    assert!(response.is_success());
    assert_eq!(response.vdom.as_deref(), Some("root"));
    assert_eq!(response.results_list().len(), 1);
    assert_eq!(transport.calls(), 3);

    let retry = client.retry_stats();
    assert_eq!(retry.total_retries, 2);
    assert_eq!(retry.recovered_requests, 1);
    assert_eq!(retry.retries_by_class.get(&FailureClass::Server), Some(&2));
    assert!(retry.last_retry_at.is_some());

    let health = client.health_metrics();
    assert_eq!(health.successful_requests, 1);
    assert_eq!(health.failed_requests, 2);
    assert_eq!(client.circuit_breaker_state(), CircuitState::Closed);
    assert_eq!(client.connection_stats().consecutive_failures, 0);
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let transport = ScriptedTransport::new(vec![Reply::Status(
        404,
        r#"{"http_status":404,"status":"error","error":-3}"#,
    )]);
    let client = client(ClientConfig::default(), transport.clone());

    let err = client
        .execute(address_get().request().mkey("missing"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        FortiOsError::ClientRequest {
            status: 404,
            error_code: Some(-3),
            ..
        }
    ));
    assert_eq!(transport.calls(), 1);
    assert_eq!(client.retry_stats().total_retries, 0);
}

#[tokio::test]
async fn test_validation_failure_makes_no_call() {
    let transport = ScriptedTransport::new(vec![]);
    let client = client(ClientConfig::default(), transport.clone());

    let err = client.execute(address_delete().request()).await.unwrap_err();
    match err {
        FortiOsError::Validation(e) => {
            assert_eq!(e.field, "name");
            assert_eq!(e.constraint, "required");
        }
        other => panic!("expected validation error, got {:?}", other),
    }

    let err = client
        .execute(address_get().request().param("action", "drop"))
        .await
        .unwrap_err();
    assert!(matches!(err, FortiOsError::Validation(ref e) if e.constraint == "enum"));

    let err = client
        .execute(address_get().request().param("count", 0))
        .await
        .unwrap_err();
    assert!(matches!(err, FortiOsError::Validation(ref e) if e.constraint == "range"));

    assert_eq!(transport.calls(), 0);
    assert_eq!(client.connection_stats().total_requests, 0);
    assert!(client.operations().is_empty());
}

#[tokio::test]
async fn test_circuit_opens_and_short_circuits() {
    let clock = MockClock::new();
    let transport = ScriptedTransport::new(vec![Reply::Refused]);
    let config = ClientConfig::builder()
        .host("fw.example.net")
        .retry(RetryConfig::immediate(2))
        .circuit_breaker(CircuitBreakerConfig::new(3, Duration::from_secs(30)))
        .build();
    let client =
        AsyncClient::with_transport_and_clock(config, transport.clone(), clock.clone()).unwrap();

    // Each request makes both attempts and counts once against the breaker.
    for request in 1..=3 {
        let err = client.execute(address_get().request()).await.unwrap_err();
        assert!(err.is_connection());
        assert_eq!(transport.calls(), request * 2);
        assert_eq!(client.connection_stats().consecutive_failures, request);
    }
    assert_eq!(client.circuit_breaker_state(), CircuitState::Open);
    assert_eq!(client.retry_stats().exhausted_requests, 3);

    // While open, no network call is made.
    let err = client.execute(address_get().request()).await.unwrap_err();
    assert!(matches!(err, FortiOsError::CircuitOpen { ref host } if host == "fw.example.net"));
    assert_eq!(transport.calls(), 6);

    let stats = client.connection_stats();
    assert_eq!(stats.total_requests, 6);
    assert_eq!(stats.active_requests, 0);
    assert_eq!(stats.circuit_breaker.state, CircuitState::Open);
    assert!(!client.health_metrics().healthy);

    // After the cooldown a successful attempt closes the circuit.
    clock.advance(Duration::from_secs(30));
    transport.set_reply(Reply::Status(200, OK_BODY));
    let response = client.execute(address_get().request()).await.unwrap();
    assert!(response.is_success());
    assert_eq!(transport.calls(), 7);
    assert_eq!(client.circuit_breaker_state(), CircuitState::Closed);
    assert_eq!(client.connection_stats().consecutive_failures, 0);
}

#[tokio::test]
async fn test_failed_half_open_attempt_reopens() {
    let clock = MockClock::new();
    let transport = ScriptedTransport::new(vec![Reply::Status(500, "boom")]);
    let config = ClientConfig::builder()
        .retry(RetryConfig::immediate(3))
        .circuit_breaker(CircuitBreakerConfig::new(1, Duration::from_secs(10)))
        .build();
    let client =
        AsyncClient::with_transport_and_clock(config, transport.clone(), clock.clone()).unwrap();

    let err = client.execute(address_get().request()).await.unwrap_err();
    assert!(matches!(err, FortiOsError::Server { status: 500, .. }));
    assert_eq!(transport.calls(), 3);
    assert_eq!(client.circuit_breaker_state(), CircuitState::Open);

    // The half-open attempt fails and reopens at once; its retry is refused
    // and the request reports the failure it saw.
    clock.advance(Duration::from_secs(10));
    let err = client.execute(address_get().request()).await.unwrap_err();
    assert!(matches!(err, FortiOsError::Server { status: 500, .. }));
    assert_eq!(transport.calls(), 4);
    assert_eq!(client.circuit_breaker_state(), CircuitState::Open);
    assert_eq!(client.retry_stats().exhausted_requests, 2);

    assert!(matches!(
        client.execute(address_get().request()).await,
        Err(FortiOsError::CircuitOpen { .. })
    ));
    assert_eq!(transport.calls(), 4);
}

#[tokio::test]
async fn test_dot_identifier_stays_in_collection() {
    let transport = ScriptedTransport::new(vec![Reply::Status(200, OK_BODY)]);
    let client = client(ClientConfig::default(), transport.clone());

    for name in ["..", "."] {
        let err = client
            .execute(address_delete().request().mkey(name))
            .await
            .unwrap_err();
        assert!(matches!(err, FortiOsError::Validation(ref e) if e.constraint == "mkey"));
    }

    let raw = RequestDescriptor::new(ApiType::Cmdb, HttpMethod::Delete, "firewall/address/..");
    let err = client.execute(raw).await.unwrap_err();
    assert!(matches!(err, FortiOsError::Validation(ref e) if e.field == "path"));
    assert_eq!(transport.calls(), 0);

    client
        .execute(address_delete().request().mkey("a..b"))
        .await
        .unwrap();
    let seen = transport.seen.lock().unwrap();
    assert_eq!(seen[0].url.path(), "/api/v2/cmdb/firewall/address/a..b");
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_backoff() {
    let transport = ScriptedTransport::new(vec![Reply::Status(503, "busy")]);
    let config = ClientConfig::builder()
        .retry(RetryConfig::exponential(5, Duration::from_secs(10)).with_jitter(0.0))
        .build();
    let client = client(config, transport.clone());
    let token = CancellationToken::new();

    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        })
    };

    let err = client
        .execute_with_cancel(address_get().request(), &token)
        .await
        .unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(err, FortiOsError::Cancelled));
    assert_eq!(transport.calls(), 1);
    // Cancelled before its last attempt, so the breaker saw nothing.
    assert_eq!(client.connection_stats().consecutive_failures, 0);
    assert_eq!(client.connection_stats().active_requests, 0);
    assert_eq!(client.retry_stats().exhausted_requests, 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_requests_share_state() {
    let transport = ScriptedTransport::with_latency(
        vec![Reply::Status(200, OK_BODY)],
        Duration::from_millis(20),
    );
    let config = ClientConfig::builder().max_connections(4).build();
    let client = client(config, transport.clone());

    let requests = (0..20).map(|i| {
        let client = client.clone();
        async move {
            client
                .execute(address_get().request().mkey(format!("host-{}", i)))
                .await
        }
    });
    let results = futures::future::join_all(requests).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(transport.calls(), 20);

    let stats = client.connection_stats();
    assert_eq!(stats.total_requests, 20);
    assert_eq!(stats.active_requests, 0);
    assert_eq!(stats.max_connections, 4);
    assert!(stats.pool_exhaustion_count > 0);
    assert_eq!(client.operations().len(), 20);
    assert!(client.write_operations().is_empty());
}

#[tokio::test]
async fn test_write_operations_are_tracked() {
    let transport = ScriptedTransport::new(vec![Reply::Status(200, OK_BODY)]);
    let client = client(ClientConfig::builder().vdom("root").build(), transport.clone());

    client
        .execute(address_get().request().mkey("h1").param("action", "default"))
        .await
        .unwrap();
    client
        .execute(address_delete().request().mkey("h1").scope("dmz"))
        .await
        .unwrap();
    client
        .execute(
            RequestDescriptor::new(ApiType::Cmdb, HttpMethod::Post, "firewall/address")
                .with_body(json!({"name": "h2", "subnet": "10.0.0.2/32"})),
        )
        .await
        .unwrap();

    let writes = client.write_operations();
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[0].method, HttpMethod::Delete);
    assert_eq!(writes[0].endpoint, "cmdb/firewall/address/h1");
    assert_eq!(writes[1].method, HttpMethod::Post);
    assert_eq!(client.operations().len(), 3);

    let last = client.last_request().unwrap();
    assert_eq!(last.method, HttpMethod::Post);
    assert_eq!(last.status_code, Some(200));
    assert!(last.success);

    let seen = transport.seen.lock().unwrap();
    assert_eq!(seen[0].url.query(), Some("action=default&vdom=root"));
    assert_eq!(seen[1].url.query(), Some("vdom=dmz"));
    assert_eq!(seen[1].method, http::Method::DELETE);
    assert!(seen[2].body.is_some());
}

#[tokio::test]
async fn test_error_modes() {
    let reply = Reply::Status(400, r#"{"http_status":400,"status":"error","error":-5}"#);

    let transport = ScriptedTransport::new(vec![reply.clone()]);
    let returning = client(
        ClientConfig::builder().error_mode(ErrorMode::Return).build(),
        transport,
    );
    let envelope = returning.call(address_get().request()).await.unwrap().unwrap();
    assert_eq!(envelope.status, LogicalStatus::Error);
    assert_eq!(envelope.http_status, 400);
    assert_eq!(envelope.error_code, Some(-5));
    assert_eq!(envelope.request.path, "cmdb/firewall/address");

    let transport = ScriptedTransport::new(vec![reply.clone()]);
    let printing = client(
        ClientConfig::builder().error_mode(ErrorMode::Print).build(),
        transport,
    );
    assert!(printing.call(address_get().request()).await.unwrap().is_none());

    let transport = ScriptedTransport::new(vec![reply]);
    let raising = client(ClientConfig::default(), transport);
    assert!(raising.call(address_get().request()).await.is_err());
}

fn wiremock_config(server: &MockServer) -> ClientConfig {
    let address = server.address();
    ClientConfig::builder()
        .scheme("http")
        .host(address.ip().to_string())
        .port(address.port())
        .token("test-token")
        .vdom("root")
        .retry(RetryConfig::immediate(3).with_max_delay(Duration::from_millis(50)))
        .build()
}

#[tokio::test]
async fn test_reqwest_transport_against_backend() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v2/cmdb/firewall/address/web_server"))
        .and(query_param("vdom", "root"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "http_status": 200,
            "status": "success",
            "vdom": "root",
            "serial": "FGT60F0000000001",
            "version": "v7.4.3",
            "build": 2573,
            "results": [{"name": "web_server", "subnet": "10.0.0.10 255.255.255.255"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = AsyncClient::new(wiremock_config(&server)).unwrap();
    let response = client
        .execute(address_get().request().mkey("web_server"))
        .await
        .unwrap();

    assert!(response.is_success());
    assert_eq!(response.serial.as_deref(), Some("FGT60F0000000001"));
    assert_eq!(response.build, Some(2573));
    assert_eq!(response.results_list()[0]["name"], "web_server");
}

#[tokio::test]
async fn test_rate_limit_then_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v2/monitor/system/status"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/monitor/system/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "results": {"hostname": "fw1"}
        })))
        .mount(&server)
        .await;

    let client = AsyncClient::new(wiremock_config(&server)).unwrap();
    let response = client
        .execute(RequestDescriptor::new(
            ApiType::Monitor,
            HttpMethod::Get,
            "system/status",
        ))
        .await
        .unwrap();

    assert_eq!(response.results.unwrap()["hostname"], "fw1");
    let retry = client.retry_stats();
    assert_eq!(retry.retries_by_class.get(&FailureClass::RateLimited), Some(&1));
    assert_eq!(retry.recovered_requests, 1);
}

#[tokio::test]
async fn test_html_error_page_is_captured() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
        .mount(&server)
        .await;

    let client = AsyncClient::new(wiremock_config(&server)).unwrap();
    let err = client.execute(address_get().request()).await.unwrap_err();

    match err {
        FortiOsError::ClientRequest {
            status, message, ..
        } => {
            assert_eq!(status, 401);
            assert_eq!(message, "Unauthorized");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_connection_refused_is_transient() {
    // Bind then release a port so nothing is listening on it.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let config = ClientConfig::builder()
        .scheme("http")
        .host("127.0.0.1")
        .port(port)
        .retry(RetryConfig::immediate(2))
        .build();
    let client = AsyncClient::new(config).unwrap();

    let err = client.execute(address_get().request()).await.unwrap_err();
    assert!(err.is_connection());
    assert_eq!(client.retry_stats().exhausted_requests, 1);
    assert_eq!(client.connection_stats().total_requests, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_client_against_backend() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/cmdb/firewall/address"))
        .and(query_param("vdom", "root"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "http_status": 200,
            "status": "success",
            "mkey": "h3"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = wiremock_config(&server);
    let (response, writes) = tokio::task::spawn_blocking(move || {
        let client = BlockingClient::new(config).unwrap();
        let spec = OperationSpec::new(ApiType::Cmdb, HttpMethod::Post, "firewall/address");
        let response = client
            .execute(spec.request().body(json!({"name": "h3"})))
            .unwrap();
        (response, client.write_operations())
    })
    .await
    .unwrap();

    assert!(response.is_success());
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].endpoint, "cmdb/firewall/address");
}

#[test]
fn test_client_new_by_mode() {
    let client = Client::new(ClientConfig::builder().mode(Mode::Async).build()).unwrap();
    assert_eq!(client.mode(), Mode::Async);
    assert!(client.as_async().is_some());
    assert_eq!(client.circuit_breaker_state(), CircuitState::Closed);

    let err = Client::new(ClientConfig::builder().host(" ").build()).unwrap_err();
    assert!(matches!(err, FortiOsError::Config(_)));
}
