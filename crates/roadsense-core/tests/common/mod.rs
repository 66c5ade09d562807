#![allow(dead_code)]

use std::sync::Arc;

use roadsense_core::cache::{CacheStore, MemoryStore};
use roadsense_core::clock::ManualClock;
use roadsense_core::{ApiClient, BackendReadiness, Config, NetworkHelper, Session, SessionData};
use tracing_subscriber::EnvFilter;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

pub const TOKEN: &str = "test-token";

/// Install a log subscriber once; `RUST_LOG=debug` shows client logs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config pointed at the mock server with short delays.
pub fn test_config(server: &MockServer) -> Config {
    Config {
        api_url: server.uri(),
        request_timeout_secs: 1,
        max_retries: 3,
        retry_delay_ms: 10,
        probe_timeout_secs: 1,
        wake_timeout_secs: 5,
        ..Config::default()
    }
}

pub async fn mount_health(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

pub struct Harness {
    pub server: MockServer,
    pub client: ApiClient,
    pub clock: Arc<ManualClock>,
    pub durable: MemoryStore,
}

impl Harness {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let config = test_config(&server);
        Self::with_config(server, config, MemoryStore::new()).await
    }

    pub async fn with_config(server: MockServer, config: Config, durable: MemoryStore) -> Self {
        init_tracing();
        mount_health(&server).await;

        let network = NetworkHelper::new(&config).expect("network helper");
        let readiness = Arc::new(BackendReadiness::new(Arc::new(network.clone())));
        let clock = Arc::new(ManualClock::new());
        let cache = Arc::new(CacheStore::with_clock(
            Arc::new(durable.clone()),
            clock.clone(),
        ));
        let session = Arc::new(Session::with_data(SessionData::new(TOKEN, 42)));
        let client = ApiClient::from_parts(network, readiness, cache, session);

        Self {
            server,
            client,
            clock,
            durable,
        }
    }

    /// Requests the server saw for `path`.
    pub async fn hits(&self, path: &str) -> usize {
        requests_to(&self.server, path).await.len()
    }
}

pub async fn requests_to(server: &MockServer, path: &str) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path() == path)
        .collect()
}

pub fn ok_body(data: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "success": true,
        "data": data,
    }))
}
