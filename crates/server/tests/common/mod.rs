//! Shared harness for the integration tests: an in-memory store, a seeded
//! tenant directory, and a router wired exactly like `main.rs` minus the
//! listener.

// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use sha2::{Digest, Sha256};
use tower::ServiceExt;

use eclosion_broker::{BrokerLimits, BrokerRegistry};
use eclosion_core::Subdomain;
use eclosion_server::api::{router, AppState};
use eclosion_server::auth::{self, TokenService};
use eclosion_server::config::EclosionConfig;
use eclosion_server::directory::{TenantDirectory, TenantRecord};
use eclosion_server::realtime::RealtimeNotifier;
use eclosion_server::tunnel::TunnelProxy;
use eclosion_state::{KeyKind, StateKey, StateStore};
use eclosion_state_memory::MemoryStateStore;

pub const SERVICE_KEY: &str = "test-service-key";
pub const CLIENT_ID: &str = "ifttt-client";
pub const CLIENT_SECRET: &str = "ifttt-client-secret";
pub const DEMO_PASSWORD: &str = "demo-pass";
pub const MANAGEMENT_KEY: &str = "mgmt-key";

pub struct Harness {
    pub app: Router,
    pub state: AppState,
    pub store: Arc<MemoryStateStore>,
}

/// Harness whose origin traffic lands on a closed loopback port: every
/// tunnel call fails immediately with a transport error, i.e. offline.
pub fn offline_harness() -> Harness {
    let closed: SocketAddr = "127.0.0.1:1".parse().expect("loopback addr");
    let client = reqwest::Client::builder()
        .resolve("acme.test.invalid", closed)
        .resolve("demo.test.invalid", closed)
        .resolve("other.test.invalid", closed)
        .build()
        .expect("failed to build HTTP client");
    build_harness("test.invalid:1".to_owned(), client)
}

/// Harness whose tunnel traffic for `acme` and `demo` lands on the given
/// local mock origin.
pub async fn online_harness(origin: Router) -> Harness {
    let addr = spawn_origin(origin).await;
    let suffix = format!("test.invalid:{}", addr.port());
    let client = reqwest::Client::builder()
        .resolve("acme.test.invalid", addr)
        .resolve("demo.test.invalid", addr)
        .build()
        .expect("failed to build HTTP client");
    build_harness(suffix, client)
}

fn build_harness(host_suffix: String, client: reqwest::Client) -> Harness {
    let mut config = EclosionConfig::default();
    config.ifttt.service_key = SERVICE_KEY.to_owned();
    config.ifttt.client_id = CLIENT_ID.to_owned();
    config.ifttt.client_secret = CLIENT_SECRET.to_owned();
    config.ifttt.realtime_url = None;
    config.auth.token_secret = "integration-token-secret".to_owned();
    config.auth.demo_password = DEMO_PASSWORD.to_owned();
    config.origin.scheme = "http".to_owned();
    config.origin.host_suffix = host_suffix.clone();

    let store = Arc::new(MemoryStateStore::new());
    let shared: Arc<dyn StateStore> = Arc::clone(&store) as Arc<dyn StateStore>;
    let brokers = Arc::new(BrokerRegistry::new(
        Arc::clone(&shared),
        BrokerLimits::default(),
    ));
    let directory = Arc::new(TenantDirectory::new(Arc::clone(&shared)));
    let tokens = Arc::new(TokenService::new(&config.auth.token_secret));
    let tunnel = Arc::new(TunnelProxy::with_client(
        "http",
        host_suffix,
        client,
    ));
    let realtime = Arc::new(RealtimeNotifier::new(None, SERVICE_KEY));

    let state = AppState {
        store: shared,
        brokers,
        directory,
        tokens,
        tunnel,
        realtime,
        config: Arc::new(config),
    };

    Harness {
        app: router(state.clone()),
        state,
        store,
    }
}

async fn spawn_origin(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock origin");
    let addr = listener.local_addr().expect("mock origin addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

impl Harness {
    /// Write the registry records provisioning would have created.
    pub async fn seed_tenant(&self, subdomain: &str) {
        let record = TenantRecord {
            tunnel_id: format!("tun-{subdomain}"),
            created_at: 0,
            management_key_hash: hex::encode(Sha256::digest(MANAGEMENT_KEY.as_bytes())),
        };
        self.store
            .set(
                &StateKey::new(subdomain, KeyKind::Tenant, "record"),
                &serde_json::to_string(&record).unwrap(),
                None,
            )
            .await
            .unwrap();
        self.store
            .set(
                &StateKey::new(subdomain, KeyKind::OtpEmail, "record"),
                "1",
                None,
            )
            .await
            .unwrap();
    }

    /// Skip the OAuth dance: mark connected, store a secret, mint a bearer.
    pub async fn connect_tenant(&self, subdomain: &str) -> String {
        let subdomain = Subdomain::from(subdomain);
        auth::mark_connected(self.state.store.as_ref(), &subdomain, 1)
            .await
            .unwrap();
        auth::store_action_secret(self.state.store.as_ref(), &subdomain, "shared-action-secret")
            .await
            .unwrap();
        self.state.tokens.issue(&subdomain)
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
        };
        (status, json)
    }

    pub async fn send_raw(&self, request: Request<Body>) -> axum::response::Response {
        self.app.clone().oneshot(request).await.unwrap()
    }
}

pub fn get(uri: &str, headers: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::empty()).unwrap()
}

pub fn delete(uri: &str, headers: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder().method("DELETE").uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::empty()).unwrap()
}

pub fn post_json(
    uri: &str,
    headers: &[(&str, &str)],
    body: &serde_json::Value,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn post_form(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body(Body::from(body.to_owned()))
        .unwrap()
}

/// Pull one query parameter out of a URL string.
pub fn query_param(url: &str, name: &str) -> Option<String> {
    let (_, query) = url.split_once('?')?;
    for pair in query.split('&') {
        if let Some((key, value)) = pair.split_once('=')
            && key == name
        {
            return Some(value.to_owned());
        }
    }
    None
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}
