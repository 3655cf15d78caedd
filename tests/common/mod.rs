//! Shared utilities for the integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{HeaderMap, Uri},
    response::IntoResponse,
    routing::any,
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use session_affinity_proxy::config::StoreKind;
use session_affinity_proxy::store::MemoryStore;
use session_affinity_proxy::{HttpServer, ProxyConfig, Shutdown, StoreClient};

pub const LOGIN_PAYLOAD: &str = r#"{"user":"alice","role":"admin"}"#;

/// A running proxy over an in-memory store.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub store: MemoryStore,
    pub shutdown: Shutdown,
    pub client: reqwest::Client,
    server: Option<JoinHandle<()>>,
}

impl TestProxy {
    /// Trigger shutdown and wait for the server to finish.
    pub async fn stop(&mut self) {
        self.shutdown.trigger();
        if let Some(server) = self.server.take() {
            server.await.unwrap();
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Create a session through the management API and return its id.
    pub async fn create_session(&self, payload: &str) -> String {
        let body: Value = self
            .client
            .post(self.url("/session"))
            .body(payload.to_string())
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        body["session_id"].as_str().unwrap().to_string()
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Start a backend that echoes the session headers it receives.
///
/// `/login` answers with a session mutation, `/logout` with the expire sentinel.
pub async fn start_backend() -> SocketAddr {
    let app = Router::new()
        .route("/health", any(health))
        .route("/login", any(login))
        .route("/logout", any(logout))
        .route("/", any(echo))
        .route("/{*path}", any(echo));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

async fn echo(headers: HeaderMap, uri: Uri) -> Json<Value> {
    Json(describe(&headers, &uri))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy", "server_id": "test-backend" }))
}

async fn login(headers: HeaderMap, uri: Uri) -> impl IntoResponse {
    ([("x-new-session-data", LOGIN_PAYLOAD)], Json(describe(&headers, &uri)))
}

async fn logout(headers: HeaderMap, uri: Uri) -> impl IntoResponse {
    ([("x-new-session-data", "{}")], Json(describe(&headers, &uri)))
}

fn describe(headers: &HeaderMap, uri: &Uri) -> Value {
    let get = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);
    json!({
        "path": uri.path(),
        "query": uri.query(),
        "session_id": get("x-session-id"),
        "session_data": get("x-session-data"),
        "forwarded_for": get("x-forwarded-for"),
    })
}

/// Start the proxy in front of `backends`, letting the caller adjust the config.
pub async fn start_proxy<F>(backends: &[SocketAddr], configure: F) -> TestProxy
where
    F: FnOnce(&mut ProxyConfig),
{
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.upstream.backends = backends.iter().map(|b| b.to_string()).collect();
    config.store.kind = StoreKind::Memory;
    configure(&mut config);

    let store = MemoryStore::new();
    let client = StoreClient::with_connector(Arc::new(store.clone()), &config.store);

    let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config, client);
    let rx = shutdown.subscribe();
    let server = tokio::spawn(async move {
        let _ = server.run(listener, rx).await;
    });

    TestProxy {
        addr,
        store,
        shutdown,
        client: reqwest::Client::builder().no_proxy().build().unwrap(),
        server: Some(server),
    }
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
