//! Upstream forwarding.
//!
//! # Responsibilities
//! - Rotate requests over the configured backends
//! - Rewrite the request URI to the chosen backend
//! - Strip hop-by-hop headers in both directions
//! - Add `X-Forwarded-For`
//!
//! Backend health scoring and retries belong to the routing engine in front
//! of or behind this proxy, not here.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, uri::PathAndQuery, HeaderMap, HeaderValue, Request, Response, Uri},
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;

/// Headers that describe a single hop and must not be forwarded.
const HOP_BY_HOP: [header::HeaderName; 7] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("no backends configured")]
    NoBackend,

    #[error("invalid upstream request: {0}")]
    InvalidRequest(#[from] axum::http::Error),

    #[error("upstream request failed: {0}")]
    Request(#[from] hyper_util::client::legacy::Error),
}

/// Backend set plus the HTTP client used to reach it.
pub struct Upstream {
    backends: Vec<SocketAddr>,
    cursor: AtomicUsize,
    client: Client<HttpConnector, Body>,
}

impl Upstream {
    pub fn new(backends: Vec<SocketAddr>, connect_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            backends,
            cursor: AtomicUsize::new(0),
            client,
        }
    }

    /// Parse configured addresses, skipping (and logging) bad ones.
    pub fn from_addresses(addresses: &[String], connect_timeout: Duration) -> Self {
        let backends = addresses
            .iter()
            .filter_map(|a| match a.parse() {
                Ok(addr) => Some(addr),
                Err(_) => {
                    tracing::warn!("Invalid backend address: {}", a);
                    None
                }
            })
            .collect();
        Self::new(backends, connect_timeout)
    }

    pub fn backends(&self) -> &[SocketAddr] {
        &self.backends
    }

    /// Next backend in rotation.
    pub fn next_backend(&self) -> Option<SocketAddr> {
        if self.backends.is_empty() {
            return None;
        }
        let n = self.cursor.fetch_add(1, Ordering::Relaxed);
        Some(self.backends[n % self.backends.len()])
    }

    /// Forward `request` to the next backend and return its response.
    pub async fn forward(
        &self,
        request: Request<Body>,
        client_addr: SocketAddr,
    ) -> Result<(SocketAddr, Response<Body>), UpstreamError> {
        let backend = self.next_backend().ok_or(UpstreamError::NoBackend)?;

        let (mut parts, body) = request.into_parts();
        let path = parts
            .uri
            .path_and_query()
            .cloned()
            .unwrap_or_else(|| PathAndQuery::from_static("/"));
        parts.uri = Uri::builder()
            .scheme("http")
            .authority(backend.to_string())
            .path_and_query(path)
            .build()?;

        strip_hop_by_hop(&mut parts.headers);
        append_forwarded_for(&mut parts.headers, client_addr);

        let response = self
            .client
            .request(Request::from_parts(parts, body))
            .await?;

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        Ok((backend, Response::from_parts(parts, Body::new(body))))
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Headers named in `Connection` are hop-by-hop as well.
    let named: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect();
    for name in named {
        headers.remove(name.as_str());
    }
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
    headers.remove("keep-alive");
}

fn append_forwarded_for(headers: &mut HeaderMap, client_addr: SocketAddr) {
    let ip = client_addr.ip().to_string();
    let value = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{}, {}", existing, ip),
        None => ip,
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert("x-forwarded-for", value);
    }
}
