//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the proxy, session API and health handlers
//! - Wire up middleware (tracing, request ID, timeout, in-flight ceiling)
//! - Run the session pipeline around every proxied request
//! - Bind server to listener and shut down gracefully

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use http_body::{Body as HttpBody, Frame, SizeHint};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::api::{session_router, SessionApi};
use crate::config::ProxyConfig;
use crate::http::request::{propagate_request_id_layer, request_id, set_request_id_layer};
use crate::http::upstream::{Upstream, UpstreamError};
use crate::observability::{logging::short_id, metrics};
use crate::session::{session_middleware, MutationPersister, ResolvedSession, SessionPipeline};
use crate::store::StoreClient;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub upstream: Arc<Upstream>,
    pub store: StoreClient,
}

/// HTTP server for the session affinity proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    store: StoreClient,
    persister: MutationPersister,
}

impl HttpServer {
    /// Create a new HTTP server over an already-built store client.
    pub fn new(config: ProxyConfig, store: StoreClient) -> Self {
        let upstream = Arc::new(Upstream::from_addresses(
            &config.upstream.backends,
            Duration::from_secs(config.timeouts.upstream_connect_secs),
        ));

        let state = AppState {
            upstream,
            store: store.clone(),
        };
        let pipeline = SessionPipeline::new(store.clone(), config.session.clone());
        let persister = pipeline.persister.clone();

        let router = Self::build_router(&config, state, pipeline);
        Self {
            router,
            config,
            store,
            persister,
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, state: AppState, pipeline: SessionPipeline) -> Router {
        let proxy = Router::new()
            .route("/", any(proxy_handler))
            .route("/{*path}", any(proxy_handler))
            .with_state(state.clone())
            .layer(middleware::from_fn_with_state(pipeline.clone(), session_middleware));

        let api = SessionApi {
            store: state.store.clone(),
            settings: pipeline.settings.clone(),
        };

        let mut app = Router::new()
            .route("/healthz", get(health_handler))
            .with_state(state);

        if config.management.enabled {
            app = app.merge(session_router(api, &config.management));
        }

        let in_flight = Arc::new(Semaphore::new(config.listener.max_connections));

        app.merge(proxy)
            .layer(middleware::from_fn_with_state(in_flight, in_flight_limit))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            backends = self.config.upstream.backends.len(),
            store = %self.config.store.endpoint(),
            "HTTP server starting"
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        // Connections are closed; give queued session writes a bounded
        // window before the pool goes away.
        self.persister
            .drain(self.config.store.connect_timeout() + self.config.store.command_timeout())
            .await;
        self.store.close();
        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

/// Forward a request to a backend. Runs inside the session pipeline.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    let start_time = Instant::now();
    let request_id = request_id(request.headers()).to_string();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let session = request
        .extensions()
        .get::<ResolvedSession>()
        .map(|s| short_id(s.0.as_str()).to_string());

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        path = %path,
        session = ?session,
        "Proxying request"
    );

    match state.upstream.forward(request, addr).await {
        Ok((backend, response)) => {
            metrics::record_request(&method, response.status().as_u16(), start_time);
            tracing::debug!(
                request_id = %request_id,
                backend = %backend,
                status = %response.status(),
                "Upstream responded"
            );
            response
        }
        Err(UpstreamError::NoBackend) => {
            tracing::warn!(request_id = %request_id, "No backends configured");
            metrics::record_request(&method, 503, start_time);
            (StatusCode::SERVICE_UNAVAILABLE, "No backends available").into_response()
        }
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Upstream error");
            metrics::record_request(&method, 502, start_time);
            (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
        }
    }
}

/// Liveness plus a store round trip.
async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let store = match state.store.ping().await {
        Ok(()) => "up",
        Err(e) => {
            tracing::warn!(error = %e, "Store health check failed");
            "down"
        }
    };
    Json(json!({ "status": "ok", "store": store }))
}

/// Reject requests beyond the configured in-flight ceiling.
///
/// A request counts against the ceiling until its response body has been
/// sent or dropped.
async fn in_flight_limit(
    State(permits): State<Arc<Semaphore>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    match permits.try_acquire_owned() {
        Ok(permit) => next
            .run(request)
            .await
            .map(|body| Body::new(HoldPermit { inner: body, _permit: permit })),
        Err(_) => {
            tracing::warn!(path = %request.uri().path(), "In-flight request limit reached");
            (StatusCode::SERVICE_UNAVAILABLE, "Too many requests in flight").into_response()
        }
    }
}

/// Response body that keeps an in-flight permit until it is dropped.
struct HoldPermit {
    inner: Body,
    _permit: OwnedSemaphorePermit,
}

impl HttpBody for HoldPermit {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.get_mut().inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
