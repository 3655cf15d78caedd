//! The three-phase session lifecycle as one middleware.
//!
//! ```text
//! request  → resolve (store GET) → annotate headers → [proxy handler]
//! response ← capture (strip mutation header) ← backend response
//! body sent → persist (store SETEX / EXPIRE) on a background task
//! ```

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::config::SessionConfig;
use crate::observability::metrics;
use crate::session::capture::capture_mutation;
use crate::session::id::SessionId;
use crate::session::lookup::SessionLookup;
use crate::session::persister::{MutationPersister, PersistOnComplete, PostResponse};
use crate::session::resolver::SessionResolver;
use crate::store::StoreClient;

/// Everything the session phases share. Cheap to clone.
#[derive(Clone)]
pub struct SessionPipeline {
    pub resolver: SessionResolver,
    pub persister: MutationPersister,
    pub settings: Arc<SessionConfig>,
}

impl SessionPipeline {
    pub fn new(store: StoreClient, settings: SessionConfig) -> Self {
        let settings = Arc::new(settings);
        Self {
            resolver: SessionResolver::new(store.clone(), settings.clone()),
            persister: MutationPersister::new(store, settings.clone()),
            settings,
        }
    }
}

/// Session context attached to the request for downstream handlers.
#[derive(Debug, Clone)]
pub struct ResolvedSession(pub SessionId);

/// Axum middleware running resolve → capture → persist for one request.
pub async fn session_middleware(
    State(pipeline): State<SessionPipeline>,
    mut request: Request,
    next: Next,
) -> Response {
    // Mutations are keyed by the claimed identifier even when no record
    // exists yet; that is how a session is first created.
    let claimed = pipeline.resolver.identify(request.headers());
    let lookup = match claimed.clone() {
        Some(id) => pipeline.resolver.lookup(id).await,
        None => SessionLookup::Absent,
    };
    metrics::record_session_lookup(lookup.outcome());
    pipeline.resolver.annotate(request.headers_mut(), &lookup);

    if let Some(id) = lookup.session_id() {
        request.extensions_mut().insert(ResolvedSession(id.clone()));
    }

    let mut response = next.run(request).await;

    let Some(mutation) = capture_mutation(&pipeline.settings, claimed.as_ref(), response.headers_mut()) else {
        return response;
    };

    let mut hooks = PostResponse::default();
    hooks.push(mutation);

    let (parts, body) = response.into_parts();
    let body = PersistOnComplete::new(body, pipeline.persister.clone(), hooks);
    Response::from_parts(parts, Body::new(body))
}
