//! Pre-route session resolution.
//!
//! # Responsibilities
//! - Pick the candidate identifier (cookie first, then header)
//! - Validate it and fetch the record from the store
//! - Annotate the forwarded request with identifier and sanitized payload
//!
//! # Design Decisions
//! - Never fails the request: store trouble degrades to "no session"
//! - Never writes to the store
//! - Client-supplied session headers are always removed before annotation

use std::sync::Arc;

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};

use crate::config::SessionConfig;
use crate::observability::logging::short_id;
use crate::session::id::SessionId;
use crate::session::lookup::{sanitize_payload, SessionLookup};
use crate::store::StoreClient;

#[derive(Clone)]
pub struct SessionResolver {
    store: StoreClient,
    settings: Arc<SessionConfig>,
}

impl SessionResolver {
    pub fn new(store: StoreClient, settings: Arc<SessionConfig>) -> Self {
        Self { store, settings }
    }

    /// The identifier the request claims, if any. A cookie wins over the header.
    pub fn candidate_id<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str> {
        cookie_value(headers, &self.settings.cookie_name).or_else(|| {
            headers
                .get(self.settings.id_header.as_str())
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        })
    }

    /// The request's identifier, if it claims one and it is well formed.
    ///
    /// This is the identifier a backend mutation is written under, whether
    /// or not the store holds a record for it yet.
    pub fn identify(&self, headers: &HeaderMap) -> Option<SessionId> {
        let candidate = self.candidate_id(headers)?;
        let id = SessionId::parse(candidate);
        if id.is_none() {
            tracing::debug!(length = candidate.len(), "Ignoring malformed session identifier");
        }
        id
    }

    /// Resolve the request's session. Never returns an error.
    pub async fn resolve(&self, headers: &HeaderMap) -> SessionLookup {
        match self.identify(headers) {
            Some(id) => self.lookup(id).await,
            None => SessionLookup::Absent,
        }
    }

    /// Fetch the record for an already validated identifier.
    pub async fn lookup(&self, id: SessionId) -> SessionLookup {
        match self.store.get(&self.settings.key_for(id.as_str())).await {
            Ok(Some(payload)) => SessionLookup::Resolved {
                payload: sanitize_payload(&payload),
                id,
            },
            Ok(None) => {
                tracing::debug!(session = short_id(id.as_str()), "No session record");
                SessionLookup::Absent
            }
            Err(e) => {
                tracing::warn!(
                    session = short_id(id.as_str()),
                    error = %e,
                    "Session store unavailable, continuing without session"
                );
                SessionLookup::Degraded(e)
            }
        }
    }

    /// Rewrite the forwarded request headers for `lookup`.
    pub fn annotate(&self, headers: &mut HeaderMap, lookup: &SessionLookup) {
        let id_header = header_name(&self.settings.id_header);
        let data_header = header_name(&self.settings.data_header);

        // Only the proxy may speak these headers to the backend.
        if let Some(name) = &id_header {
            headers.remove(name);
        }
        if let Some(name) = &data_header {
            headers.remove(name);
        }

        let SessionLookup::Resolved { id, payload } = lookup else {
            return;
        };
        let (Some(id_header), Some(data_header)) = (id_header, data_header) else {
            return;
        };

        // Validated identifiers are plain ASCII hex.
        let Ok(id_value) = HeaderValue::from_str(id.as_str()) else {
            return;
        };
        match HeaderValue::from_bytes(payload.as_bytes()) {
            Ok(data_value) => {
                headers.insert(id_header, id_value);
                headers.insert(data_header, data_value);
            }
            Err(_) => {
                tracing::warn!(
                    session = short_id(id.as_str()),
                    "Session payload is not representable as a header, forwarding identifier only"
                );
                headers.insert(id_header, id_value);
            }
        }
    }
}

fn header_name(name: &str) -> Option<HeaderName> {
    HeaderName::from_bytes(name.as_bytes()).ok()
}

/// First non-empty value of cookie `name` across all `Cookie` headers.
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| k.trim() == name)
        .map(|(_, v)| v.trim().trim_matches('"'))
        .filter(|v| !v.is_empty())
}
