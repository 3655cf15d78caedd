//! Session Resource API handlers.
//!
//! Unlike the proxy path, these surface store failures as status codes:
//! here the session operation is the whole point of the request.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Query, State},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::config::SessionConfig;
use crate::observability::logging::short_id;
use crate::session::SessionId;
use crate::store::StoreClient;

/// State shared by the management handlers.
#[derive(Clone)]
pub struct SessionApi {
    pub store: StoreClient,
    pub settings: Arc<SessionConfig>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionQuery {
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionView {
    pub session_id: String,
    pub data: String,
    pub ttl: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionWritten {
    pub session_id: String,
    pub expires_in: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionDeleted {
    pub session_id: String,
    pub deleted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionList {
    pub count: usize,
    pub sessions: Vec<SessionView>,
}

/// `GET /session?session_id=` reads one session; bare `GET /session` lists them.
pub async fn read_or_list(
    State(api): State<SessionApi>,
    Query(query): Query<SessionQuery>,
) -> Result<Response, ApiError> {
    match query.session_id {
        None => Ok(Json(list(&api).await?).into_response()),
        Some(raw) => Ok(Json(read(&api, &raw).await?).into_response()),
    }
}

/// `POST /session`: store the body under a fresh identifier.
pub async fn create(
    State(api): State<SessionApi>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    body: String,
) -> Result<Json<SessionWritten>, ApiError> {
    if body.is_empty() {
        return Err(ApiError::BadRequest("session data is required".to_string()));
    }

    let id = SessionId::generate(Some(addr.ip()));
    let ttl = api.settings.ttl_secs;
    api.store
        .set_with_ttl(&api.settings.key_for(id.as_str()), &body, ttl)
        .await?;

    tracing::info!(session = short_id(id.as_str()), "Session created");
    Ok(Json(SessionWritten {
        session_id: id.to_string(),
        expires_in: ttl,
    }))
}

/// `PUT /session?session_id=`: replace an existing session's payload.
pub async fn update(
    State(api): State<SessionApi>,
    Query(query): Query<SessionQuery>,
    body: String,
) -> Result<Json<SessionWritten>, ApiError> {
    let id = required_id(query.session_id.as_deref())?;
    if body.is_empty() {
        return Err(ApiError::BadRequest("session data is required".to_string()));
    }

    let ttl = api.settings.ttl_secs;
    let updated = api
        .store
        .update_existing(&api.settings.key_for(id.as_str()), &body, ttl)
        .await?;
    if !updated {
        return Err(ApiError::NotFound);
    }

    tracing::info!(session = short_id(id.as_str()), "Session updated");
    Ok(Json(SessionWritten {
        session_id: id.to_string(),
        expires_in: ttl,
    }))
}

/// `DELETE /session?session_id=`.
pub async fn remove(
    State(api): State<SessionApi>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<SessionDeleted>, ApiError> {
    let id = required_id(query.session_id.as_deref())?;

    let removed = api.store.del(&api.settings.key_for(id.as_str())).await?;
    if removed == 0 {
        return Err(ApiError::NotFound);
    }

    tracing::info!(session = short_id(id.as_str()), "Session deleted");
    Ok(Json(SessionDeleted {
        session_id: id.to_string(),
        deleted: true,
    }))
}

async fn read(api: &SessionApi, raw: &str) -> Result<SessionView, ApiError> {
    let id = required_id(Some(raw))?;
    let key = api.settings.key_for(id.as_str());

    let data = api.store.get(&key).await?.ok_or(ApiError::NotFound)?;
    let ttl = api.store.ttl(&key).await?;

    Ok(SessionView {
        session_id: id.to_string(),
        data,
        ttl,
    })
}

/// Prefix scan over the whole session namespace. Fine for small and
/// moderate session counts; not meant for very large keyspaces.
async fn list(api: &SessionApi) -> Result<SessionList, ApiError> {
    let prefix = &api.settings.key_prefix;
    let entries = api.store.list_prefix(prefix).await?;

    let sessions: Vec<SessionView> = entries
        .into_iter()
        .map(|entry| SessionView {
            session_id: entry.key.strip_prefix(prefix.as_str()).unwrap_or(&entry.key).to_string(),
            data: entry.value,
            ttl: entry.ttl,
        })
        .collect();

    Ok(SessionList {
        count: sessions.len(),
        sessions,
    })
}

/// A present, well-formed identifier. Malformed ones cannot name a session.
fn required_id(raw: Option<&str>) -> Result<SessionId, ApiError> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty()).ok_or(ApiError::MissingId)?;
    SessionId::parse(raw).ok_or(ApiError::NotFound)
}
