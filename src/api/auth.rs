use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::api::error::ApiError;

/// Bearer token guarding the Session Resource API. `None` leaves it open.
#[derive(Clone, Default)]
pub struct ApiKey(pub Option<Arc<str>>);

pub async fn api_key_middleware(
    State(key): State<ApiKey>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = key.0.as_deref() else {
        return next.run(request).await;
    };

    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if presented == Some(expected) {
        return next.run(request).await;
    }

    tracing::warn!(path = %request.uri().path(), "Rejected session API request without valid key");
    ApiError::Unauthorized.into_response()
}
