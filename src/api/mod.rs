//! Session Resource API: CRUD over the session store for operators and tests.
//!
//! ```text
//! GET    /session?session_id=<id>   read
//! GET    /session                   list
//! POST   /session                   create (body = payload)
//! PUT    /session?session_id=<id>   update (body = payload)
//! DELETE /session?session_id=<id>   delete
//! ```

pub mod auth;
pub mod error;
pub mod handlers;

use axum::{middleware, routing::get, Router};

use self::auth::{api_key_middleware, ApiKey};
use self::handlers::*;
use crate::config::ManagementConfig;

pub use error::ApiError;
pub use handlers::SessionApi;

pub fn session_router(api: SessionApi, config: &ManagementConfig) -> Router {
    let key = ApiKey(config.api_key.as_deref().map(Into::into));

    Router::new()
        .route(
            &config.path,
            get(read_or_list).post(create).put(update).delete(remove),
        )
        .layer(middleware::from_fn_with_state(key, api_key_middleware))
        .with_state(api)
}
