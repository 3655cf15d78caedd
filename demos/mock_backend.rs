//! Stand-in application server for trying the proxy by hand.
//!
//! ```text
//! cargo run --example mock_backend -- --port 9001 --name app-1
//! ```
//!
//! - `GET /`        echoes the session headers the proxy attached
//! - `GET /login`   stores `{"user":<name>}` via `X-New-Session-Data`
//! - `GET /logout`  asks the proxy to expire the session
//! - `GET /health`  backend liveness, reached through the proxy

use std::net::SocketAddr;

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use clap::Parser;
use serde::Deserialize;
use serde_json::json;

#[derive(Parser)]
struct Args {
    #[arg(short, long, default_value_t = 9001)]
    port: u16,

    /// Reported in every response so rotation is visible.
    #[arg(short, long, default_value = "app-1")]
    name: String,
}

#[derive(Deserialize)]
struct Login {
    user: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let app = Router::new()
        .route("/", get(whoami))
        .route("/login", get(login))
        .route("/logout", get(logout))
        .route("/health", get(health))
        .with_state(args.name.clone());

    let addr = SocketAddr::from(([127, 0, 0, 1], args.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(address = %addr, name = %args.name, "Mock backend listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn session_header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

async fn whoami(State(name): State<String>, headers: HeaderMap) -> impl IntoResponse {
    Json(json!({
        "backend": name,
        "session_id": session_header(&headers, "x-session-id"),
        "session_data": session_header(&headers, "x-session-data"),
    }))
}

async fn login(
    State(name): State<String>,
    headers: HeaderMap,
    Query(login): Query<Login>,
) -> impl IntoResponse {
    let user = login.user.unwrap_or_else(|| "guest".to_string());
    let payload = json!({ "user": user, "logged_in_at": name }).to_string();
    tracing::info!(session = ?session_header(&headers, "x-session-id"), "Login");
    ([("x-new-session-data", payload)], Json(json!({ "backend": name, "user": user })))
}

async fn logout(State(name): State<String>) -> impl IntoResponse {
    ([("x-new-session-data", "{}")], Json(json!({ "backend": name, "logged_out": true })))
}

async fn health(State(name): State<String>) -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy", "server_id": name }))
}
