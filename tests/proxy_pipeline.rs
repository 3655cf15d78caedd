//! End-to-end behavior of the session pipeline around proxied requests.

use reqwest::StatusCode;
use serde_json::Value;

mod common;

use common::{eventually, start_backend, start_proxy, LOGIN_PAYLOAD};

const CART: &str = r#"{"cart":["apple"]}"#;

async fn fetch(proxy: &common::TestProxy, path: &str, cookie: Option<&str>) -> (StatusCode, reqwest::header::HeaderMap, Value) {
    let mut req = proxy.client.get(proxy.url(path));
    if let Some(cookie) = cookie {
        req = req.header("cookie", cookie);
    }
    let res = req.send().await.unwrap();
    let status = res.status();
    let headers = res.headers().clone();
    let body = res.json().await.unwrap_or(Value::Null);
    (status, headers, body)
}

#[tokio::test]
async fn cookie_session_reaches_backend() {
    let backend = start_backend().await;
    let proxy = start_proxy(&[backend], |_| {}).await;
    let id = proxy.create_session(CART).await;

    let (status, _, body) = fetch(&proxy, "/profile?tab=1", Some(&format!("PHPSESSID={id}; theme=dark"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["path"], "/profile");
    assert_eq!(body["query"], "tab=1");
    assert_eq!(body["session_id"], id.as_str());
    assert_eq!(body["session_data"], CART);
    assert_eq!(body["forwarded_for"], "127.0.0.1");
}

#[tokio::test]
async fn id_header_works_without_cookie() {
    let backend = start_backend().await;
    let proxy = start_proxy(&[backend], |_| {}).await;
    let id = proxy.create_session(CART).await;

    let body: Value = proxy
        .client
        .get(proxy.url("/"))
        .header("x-session-id", &id)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["session_id"], id.as_str());
    assert_eq!(body["session_data"], CART);
}

#[tokio::test]
async fn cookie_wins_over_header() {
    let backend = start_backend().await;
    let proxy = start_proxy(&[backend], |_| {}).await;
    let from_cookie = proxy.create_session(r#"{"src":"cookie"}"#).await;
    let from_header = proxy.create_session(r#"{"src":"header"}"#).await;

    let body: Value = proxy
        .client
        .get(proxy.url("/"))
        .header("cookie", format!("PHPSESSID={from_cookie}"))
        .header("x-session-id", &from_header)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["session_id"], from_cookie.as_str());
    assert_eq!(body["session_data"], r#"{"src":"cookie"}"#);
}

#[tokio::test]
async fn unknown_session_forwards_without_annotation() {
    let backend = start_backend().await;
    let proxy = start_proxy(&[backend], |_| {}).await;

    let (status, _, body) = fetch(&proxy, "/", Some(&format!("PHPSESSID={}", "d".repeat(64)))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["session_id"].is_null());
    assert!(body["session_data"].is_null());
}

#[tokio::test]
async fn client_cannot_spoof_session_headers() {
    let backend = start_backend().await;
    let proxy = start_proxy(&[backend], |_| {}).await;

    let body: Value = proxy
        .client
        .get(proxy.url("/"))
        .header("x-session-id", "forged")
        .header("x-session-data", r#"{"role":"admin"}"#)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(body["session_id"].is_null());
    assert!(body["session_data"].is_null());
}

#[tokio::test]
async fn backend_mutation_is_persisted_and_hidden() {
    let backend = start_backend().await;
    let proxy = start_proxy(&[backend], |_| {}).await;
    let id = proxy.create_session(CART).await;
    let key = format!("session:{id}");

    let (status, headers, _) = fetch(&proxy, "/login", Some(&format!("PHPSESSID={id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers.get("x-new-session-data").is_none());

    let store = proxy.store.clone();
    assert!(eventually(|| store.peek(&key).as_deref() == Some(LOGIN_PAYLOAD)).await);
    assert!(proxy.store.peek_ttl(&key).unwrap().as_secs() > 86_000);

    // The next request sees the new payload.
    let (_, _, body) = fetch(&proxy, "/", Some(&format!("PHPSESSID={id}"))).await;
    assert_eq!(body["session_data"], LOGIN_PAYLOAD);
}

#[tokio::test]
async fn logout_sentinel_expires_session() {
    let backend = start_backend().await;
    let proxy = start_proxy(&[backend], |_| {}).await;
    let id = proxy.create_session(LOGIN_PAYLOAD).await;
    let key = format!("session:{id}");

    let (status, headers, _) = fetch(&proxy, "/logout", Some(&format!("PHPSESSID={id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers.get("x-new-session-data").is_none());

    let store = proxy.store.clone();
    assert!(eventually(|| store.peek(&key).is_none()).await);

    let (_, _, body) = fetch(&proxy, "/", Some(&format!("PHPSESSID={id}"))).await;
    assert!(body["session_id"].is_null());
}

#[tokio::test]
async fn first_mutation_creates_record() {
    let backend = start_backend().await;
    let proxy = start_proxy(&[backend], |_| {}).await;
    let id = "ab".repeat(32);
    let key = format!("session:{id}");
    assert!(proxy.store.peek(&key).is_none());

    let (status, headers, body) = fetch(&proxy, "/login", Some(&format!("PHPSESSID={id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["session_id"].is_null());
    assert!(headers.get("x-new-session-data").is_none());

    let store = proxy.store.clone();
    assert!(eventually(|| store.peek(&key).as_deref() == Some(LOGIN_PAYLOAD)).await);
    assert!(proxy.store.peek_ttl(&key).unwrap().as_secs() > 86_000);

    let (_, _, body) = fetch(&proxy, "/", Some(&format!("PHPSESSID={id}"))).await;
    assert_eq!(body["session_id"], id.as_str());
    assert_eq!(body["session_data"], LOGIN_PAYLOAD);
}

#[tokio::test]
async fn login_after_logout_recreates_session() {
    let backend = start_backend().await;
    let proxy = start_proxy(&[backend], |_| {}).await;
    let id = proxy.create_session(CART).await;
    let key = format!("session:{id}");
    let cookie = format!("PHPSESSID={id}");
    let store = proxy.store.clone();

    fetch(&proxy, "/logout", Some(&cookie)).await;
    assert!(eventually(|| store.peek(&key).is_none()).await);

    fetch(&proxy, "/login", Some(&cookie)).await;
    assert!(eventually(|| store.peek(&key).as_deref() == Some(LOGIN_PAYLOAD)).await);
}

#[tokio::test]
async fn malformed_identifier_never_creates_record() {
    let backend = start_backend().await;
    let proxy = start_proxy(&[backend], |_| {}).await;

    let (status, headers, _) = fetch(&proxy, "/login", Some("PHPSESSID=not-a-session-id")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers.get("x-new-session-data").is_none());

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let list: Value = proxy.client.get(proxy.url("/session")).send().await.unwrap().json().await.unwrap();
    assert_eq!(list["count"], 0);
}

#[tokio::test]
async fn pending_write_survives_shutdown() {
    let backend = start_backend().await;
    let mut proxy = start_proxy(&[backend], |_| {}).await;
    let id = proxy.create_session(CART).await;
    let key = format!("session:{id}");

    let (status, _, _) = fetch(&proxy, "/login", Some(&format!("PHPSESSID={id}"))).await;
    assert_eq!(status, StatusCode::OK);

    proxy.stop().await;
    assert_eq!(proxy.store.peek(&key).as_deref(), Some(LOGIN_PAYLOAD));
}

#[tokio::test]
async fn backend_health_route_passes_through() {
    let backend = start_backend().await;
    let proxy = start_proxy(&[backend], |_| {}).await;

    let (status, _, body) = fetch(&proxy, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["server_id"], "test-backend");
}

#[tokio::test]
async fn mutation_without_identifier_is_dropped() {
    let backend = start_backend().await;
    let proxy = start_proxy(&[backend], |_| {}).await;

    let (status, headers, _) = fetch(&proxy, "/login", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers.get("x-new-session-data").is_none());

    let list: Value = proxy.client.get(proxy.url("/session")).send().await.unwrap().json().await.unwrap();
    assert_eq!(list["count"], 0);
}

#[tokio::test]
async fn store_outage_fails_open() {
    let backend = start_backend().await;
    let proxy = start_proxy(&[backend], |_| {}).await;
    let id = proxy.create_session(CART).await;
    proxy.store.set_offline(true);

    let (status, _, body) = fetch(&proxy, "/", Some(&format!("PHPSESSID={id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["session_id"].is_null());

    proxy.store.set_offline(false);
    let (_, _, body) = fetch(&proxy, "/", Some(&format!("PHPSESSID={id}"))).await;
    assert_eq!(body["session_data"], CART);
}

#[tokio::test]
async fn requests_rotate_across_backends() {
    let first = start_backend().await;
    let second = start_backend().await;
    let proxy = start_proxy(&[first, second], |_| {}).await;
    let id = proxy.create_session(CART).await;

    // Any backend sees the same session: affinity lives in the store.
    for _ in 0..4 {
        let (status, _, body) = fetch(&proxy, "/", Some(&format!("PHPSESSID={id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["session_data"], CART);
    }
}

#[tokio::test]
async fn no_backends_is_service_unavailable() {
    let proxy = start_proxy(&[], |_| {}).await;
    let (status, _, _) = fetch(&proxy, "/anything", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn request_id_is_returned() {
    let backend = start_backend().await;
    let proxy = start_proxy(&[backend], |_| {}).await;

    let res = proxy.client.get(proxy.url("/")).send().await.unwrap();
    assert!(res.headers().get("x-request-id").is_some());

    let res = proxy
        .client
        .get(proxy.url("/"))
        .header("x-request-id", "trace-me")
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers().get("x-request-id").unwrap(), "trace-me");
}
