// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::Ordering;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};

use super::*;
use crate::assert_err_contains;
use crate::test_support::StubTokenEndpoint;
use crate::token::epoch_ms;

#[derive(Default)]
struct Seen {
    authorization: Option<String>,
    body: Option<Value>,
}

type Reply = fn(&Value) -> (StatusCode, Value);

#[derive(Clone)]
struct MockState {
    seen: Arc<Mutex<Seen>>,
    reply: Reply,
}

async fn create_key(
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let (status, reply) = (state.reply)(&body);
    let mut seen = state.seen.lock();
    seen.authorization =
        headers.get("authorization").and_then(|v| v.to_str().ok()).map(str::to_owned);
    seen.body = Some(body);
    (status, Json(reply))
}

fn echo_name(body: &Value) -> (StatusCode, Value) {
    let expiration = epoch_ms(SystemTime::now() + Duration::from_secs(3600));
    let reply = json!({
        "id": "key-id",
        "name": body["name"],
        "api_key": "key-secret",
        "expiration": expiration,
    });
    (StatusCode::OK, reply)
}

fn no_expiration(body: &Value) -> (StatusCode, Value) {
    (StatusCode::OK, json!({ "id": "key-id", "name": body["name"], "api_key": "key-secret" }))
}

/// A service whose clock runs two hours behind, issuing a one-hour token.
fn lagging_clock(body: &Value) -> (StatusCode, Value) {
    let expiration = epoch_ms(SystemTime::now() - Duration::from_secs(3600));
    let reply = json!({
        "id": "key-id",
        "name": body["name"],
        "api_key": "key-secret",
        "expiration": expiration,
    });
    (StatusCode::OK, reply)
}

fn forbidden(_body: &Value) -> (StatusCode, Value) {
    (StatusCode::FORBIDDEN, json!({ "error": "security_exception" }))
}

async fn spawn_mock(reply: Reply) -> anyhow::Result<(String, Arc<Mutex<Seen>>)> {
    let seen = Arc::new(Mutex::new(Seen::default()));
    let state = MockState { seen: Arc::clone(&seen), reply };
    let app = Router::new().route("/_security/api_key", post(create_key)).with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}/"), seen))
}

fn context() -> AuthenticatedContext {
    AuthenticatedContext::new("user", SecretMaterial::new(b"pass".to_vec()))
}

fn acquirer_for(endpoint: Arc<dyn TokenEndpoint>) -> TokenAcquirer {
    TokenAcquirer::new(endpoint).with_prefix("test-token-")
}

#[tokio::test]
async fn http_endpoint_issues_api_key() -> anyhow::Result<()> {
    let (base, seen) = spawn_mock(echo_name).await?;
    let endpoint = Arc::new(HttpTokenEndpoint::new(base, Duration::from_secs(5))?);
    let acquirer = acquirer_for(endpoint).with_lifetime(Some(Duration::from_secs(600)));

    let token = acquirer.acquire(&context()).await?;
    assert!(token.name().starts_with("test-token-"));
    assert_eq!(token.secret().expose(), b"key-id:key-secret");
    assert!(token.expires_at() > token.issued_at());

    let seen = seen.lock();
    assert_eq!(seen.authorization.as_deref(), Some("Basic dXNlcjpwYXNz"));
    let body = seen.body.as_ref().ok_or_else(|| anyhow::anyhow!("no request body"))?;
    assert_eq!(body["name"], token.name());
    assert_eq!(body["expiration"], "600s");
    Ok(())
}

#[tokio::test]
async fn http_endpoint_omits_expiration_without_lifetime() -> anyhow::Result<()> {
    let (base, seen) = spawn_mock(echo_name).await?;
    let endpoint = Arc::new(HttpTokenEndpoint::new(base, Duration::from_secs(5))?);
    acquirer_for(endpoint).acquire(&context()).await?;
    let seen = seen.lock();
    let body = seen.body.as_ref().ok_or_else(|| anyhow::anyhow!("no request body"))?;
    assert!(body.get("expiration").is_none());
    Ok(())
}

#[tokio::test]
async fn rejected_request_is_issuance_error() -> anyhow::Result<()> {
    let (base, _seen) = spawn_mock(forbidden).await?;
    let endpoint = Arc::new(HttpTokenEndpoint::new(base, Duration::from_secs(5))?);
    let result = acquirer_for(endpoint).acquire(&context()).await;
    assert!(matches!(result, Err(CredentialError::Issuance(_))));
    assert_err_contains!(result, "403");
    Ok(())
}

#[tokio::test]
async fn missing_expiration_is_issuance_error() -> anyhow::Result<()> {
    let (base, _seen) = spawn_mock(no_expiration).await?;
    let endpoint = Arc::new(HttpTokenEndpoint::new(base, Duration::from_secs(5))?);
    let result = acquirer_for(endpoint).acquire(&context()).await;
    assert_err_contains!(result, "no expiration");
    Ok(())
}

#[tokio::test]
async fn lagging_service_clock_still_issues() -> anyhow::Result<()> {
    let (base, _seen) = spawn_mock(lagging_clock).await?;
    let endpoint = Arc::new(HttpTokenEndpoint::new(base, Duration::from_secs(5))?);
    let before = SystemTime::now();
    let token = acquirer_for(endpoint).acquire(&context()).await?;
    assert!(token.expires_at() < before);
    assert!(token.issued_at() < token.expires_at());
    Ok(())
}

#[test]
fn empty_endpoint_url_is_rejected() {
    assert_err_contains!(HttpTokenEndpoint::new("/", Duration::from_secs(1)), "empty");
}

#[tokio::test]
async fn names_are_unique_per_call() -> anyhow::Result<()> {
    let stub = StubTokenEndpoint::new(Duration::from_secs(60));
    let acquirer = acquirer_for(stub.clone());
    let first = acquirer.acquire(&context()).await?;
    let second = acquirer.acquire(&context()).await?;
    assert_ne!(first.name(), second.name());
    assert_eq!(stub.call_count(), 2);
    Ok(())
}

#[tokio::test]
async fn renamed_token_is_rejected() {
    let stub = StubTokenEndpoint::new(Duration::from_secs(60));
    stub.rename.store(true, Ordering::Relaxed);
    let result = acquirer_for(stub).acquire(&context()).await;
    assert_err_contains!(result, "but the endpoint issued");
}

#[tokio::test]
async fn endpoint_failure_is_wrapped_as_issuance() {
    let stub = StubTokenEndpoint::new(Duration::from_secs(60));
    stub.set_fail(true);
    let result = acquirer_for(stub).acquire(&context()).await;
    assert!(matches!(result, Err(CredentialError::Issuance(_))));
    assert_err_contains!(result, "stub endpoint unavailable");
}
