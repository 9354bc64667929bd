//! HTTP surface behavior: status mapping, body limits, rate limiting.

use crate::{
    mock_infrastructure::{app_from_toml, MockBackend},
    support::{as_json, post_rpc},
};
use axum::{body::Body, http::Request};
use serde_json::json;
use tower::ServiceExt;

fn config(backend_url: &str, extra: &str) -> String {
    format!(
        r#"
{extra}

[[backends]]
name = "main"
url = "{backend_url}"

[[backend_groups]]
name = "main"
backends = ["main"]

[default_rpc_method_mappings]
default_group = "main"
"#
    )
}

#[tokio::test]
async fn invalid_json_returns_400_with_parse_error_body() {
    let mut backend = MockBackend::start().await;
    let silent = backend.expect_no_traffic().await;
    let app = app_from_toml(&config(&backend.url(), ""));

    let (status, body) = post_rpc(app, &[], "{not json").await;

    assert_eq!(status, 400);
    assert_eq!(as_json(&body)["error"]["code"], json!(-32700));
    silent.assert_async().await;
}

#[tokio::test]
async fn oversized_payload_returns_413() {
    let mut backend = MockBackend::start().await;
    let silent = backend.expect_no_traffic().await;
    let app = app_from_toml(&config(
        &backend.url(),
        "[server]\nmax_body_size = 64",
    ));

    let huge = json!({
        "jsonrpc": "2.0",
        "method": "eth_blockNumber",
        "params": ["x".repeat(512)],
        "id": 1
    });
    let (status, _) = post_rpc(app, &[], &huge.to_string()).await;

    assert_eq!(status, 413);
    silent.assert_async().await;
}

#[tokio::test]
async fn rate_limit_denial_returns_429_for_the_whole_request() {
    let mut backend = MockBackend::start().await;
    backend.respond_single(&json!("0x10"), &json!(1), 2).await;
    let app = app_from_toml(&config(
        &backend.url(),
        "[rate_limit]\nenabled = true\nmax_rps = 1\nburst = 2",
    ));

    let body = json!({"jsonrpc": "2.0", "method": "eth_blockNumber", "id": 1}).to_string();
    let client = [("x-forwarded-for", "10.0.0.1")];

    let (status, _) = post_rpc(app.clone(), &client, &body).await;
    assert_eq!(status, 200);
    let (status, _) = post_rpc(app.clone(), &client, &body).await;
    assert_eq!(status, 200);

    let (status, denied) = post_rpc(app.clone(), &client, &body).await;
    assert_eq!(status, 429);
    assert_eq!(as_json(&denied)["error"]["code"], json!(-32017));

    // A different subject has its own bucket.
    let (status, _) = post_rpc(app, &[("x-forwarded-for", "10.0.0.2")], &body).await;
    assert_ne!(status, 429);
}

#[tokio::test]
async fn batch_charges_its_size_against_the_limiter() {
    let mut backend = MockBackend::start().await;
    let silent = backend.expect_no_traffic().await;
    let app = app_from_toml(&config(
        &backend.url(),
        "[rate_limit]\nenabled = true\nmax_rps = 1\nburst = 3",
    ));

    // Four sub-requests against a burst of three: denied atomically.
    let batch = json!([
        {"jsonrpc": "2.0", "method": "eth_blockNumber", "id": 1},
        {"jsonrpc": "2.0", "method": "eth_blockNumber", "id": 2},
        {"jsonrpc": "2.0", "method": "eth_blockNumber", "id": 3},
        {"jsonrpc": "2.0", "method": "eth_blockNumber", "id": 4},
    ]);
    let (status, _) = post_rpc(app, &[("x-forwarded-for", "10.0.0.9")], &batch.to_string()).await;

    assert_eq!(status, 429);
    silent.assert_async().await;
}

#[tokio::test]
async fn empty_batch_is_invalid_request_with_200() {
    let mut backend = MockBackend::start().await;
    let silent = backend.expect_no_traffic().await;
    let app = app_from_toml(&config(&backend.url(), ""));

    let (status, body) = post_rpc(app, &[], "[]").await;

    assert_eq!(status, 200);
    assert_eq!(as_json(&body)["error"]["code"], json!(-32600));
    silent.assert_async().await;
}

#[tokio::test]
async fn non_object_payload_is_invalid_request() {
    let mut backend = MockBackend::start().await;
    let silent = backend.expect_no_traffic().await;
    let app = app_from_toml(&config(&backend.url(), ""));

    let (status, body) = post_rpc(app, &[], "42").await;

    assert_eq!(status, 200);
    let body = as_json(&body);
    assert_eq!(body["error"]["code"], json!(-32600));
    assert_eq!(body["id"], json!(null));
    silent.assert_async().await;
}

#[tokio::test]
async fn response_carries_json_content_type() {
    let mut backend = MockBackend::start().await;
    backend.respond_single(&json!("0x10"), &json!(1), 1).await;
    let app = app_from_toml(&config(&backend.url(), ""));

    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"jsonrpc": "2.0", "method": "eth_blockNumber", "id": 1}).to_string(),
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("content-type").and_then(|v| v.to_str().ok()),
        Some("application/json")
    );
}

#[tokio::test]
async fn healthz_answers_ok() {
    let backend = MockBackend::start().await;
    let app = app_from_toml(&config(&backend.url(), ""));

    let request = Request::builder().method("GET").uri("/healthz").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), 200);
}
