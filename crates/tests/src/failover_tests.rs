//! Failover, retry, and health-eviction behavior.

use crate::{
    mock_infrastructure::{app_from_toml, MockBackend},
    support::{as_json, post_rpc},
};
use serde_json::json;

fn failover_config(backend1_url: &str, backend2_url: &str) -> String {
    format!(
        r#"
[[backends]]
name = "b1"
url = "{backend1_url}"
failure_threshold = 1

[[backends]]
name = "b2"
url = "{backend2_url}"
failure_threshold = 1

[[backend_groups]]
name = "main"
backends = ["b1", "b2"]
policy = "round_robin"
max_retries = 1

[default_rpc_method_mappings]
default_group = "main"
"#
    )
}

fn block_number_body() -> String {
    json!({"jsonrpc": "2.0", "method": "eth_blockNumber", "id": 1}).to_string()
}

#[tokio::test]
async fn http_5xx_fails_over_and_unhealthy_backend_is_skipped_afterwards() {
    let mut b1 = MockBackend::start().await;
    let mut b2 = MockBackend::start().await;

    // b1 serves 502 and must be hit exactly once across BOTH client requests:
    // the first request retries onto b2, the second skips b1 entirely because
    // one failure tripped its threshold.
    let b1_mock = b1.respond_status(502, 1).await;
    let b2_mock = b2.respond_single(&json!("0x10"), &json!(1), 2).await;

    let app = app_from_toml(&failover_config(&b1.url(), &b2.url()));

    let (status, body) = post_rpc(app.clone(), &[], &block_number_body()).await;
    assert_eq!(status, 200);
    assert_eq!(as_json(&body)["result"], json!("0x10"), "first request failed over to b2");

    let (status, body) = post_rpc(app, &[], &block_number_body()).await;
    assert_eq!(status, 200);
    assert_eq!(as_json(&body)["result"], json!("0x10"), "second request skipped unhealthy b1");

    b1_mock.assert_async().await;
    b2_mock.assert_async().await;
}

#[tokio::test]
async fn json_rpc_error_bodies_are_definitive_and_never_retried() {
    let mut b1 = MockBackend::start().await;
    let mut b2 = MockBackend::start().await;

    let b1_mock = b1
        .respond_single_error(3, "execution reverted", &json!(1), 1)
        .await;
    let b2_mock = b2.expect_no_traffic().await;

    let app = app_from_toml(&failover_config(&b1.url(), &b2.url()));
    let (status, body) = post_rpc(app, &[], &block_number_body()).await;

    assert_eq!(status, 200);
    let body = as_json(&body);
    assert_eq!(body["error"]["code"], json!(3));
    assert_eq!(body["error"]["message"], json!("execution reverted"));
    b1_mock.assert_async().await;
    b2_mock.assert_async().await;
}

#[tokio::test]
async fn unreachable_backend_surfaces_upstream_error_then_no_backends() {
    let raw = format!(
        r#"
[[backends]]
name = "down"
url = "http://127.0.0.1:1"
failure_threshold = 1

[[backend_groups]]
name = "main"
backends = ["down"]

[default_rpc_method_mappings]
default_group = "main"
"#
    );
    let app = app_from_toml(&raw);

    // First request reaches the dead socket and reports an upstream error.
    let (status, body) = post_rpc(app.clone(), &[], &block_number_body()).await;
    assert_eq!(status, 200);
    let body = as_json(&body);
    assert_eq!(body["error"]["code"], json!(-32010));
    assert_eq!(body["error"]["message"], json!("upstream error"));

    // The failure tripped the threshold; now nothing is selectable.
    let (status, body) = post_rpc(app, &[], &block_number_body()).await;
    assert_eq!(status, 200);
    let body = as_json(&body);
    assert_eq!(body["error"]["code"], json!(-32011));
    assert_eq!(body["error"]["message"], json!("no backends available"));
}

#[tokio::test]
async fn retries_exhausted_return_the_last_error() {
    let mut b1 = MockBackend::start().await;
    let mut b2 = MockBackend::start().await;

    // Both members 503: attempt + one retry, then the error surfaces.
    let b1_mock = b1.respond_status(503, 1).await;
    let b2_mock = b2.respond_status(503, 1).await;

    let app = app_from_toml(&failover_config(&b1.url(), &b2.url()));
    let (status, body) = post_rpc(app, &[], &block_number_body()).await;

    assert_eq!(status, 200);
    let body = as_json(&body);
    assert_eq!(body["error"]["code"], json!(-32010));
    b1_mock.assert_async().await;
    b2_mock.assert_async().await;
}

#[tokio::test]
async fn sibling_sub_requests_survive_a_failed_chunk() {
    let mut good = MockBackend::start().await;
    let good_mock = good.respond_single(&json!("0x10"), &json!(1), 1).await;

    let raw = format!(
        r#"
[[backends]]
name = "good"
url = "{good_url}"

[[backends]]
name = "down"
url = "http://127.0.0.1:1"
failure_threshold = 1

[[backend_groups]]
name = "good"
backends = ["good"]

[[backend_groups]]
name = "bad"
backends = ["down"]

[default_rpc_method_mappings.methods]
eth_blockNumber = "good"
eth_getBalance = "bad"
"#,
        good_url = good.url()
    );
    let app = app_from_toml(&raw);

    let batch = json!([
        {"jsonrpc": "2.0", "method": "eth_blockNumber", "id": 1},
        {"jsonrpc": "2.0", "method": "eth_getBalance", "params": ["0x0", "latest"], "id": 2},
    ]);
    let (status, body) = post_rpc(app, &[], &batch.to_string()).await;

    assert_eq!(status, 200);
    let body = as_json(&body);
    let entries = body.as_array().unwrap();
    assert_eq!(entries[0]["result"], json!("0x10"), "healthy chunk unaffected");
    assert_eq!(entries[1]["error"]["code"], json!(-32010), "failed chunk stays local");
    good_mock.assert_async().await;
}
