//! Domain routing through `X-Forwarded-Host`, with fallback to defaults.

use crate::{
    mock_infrastructure::{app_from_toml, MockBackend},
    support::{as_json, post_rpc},
};
use serde_json::json;

fn two_group_config(backend1_url: &str, backend2_url: &str) -> String {
    format!(
        r#"
[[backends]]
name = "backend1"
url = "{backend1_url}"

[[backends]]
name = "backend2"
url = "{backend2_url}"

[[backend_groups]]
name = "g1"
backends = ["backend1"]

[[backend_groups]]
name = "g2"
backends = ["backend2"]

[default_rpc_method_mappings.methods]
eth_blockNumber = "g1"
eth_chainId = "g1"

[[domain_rpc_method_mappings]]
domain = "domain1.example.com"

[domain_rpc_method_mappings.methods]
eth_blockNumber = "g2"
eth_chainId = "g2"
"#
    )
}

fn block_number_body(id: u64) -> String {
    json!({"jsonrpc": "2.0", "method": "eth_blockNumber", "id": id}).to_string()
}

#[tokio::test]
async fn default_domain_uses_default_mappings() {
    let mut backend1 = MockBackend::start().await;
    let mut backend2 = MockBackend::start().await;
    let hit = backend1.respond_single(&json!("0x10"), &json!(1), 1).await;
    let silent = backend2.expect_no_traffic().await;

    let app = app_from_toml(&two_group_config(&backend1.url(), &backend2.url()));
    let (status, body) = post_rpc(app, &[], &block_number_body(1)).await;

    assert_eq!(status, 200);
    assert_eq!(as_json(&body)["result"], json!("0x10"));
    hit.assert_async().await;
    silent.assert_async().await;
}

#[tokio::test]
async fn domain1_uses_custom_mappings() {
    let mut backend1 = MockBackend::start().await;
    let mut backend2 = MockBackend::start().await;
    let silent = backend1.expect_no_traffic().await;
    let hit = backend2.respond_single(&json!("0x20"), &json!(1), 1).await;

    let app = app_from_toml(&two_group_config(&backend1.url(), &backend2.url()));
    let (status, body) = post_rpc(
        app,
        &[("x-forwarded-host", "domain1.example.com")],
        &block_number_body(1),
    )
    .await;

    assert_eq!(status, 200);
    assert_eq!(as_json(&body)["result"], json!("0x20"));
    hit.assert_async().await;
    silent.assert_async().await;
}

#[tokio::test]
async fn domain_match_is_case_insensitive_on_host() {
    let mut backend1 = MockBackend::start().await;
    let mut backend2 = MockBackend::start().await;
    let silent = backend1.expect_no_traffic().await;
    let hit = backend2.respond_single(&json!("0x20"), &json!(1), 1).await;

    let app = app_from_toml(&two_group_config(&backend1.url(), &backend2.url()));
    let (status, _) = post_rpc(
        app,
        &[("x-forwarded-host", "Domain1.Example.COM")],
        &block_number_body(1),
    )
    .await;

    assert_eq!(status, 200);
    hit.assert_async().await;
    silent.assert_async().await;
}

#[tokio::test]
async fn unknown_domain_falls_back_to_default_mappings() {
    let mut backend1 = MockBackend::start().await;
    let mut backend2 = MockBackend::start().await;
    let hit = backend1.respond_single(&json!("0x10"), &json!(1), 1).await;
    let silent = backend2.expect_no_traffic().await;

    let app = app_from_toml(&two_group_config(&backend1.url(), &backend2.url()));
    let (status, _) = post_rpc(
        app,
        &[("x-forwarded-host", "unknown.example.com")],
        &block_number_body(1),
    )
    .await;

    assert_eq!(status, 200);
    hit.assert_async().await;
    silent.assert_async().await;
}

#[tokio::test]
async fn batch_requests_use_domain_specific_mappings() {
    let mut backend1 = MockBackend::start().await;
    let mut backend2 = MockBackend::start().await;
    let silent = backend1.expect_no_traffic().await;
    // One upstream call carrying both sub-requests; answered out of order.
    let hit = backend2
        .respond_batch(&[(json!("0x38"), json!(2)), (json!("0x10"), json!(1))], 1)
        .await;

    let app = app_from_toml(&two_group_config(&backend1.url(), &backend2.url()));
    let batch = json!([
        {"jsonrpc": "2.0", "method": "eth_blockNumber", "id": 1},
        {"jsonrpc": "2.0", "method": "eth_chainId", "id": 2},
    ]);
    let (status, body) = post_rpc(
        app,
        &[("x-forwarded-host", "domain1.example.com")],
        &batch.to_string(),
    )
    .await;

    assert_eq!(status, 200);
    let body = as_json(&body);
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["id"], json!(1));
    assert_eq!(entries[0]["result"], json!("0x10"));
    assert_eq!(entries[1]["id"], json!(2));
    assert_eq!(entries[1]["result"], json!("0x38"));
    hit.assert_async().await;
    silent.assert_async().await;
}

#[tokio::test]
async fn different_domains_route_to_different_backend_groups() {
    let mut backend_a = MockBackend::start().await;
    let mut backend_b = MockBackend::start().await;
    let mut backend_c = MockBackend::start().await;

    let config = format!(
        r#"
[[backends]]
name = "a"
url = "{a}"

[[backends]]
name = "b"
url = "{b}"

[[backends]]
name = "c"
url = "{c}"

[[backend_groups]]
name = "group_a"
backends = ["a"]

[[backend_groups]]
name = "group_b"
backends = ["b"]

[[backend_groups]]
name = "group_c"
backends = ["c"]

[default_rpc_method_mappings.methods]
eth_call = "group_c"

[[domain_rpc_method_mappings]]
domain = "domaina.example.com"

[domain_rpc_method_mappings.methods]
eth_call = "group_a"

[[domain_rpc_method_mappings]]
domain = "domainb.example.com"

[domain_rpc_method_mappings.methods]
eth_call = "group_b"
"#,
        a = backend_a.url(),
        b = backend_b.url(),
        c = backend_c.url(),
    );

    let call = json!({
        "jsonrpc": "2.0",
        "method": "eth_call",
        "params": [{"to": "0x1234"}, "latest"],
        "id": 1
    })
    .to_string();

    let hit_a = backend_a.respond_single(&json!("0xa"), &json!(1), 1).await;
    let hit_b = backend_b.respond_single(&json!("0xb"), &json!(1), 1).await;
    let hit_c = backend_c.respond_single(&json!("0xc"), &json!(1), 1).await;

    let (_, body) = post_rpc(
        app_from_toml(&config),
        &[("x-forwarded-host", "domainA.example.com")],
        &call,
    )
    .await;
    assert_eq!(as_json(&body)["result"], json!("0xa"));

    let (_, body) = post_rpc(
        app_from_toml(&config),
        &[("x-forwarded-host", "domainB.example.com")],
        &call,
    )
    .await;
    assert_eq!(as_json(&body)["result"], json!("0xb"));

    let (_, body) = post_rpc(app_from_toml(&config), &[], &call).await;
    assert_eq!(as_json(&body)["result"], json!("0xc"));

    hit_a.assert_async().await;
    hit_b.assert_async().await;
    hit_c.assert_async().await;
}

#[tokio::test]
async fn unroutable_method_returns_method_not_found() {
    let mut backend1 = MockBackend::start().await;
    let mut backend2 = MockBackend::start().await;
    let silent1 = backend1.expect_no_traffic().await;
    let silent2 = backend2.expect_no_traffic().await;

    let app = app_from_toml(&two_group_config(&backend1.url(), &backend2.url()));
    let body = json!({"jsonrpc": "2.0", "method": "debug_traceTransaction", "id": 1}).to_string();
    let (status, body) = post_rpc(app, &[], &body).await;

    assert_eq!(status, 200);
    let body = as_json(&body);
    assert_eq!(body["error"]["code"], json!(-32601));
    assert_eq!(body["id"], json!(1));
    silent1.assert_async().await;
    silent2.assert_async().await;
}
