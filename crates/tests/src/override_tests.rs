//! Method-override behavior through the full HTTP pipeline.

use crate::{
    mock_infrastructure::{app_from_toml, MockBackend},
    support::{as_json, post_rpc},
};
use serde_json::json;

fn config(backend_url: &str) -> String {
    format!(
        r#"
[[backends]]
name = "main"
url = "{backend_url}"

[[backend_groups]]
name = "main"
backends = ["main"]

[default_rpc_method_mappings]
default_group = "main"

[[method_overrides]]
method = "eth_call"
response = "0x1000"

[method_overrides.matchers]
"params[0].to" = "0xaBcD123456789012345678901234567890123456"
"params[0].value" = "0xaBcD1234"
"#
    )
}

fn eth_call_body(to: &str, value: &str) -> String {
    json!({
        "jsonrpc": "2.0",
        "method": "eth_call",
        "params": [{"to": to, "value": value}, "latest"],
        "id": "999"
    })
    .to_string()
}

#[tokio::test]
async fn override_hit_synthesizes_response_with_no_backend_traffic() {
    struct Case {
        name: &'static str,
        to: &'static str,
        value: &'static str,
    }
    let cases = [
        Case {
            name: "exact case",
            to: "0xaBcD123456789012345678901234567890123456",
            value: "0xaBcD1234",
        },
        Case {
            name: "mixed case",
            to: "0xAbCd123456789012345678901234567890123456",
            value: "0xAbCd1234",
        },
        Case {
            name: "lower case",
            to: "0xabcd123456789012345678901234567890123456",
            value: "0xabcd1234",
        },
        Case {
            name: "upper case",
            to: "0xABCD123456789012345678901234567890123456",
            value: "0xABCD1234",
        },
    ];

    for case in cases {
        let mut backend = MockBackend::start().await;
        let silent = backend.expect_no_traffic().await;
        let app = app_from_toml(&config(&backend.url()));

        let (status, body) = post_rpc(app, &[], &eth_call_body(case.to, case.value)).await;
        assert_eq!(status, 200, "{}", case.name);
        let body = as_json(&body);
        assert_eq!(body["result"], json!("0x1000"), "{}", case.name);
        assert_eq!(body["id"], json!("999"), "{}", case.name);
        silent.assert_async().await;
    }
}

#[tokio::test]
async fn override_miss_forwards_to_backend() {
    struct Case {
        name: &'static str,
        to: &'static str,
        value: &'static str,
    }
    let cases = [
        Case {
            name: "different address",
            to: "0x1111111111111111111111111111111111111111",
            value: "0x0",
        },
        Case {
            name: "same address, different value",
            to: "0xabcd123456789012345678901234567890123456",
            value: "0x1",
        },
    ];

    for case in cases {
        let mut backend = MockBackend::start().await;
        let upstream = backend
            .respond_single(&json!("mock_backend_response"), &json!("999"), 1)
            .await;
        let app = app_from_toml(&config(&backend.url()));

        let (status, body) = post_rpc(app, &[], &eth_call_body(case.to, case.value)).await;
        assert_eq!(status, 200, "{}", case.name);
        let body = as_json(&body);
        assert_eq!(body["result"], json!("mock_backend_response"), "{}", case.name);
        upstream.assert_async().await;
    }
}

#[tokio::test]
async fn override_with_missing_matcher_path_forwards_to_backend() {
    let mut backend = MockBackend::start().await;
    let upstream = backend.respond_single(&json!("0xfe"), &json!("999"), 1).await;
    let app = app_from_toml(&config(&backend.url()));

    // No `value` key at all: the matcher path is absent, so the rule must not fire.
    let body = json!({
        "jsonrpc": "2.0",
        "method": "eth_call",
        "params": [{"to": "0xaBcD123456789012345678901234567890123456"}, "latest"],
        "id": "999"
    });
    let (status, body) = post_rpc(app, &[], &body.to_string()).await;
    assert_eq!(status, 200);
    assert_eq!(as_json(&body)["result"], json!("0xfe"));
    upstream.assert_async().await;
}

#[tokio::test]
async fn override_applies_regardless_of_backend_health() {
    // The backend URL points at a closed port; an override hit must still
    // answer because no backend is consulted at all.
    let raw = config("http://127.0.0.1:1");
    let app = app_from_toml(&raw);

    let (status, body) = post_rpc(
        app,
        &[],
        &eth_call_body("0xabcd123456789012345678901234567890123456", "0xabcd1234"),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(as_json(&body)["result"], json!("0x1000"));
}
