//! The axum application: request intake, header handling, status mapping.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use junction_core::{
    proxy::{codes, ProxyError},
    ratelimit::{MethodClass, RateLimitKey},
    runtime::ProxyRuntime,
    types::RpcResponse,
};
use serde_json::Value;
use std::sync::Arc;
use tower::limit::GlobalConcurrencyLimitLayer;

/// Shared handler state: the assembled runtime.
#[derive(Clone)]
pub struct AppState {
    runtime: Arc<ProxyRuntime>,
}

impl AppState {
    #[must_use]
    pub fn new(runtime: Arc<ProxyRuntime>) -> Self {
        Self { runtime }
    }
}

/// Builds the proxy application with body-size and concurrency limits from
/// config. Oversized bodies are rejected with 413 before the handler runs.
#[must_use]
pub fn build_app(runtime: Arc<ProxyRuntime>) -> Router {
    let max_body_size = runtime.config().server.max_body_size;
    let max_concurrent = runtime.config().server.max_concurrent_requests;

    Router::new()
        .route("/", post(handle_rpc))
        .route("/healthz", get(healthz))
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(GlobalConcurrencyLimitLayer::new(max_concurrent))
        .with_state(AppState::new(runtime))
}

async fn healthz() -> &'static str {
    "ok"
}

/// JSON-RPC over HTTP POST, single or batched.
async fn handle_rpc(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            return rpc_error(
                StatusCode::BAD_REQUEST,
                codes::PARSE_ERROR,
                format!("parse error: {e}"),
            );
        }
    };

    if let Err(denied) = check_rate_limit(&state, &headers, &payload) {
        return denied;
    }

    let domain = client_domain(&headers);
    tracing::debug!(domain = %domain, "handling rpc request");

    match state.runtime.orchestrator().handle(payload, &domain).await {
        Ok(Some(response)) => match serde_json::to_vec(&response) {
            Ok(body) => {
                (StatusCode::OK, [(header::CONTENT_TYPE, "application/json")], body)
                    .into_response()
            }
            Err(e) => {
                tracing::error!(error = %e, "response serialization failed");
                rpc_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    codes::UPSTREAM_ERROR,
                    "internal error".to_string(),
                )
            }
        },
        // A batch consisting entirely of notifications: nothing is owed.
        Ok(None) => StatusCode::OK.into_response(),
        Err(e) => {
            let status = match e {
                ProxyError::Parse(_) => StatusCode::BAD_REQUEST,
                ProxyError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
                // Batch-level JSON-RPC failures keep HTTP 200 by convention.
                _ => StatusCode::OK,
            };
            rpc_error(status, e.code(), e.client_message())
        }
    }
}

/// Charges the batch against the client-facing limiter before any routing
/// work happens. Denial rejects the whole HTTP request with 429.
fn check_rate_limit(
    state: &AppState,
    headers: &HeaderMap,
    payload: &Value,
) -> Result<(), Response> {
    #[allow(clippy::cast_possible_truncation)]
    let n = match payload {
        Value::Array(entries) => entries.len().max(1).min(u32::MAX as usize) as u32,
        _ => 1,
    };
    let method = first_method(payload);
    let key_by = state.runtime.config().rate_limit.key_by.as_str();
    let key = RateLimitKey::new(rate_limit_subject(headers, key_by), MethodClass::of(method));

    if state.runtime.rate_limiter().check(&key, n).is_allowed() {
        Ok(())
    } else {
        tracing::debug!(subject = %key.subject, n, "rate limited");
        Err(rpc_error(
            StatusCode::TOO_MANY_REQUESTS,
            codes::RATE_LIMITED,
            "rate limited".to_string(),
        ))
    }
}

/// The method that classifies the request for rate limiting: the first one
/// present in the payload.
fn first_method(payload: &Value) -> &str {
    let entry = match payload {
        Value::Array(entries) => entries.first(),
        entry => Some(entry),
    };
    entry.and_then(|entry| entry.get("method")).and_then(Value::as_str).unwrap_or_default()
}

/// The routing domain: lowercased first value of `X-Forwarded-Host`, falling
/// back to `Host`, with any port stripped.
fn client_domain(headers: &HeaderMap) -> String {
    let raw = headers
        .get("x-forwarded-host")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .or_else(|| headers.get(header::HOST).and_then(|value| value.to_str().ok()))
        .unwrap_or_default();
    normalize_host(raw)
}

fn normalize_host(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_port = if let Some(rest) = trimmed.strip_prefix('[') {
        rest.split(']').next().unwrap_or(rest)
    } else {
        trimmed.split(':').next().unwrap_or(trimmed)
    };
    without_port.to_ascii_lowercase()
}

/// The subject half of the rate-limit key. Behind a load balancer the remote
/// IP comes from `X-Forwarded-For` (first value) or `X-Real-Ip`; with
/// `key_by = "authorization"` the `Authorization` header value is the subject
/// instead.
fn rate_limit_subject(headers: &HeaderMap, key_by: &str) -> String {
    if key_by == "authorization" {
        return headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("anonymous")
            .to_string();
    }

    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .or_else(|| headers.get("x-real-ip").and_then(|value| value.to_str().ok()))
        .unwrap_or("anonymous")
        .to_string()
}

fn rpc_error(status: StatusCode, code: i32, message: String) -> Response {
    let body = RpcResponse::error_null_id(code, message);
    let bytes = serde_json::to_vec(&body).unwrap_or_default();
    (status, [(header::CONTENT_TYPE, "application/json")], bytes).into_response()
}
