use crate::{backend::BackendError, types::RpcResponse};
use std::sync::Arc;
use thiserror::Error;

/// JSON-RPC error codes emitted by the proxy.
pub mod codes {
    /// Body was not valid JSON.
    pub const PARSE_ERROR: i32 = -32700;
    /// Malformed JSON-RPC framing, duplicate ids.
    pub const INVALID_REQUEST: i32 = -32600;
    /// No route for the method.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Dispatch failed after retries; the message abstracts the cause.
    pub const UPSTREAM_ERROR: i32 = -32010;
    /// The routed group had no selectable backend.
    pub const NO_BACKENDS: i32 = -32011;
    /// Per-method rate limit denial.
    pub const RATE_LIMITED: i32 = -32017;
}

/// Request-processing failures.
///
/// Whole-request failures (parse, oversized payload, duplicate ids, rate
/// limiting) short-circuit the batch; everything else stays local to its
/// sub-request slot as a JSON-RPC error object while siblings proceed.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Body was not valid JSON. The only error that changes the HTTP status
    /// on an otherwise well-formed HTTP request (400).
    #[error("parse error: {0}")]
    Parse(String),

    /// Malformed JSON-RPC framing or duplicate ids within a batch.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The router resolved no group for `(domain, method)`.
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// The routed group had no selectable backend.
    #[error("no backends available")]
    NoBackendsAvailable,

    /// Upstream dispatch failed after retries. Client-visible messages
    /// abstract the transport-level cause.
    #[error("upstream error")]
    Upstream(#[source] BackendError),

    /// The overall request deadline elapsed while dispatches were in flight.
    #[error("upstream request timed out")]
    Timeout,

    /// The client-facing rate limiter denied the request.
    #[error("rate limited")]
    RateLimited,
}

impl ProxyError {
    /// The JSON-RPC error code for this failure.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::Parse(_) => codes::PARSE_ERROR,
            Self::InvalidRequest(_) => codes::INVALID_REQUEST,
            Self::MethodNotFound(_) => codes::METHOD_NOT_FOUND,
            Self::NoBackendsAvailable => codes::NO_BACKENDS,
            Self::Upstream(_) | Self::Timeout => codes::UPSTREAM_ERROR,
            Self::RateLimited => codes::RATE_LIMITED,
        }
    }

    /// The client-visible error message. Deliberately coarser than
    /// [`std::fmt::Display`]: upstream transport detail stays in the logs.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            Self::Parse(detail) => format!("parse error: {detail}"),
            Self::InvalidRequest(detail) => format!("invalid request: {detail}"),
            Self::MethodNotFound(method) => format!("method not found: {method}"),
            Self::NoBackendsAvailable => "no backends available".to_string(),
            Self::Upstream(_) => "upstream error".to_string(),
            Self::Timeout => "upstream request timed out".to_string(),
            Self::RateLimited => "rate limited".to_string(),
        }
    }

    /// Builds the per-slot JSON-RPC error object for this failure.
    #[must_use]
    pub fn to_response(&self, id: Arc<serde_json::Value>) -> RpcResponse {
        RpcResponse::error(self.code(), self.client_message(), id)
    }
}

impl From<BackendError> for ProxyError {
    fn from(error: BackendError) -> Self {
        match error {
            BackendError::NoBackendsAvailable => Self::NoBackendsAvailable,
            BackendError::Timeout => Self::Timeout,
            other => Self::Upstream(other),
        }
    }
}
