//! JSON-RPC 2.0 protocol types shared across the proxy.
//!
//! # Representation notes
//!
//! - `jsonrpc`: `Cow<'static, str>` so responses constructed by the proxy
//!   carry the static `"2.0"` without allocating.
//! - `id`: `Arc<serde_json::Value>` so a request id can be echoed into its
//!   response (and into error responses) with a reference-count bump instead
//!   of a deep clone. A request whose `id` is absent or JSON `null` is a
//!   notification and never produces a response object.

use serde::{Deserialize, Serialize};
use std::{borrow::Cow, sync::Arc};

/// JSON-RPC protocol version constant.
pub const JSONRPC_VERSION: &str = "2.0";

/// Pre-allocated `Cow` for the protocol version — zero allocation for static usage.
pub const JSONRPC_VERSION_COW: Cow<'static, str> = Cow::Borrowed(JSONRPC_VERSION);

/// A single JSON-RPC 2.0 request.
///
/// Immutable once parsed. `params` is carried as an opaque JSON value; only
/// the override engine inspects its structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: Cow<'static, str>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Arc<serde_json::Value>>,
}

impl RpcRequest {
    /// Creates a request with the given method, params, and id.
    #[must_use]
    pub fn new(
        method: impl Into<String>,
        params: Option<serde_json::Value>,
        id: serde_json::Value,
    ) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION_COW,
            method: method.into(),
            params,
            id: Some(Arc::new(id)),
        }
    }

    /// Creates a notification (no id, no response expected).
    #[must_use]
    pub fn notification(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self { jsonrpc: JSONRPC_VERSION_COW, method: method.into(), params, id: None }
    }

    /// Returns `true` if this request is a notification.
    ///
    /// Both an absent `id` and an explicit JSON `null` id count; neither may
    /// produce a response entry.
    #[must_use]
    pub fn is_notification(&self) -> bool {
        match &self.id {
            None => true,
            Some(id) => id.is_null(),
        }
    }

    /// Returns the id to echo into a response, or `None` for notifications.
    #[must_use]
    pub fn response_id(&self) -> Option<Arc<serde_json::Value>> {
        self.id.as_ref().filter(|id| !id.is_null()).map(Arc::clone)
    }

    /// Validates the JSON-RPC framing of this request.
    ///
    /// The version must be exactly `"2.0"` and the method non-empty. Parameter
    /// shapes are the business of the upstream, not the proxy.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.jsonrpc == JSONRPC_VERSION && !self.method.is_empty()
    }
}

/// A single JSON-RPC 2.0 response.
///
/// Carries either `result` or `error`, never both; the absent side is omitted
/// from serialization entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: Cow<'static, str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Arc<serde_json::Value>,
}

impl RpcResponse {
    /// Creates a successful response echoing the given id.
    #[must_use]
    pub fn success(result: serde_json::Value, id: Arc<serde_json::Value>) -> Self {
        Self { jsonrpc: JSONRPC_VERSION_COW, result: Some(result), error: None, id }
    }

    /// Creates an error response echoing the given id.
    #[must_use]
    pub fn error(code: i32, message: impl Into<String>, id: Arc<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION_COW,
            result: None,
            error: Some(RpcError { code, message: message.into(), data: None }),
            id,
        }
    }

    /// Creates an error response with a null id, for failures that predate
    /// id extraction (parse errors, malformed entries).
    #[must_use]
    pub fn error_null_id(code: i32, message: impl Into<String>) -> Self {
        Self::error(code, message, Arc::new(serde_json::Value::Null))
    }
}

/// JSON-RPC 2.0 error object.
///
/// Standard codes: `-32700` parse error, `-32600` invalid request, `-32601`
/// method not found, `-32602` invalid params, `-32603` internal error.
/// Proxy-defined codes live in [`crate::proxy::errors`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}
