//! Batch orchestration: override → route → coalesce → fan out → reassemble.

use std::{collections::HashMap, sync::Arc, time::Duration};

use futures::future::join_all;
use serde_json::Value;

use crate::{
    backend::BackendGroup,
    overrides::OverrideEngine,
    proxy::errors::ProxyError,
    routing::Router,
    types::{RpcRequest, RpcResponse},
};

/// The aggregated reply for one HTTP request.
///
/// A single-object request yields a single object, a batch yields an array —
/// the shape is decided by the input, not by how many responses survived
/// notification dropping.
#[derive(Debug, serde::Serialize)]
#[serde(untagged)]
pub enum ResponsePayload {
    Single(RpcResponse),
    Batch(Vec<RpcResponse>),
}

/// Drives sub-requests through override → router → group → backend.
///
/// Borrows the router and override engine; owns nothing across requests.
/// Sub-requests routed to the same group coalesce into one nested upstream
/// batch; distinct groups dispatch concurrently. Response order always
/// matches input order, restored by slot index after the fan-out.
pub struct Orchestrator {
    router: Arc<Router>,
    overrides: Arc<OverrideEngine>,
    groups: HashMap<String, Arc<BackendGroup>>,
    request_timeout: Duration,
}

enum Slot {
    /// Answered inline: override hit, framing error, or routing error.
    Done(RpcResponse),
    /// Notification — consumed, never answered, never forwarded.
    Skip,
    /// Waiting on an upstream dispatch.
    Pending,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        router: Arc<Router>,
        overrides: Arc<OverrideEngine>,
        groups: HashMap<String, Arc<BackendGroup>>,
        request_timeout: Duration,
    ) -> Self {
        Self { router, overrides, groups, request_timeout }
    }

    #[must_use]
    pub fn groups(&self) -> &HashMap<String, Arc<BackendGroup>> {
        &self.groups
    }

    /// Processes a parsed JSON-RPC payload for the given (lowercased) domain.
    ///
    /// Returns `Ok(None)` when no response body is owed — a batch consisting
    /// entirely of notifications.
    ///
    /// # Errors
    ///
    /// Whole-request failures only: an empty batch or duplicate ids. Per
    /// sub-request failures are folded into their slots as JSON-RPC error
    /// objects while sibling sub-requests proceed unaffected.
    pub async fn handle(
        &self,
        payload: Value,
        domain: &str,
    ) -> Result<Option<ResponsePayload>, ProxyError> {
        match payload {
            Value::Array(entries) => {
                if entries.is_empty() {
                    return Err(ProxyError::InvalidRequest("empty batch".to_string()));
                }
                let responses = self.handle_entries(entries, domain).await?;
                if responses.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(ResponsePayload::Batch(responses)))
                }
            }
            entry => {
                let responses = self.handle_entries(vec![entry], domain).await?;
                Ok(responses.into_iter().next().map(ResponsePayload::Single))
            }
        }
    }

    async fn handle_entries(
        &self,
        entries: Vec<Value>,
        domain: &str,
    ) -> Result<Vec<RpcResponse>, ProxyError> {
        let parsed: Vec<Result<RpcRequest, Value>> = entries
            .into_iter()
            .map(|entry| {
                let salvaged_id = entry.get("id").cloned().unwrap_or(Value::Null);
                serde_json::from_value::<RpcRequest>(entry).map_err(|_| salvaged_id)
            })
            .collect();

        check_duplicate_ids(&parsed)?;

        let mut slots: Vec<Slot> = Vec::with_capacity(parsed.len());
        let mut pending: Vec<(usize, RpcRequest, Arc<BackendGroup>)> = Vec::new();

        for (index, entry) in parsed.into_iter().enumerate() {
            slots.push(self.classify(entry, domain, index, &mut pending));
        }

        if !pending.is_empty() {
            self.fan_out(pending, &mut slots).await;
        }

        Ok(slots
            .into_iter()
            .filter_map(|slot| match slot {
                Slot::Done(response) => Some(response),
                Slot::Skip => None,
                // Every Pending slot is filled by fan_out before this point.
                Slot::Pending => None,
            })
            .collect())
    }

    fn classify(
        &self,
        entry: Result<RpcRequest, Value>,
        domain: &str,
        index: usize,
        pending: &mut Vec<(usize, RpcRequest, Arc<BackendGroup>)>,
    ) -> Slot {
        let request = match entry {
            Err(salvaged_id) => {
                return Slot::Done(
                    ProxyError::InvalidRequest("malformed request object".to_string())
                        .to_response(Arc::new(salvaged_id)),
                );
            }
            Ok(request) => request,
        };

        if request.is_notification() {
            return Slot::Skip;
        }
        // Non-notification ids are present and non-null by construction.
        let Some(id) = request.response_id() else {
            return Slot::Skip;
        };

        if !request.is_well_formed() {
            return Slot::Done(
                ProxyError::InvalidRequest("unsupported jsonrpc version or empty method".to_string())
                    .to_response(id),
            );
        }

        if let Some(template) = self.overrides.match_request(&request) {
            tracing::debug!(method = %request.method, "override hit");
            return Slot::Done(RpcResponse::success(template.clone(), id));
        }

        let Some(group_name) = self.router.resolve(domain, &request.method) else {
            tracing::debug!(domain, method = %request.method, "no route for method");
            return Slot::Done(ProxyError::MethodNotFound(request.method.clone()).to_response(id));
        };
        let Some(group) = self.groups.get(&group_name) else {
            return Slot::Done(ProxyError::MethodNotFound(request.method.clone()).to_response(id));
        };

        pending.push((index, request, Arc::clone(group)));
        Slot::Pending
    }

    /// Coalesces pending sub-requests per group and dispatches all groups
    /// concurrently, each under the overall request deadline. A failed or
    /// timed-out chunk fills its slots with error objects; completed chunks
    /// are unaffected.
    async fn fan_out(
        &self,
        pending: Vec<(usize, RpcRequest, Arc<BackendGroup>)>,
        slots: &mut [Slot],
    ) {
        let mut chunk_order: Vec<String> = Vec::new();
        let mut chunks: HashMap<String, (Arc<BackendGroup>, Vec<(usize, RpcRequest)>)> =
            HashMap::new();

        for (index, request, group) in pending {
            let entry = chunks.entry(group.name().to_string()).or_insert_with(|| {
                chunk_order.push(group.name().to_string());
                (group, Vec::new())
            });
            entry.1.push((index, request));
        }

        let timeout = self.request_timeout;
        let dispatches = chunk_order.into_iter().filter_map(|name| chunks.remove(&name)).map(
            |(group, chunk)| async move {
                let requests: Vec<RpcRequest> =
                    chunk.iter().map(|(_, request)| request.clone()).collect();
                let result = match tokio::time::timeout(timeout, group.dispatch(&requests)).await {
                    Ok(Ok(responses)) => Ok(responses),
                    Ok(Err(e)) => Err(ProxyError::from(e)),
                    Err(_) => {
                        tracing::warn!(group = %group.name(), "request deadline elapsed in flight");
                        Err(ProxyError::Timeout)
                    }
                };
                (chunk, result)
            },
        );

        for (chunk, result) in join_all(dispatches).await {
            match result {
                Ok(responses) => {
                    for ((index, _), response) in chunk.into_iter().zip(responses) {
                        slots[index] = Slot::Done(response);
                    }
                }
                Err(error) => {
                    for (index, request) in chunk {
                        // Non-notifications always carry an id here.
                        let Some(id) = request.response_id() else { continue };
                        slots[index] = Slot::Done(error.to_response(id));
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("groups", &self.groups.len())
            .field("overrides", &self.overrides.len())
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

/// Rejects batches where two non-notification sub-requests share an id,
/// under JSON-value equality (`"1"` and `1` are distinct). Notifications are
/// exempt.
fn check_duplicate_ids(parsed: &[Result<RpcRequest, Value>]) -> Result<(), ProxyError> {
    let mut seen: Vec<&Value> = Vec::new();
    for request in parsed.iter().flatten() {
        if let Some(id) = request.id.as_deref() {
            if id.is_null() {
                continue;
            }
            if seen.contains(&id) {
                return Err(ProxyError::InvalidRequest("duplicate id".to_string()));
            }
            seen.push(id);
        }
    }
    Ok(())
}
