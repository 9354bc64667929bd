//! A single upstream backend: dispatch, local limits, health bookkeeping.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Instant,
};

use parking_lot::Mutex;
use serde_json::Value;

use crate::{
    backend::{
        errors::BackendError,
        state::{BackendStats, HealthState, MethodCounters},
    },
    config::BackendConfig,
    types::{RpcRequest, RpcResponse},
};

/// One upstream RPC endpoint.
///
/// Owns its connection configuration and a small mutable record (health
/// state, latency window, token bucket, per-method counters) behind a
/// per-backend mutex. The HTTP client is shared across backends; per-backend
/// headers are applied at dispatch time.
pub struct Backend {
    config: BackendConfig,
    http: reqwest::Client,
    stats: Mutex<BackendStats>,
    in_flight: Arc<AtomicUsize>,
}

/// Decrements the in-flight gauge when a dispatch completes or is cancelled.
struct InFlightGuard {
    gauge: Arc<AtomicUsize>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.gauge.fetch_sub(1, Ordering::Relaxed);
    }
}

impl Backend {
    #[must_use]
    pub fn new(config: BackendConfig, http: reqwest::Client) -> Self {
        let stats = BackendStats::new(
            config.max_rps,
            config.failure_threshold,
            config.degraded_latency_ms,
            config.ban_duration(),
        );
        Self { config, http, stats: Mutex::new(stats), in_flight: Arc::new(AtomicUsize::new(0)) }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    #[must_use]
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Current health state (optimistic snapshot).
    #[must_use]
    pub fn state(&self) -> HealthState {
        self.stats.lock().state()
    }

    /// Whether this backend may receive dispatch traffic right now.
    #[must_use]
    pub fn is_selectable(&self) -> bool {
        self.state().is_selectable()
    }

    /// Number of dispatches currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Per-method counters snapshot, if the method has been seen.
    #[must_use]
    pub fn method_counters(&self, method: &str) -> Option<MethodCounters> {
        self.stats.lock().method_counters(method)
    }

    /// Dispatches a coalesced chunk of sub-requests to this backend.
    ///
    /// A one-element chunk is sent as a single JSON object and must come back
    /// as one; larger chunks are sent as a JSON array and must come back as an
    /// array with every request id accounted for. The returned vector is
    /// aligned with `batch` order regardless of the order the upstream chose.
    ///
    /// # Errors
    ///
    /// - [`BackendError::RateLimitedLocal`] if the token bucket lacks
    ///   `batch.len()` tokens or the in-flight limit is reached; no network
    ///   traffic happens and no failure is tallied.
    /// - [`BackendError::Unreachable`] / [`BackendError::Timeout`] /
    ///   [`BackendError::HttpStatus`] for transport failures.
    /// - [`BackendError::Malformed`] when the body is not JSON or its shape
    ///   does not mirror the request.
    pub async fn dispatch(&self, batch: &[RpcRequest]) -> Result<Vec<RpcResponse>, BackendError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        #[allow(clippy::cast_possible_truncation)]
        let tokens_needed = batch.len().min(u32::MAX as usize) as u32;
        if !self.stats.lock().try_take_tokens(tokens_needed) {
            tracing::debug!(backend = %self.config.name, n = batch.len(), "token bucket empty");
            return Err(BackendError::RateLimitedLocal);
        }
        let _guard = self.begin_dispatch()?;

        let body = if batch.len() == 1 {
            serde_json::to_vec(&batch[0])
        } else {
            serde_json::to_vec(batch)
        }
        .map_err(|e| BackendError::Malformed(format!("request serialization failed: {e}")))?;

        let methods: Vec<&str> = batch.iter().map(|r| r.method.as_str()).collect();
        let started = Instant::now();

        let outcome = self.round_trip(body, batch).await;

        #[allow(clippy::cast_possible_truncation)]
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            Ok(_) => {
                self.stats.lock().record_success(&methods, elapsed_ms);
                tracing::debug!(
                    backend = %self.config.name,
                    n = batch.len(),
                    elapsed_ms,
                    "dispatch ok"
                );
            }
            Err(e) if e.penalizes_backend() => {
                let mut stats = self.stats.lock();
                stats.record_failure(&methods);
                tracing::warn!(
                    backend = %self.config.name,
                    error = %e,
                    consecutive_failures = stats.consecutive_failures(),
                    state = stats.state().as_str(),
                    "dispatch failed"
                );
            }
            Err(_) => {}
        }

        outcome
    }

    async fn round_trip(
        &self,
        body: Vec<u8>,
        batch: &[RpcRequest],
    ) -> Result<Vec<RpcResponse>, BackendError> {
        let bytes = self.post_raw(body).await?;

        if batch.len() == 1 {
            let response: RpcResponse = serde_json::from_slice(&bytes).map_err(|e| {
                BackendError::Malformed(format!("expected a single response object: {e}"))
            })?;
            if let Some(id) = batch[0].id.as_deref() {
                if *response.id != *id {
                    return Err(BackendError::Malformed("response id mismatch".to_string()));
                }
            }
            return Ok(vec![response]);
        }

        let responses: Vec<RpcResponse> = serde_json::from_slice(&bytes).map_err(|e| {
            BackendError::Malformed(format!("expected a response array: {e}"))
        })?;
        if responses.len() != batch.len() {
            return Err(BackendError::Malformed(format!(
                "expected {} responses, got {}",
                batch.len(),
                responses.len()
            )));
        }
        reorder_by_id(batch, responses)
    }

    /// Issues a liveness probe of the configured probe method.
    ///
    /// Probes bypass the token bucket and the in-flight limit so a saturated
    /// backend can still be observed. Returns whether the probe succeeded and,
    /// when the probe method reports one, the backend's chain tip height.
    pub async fn probe(&self) -> (bool, Option<u64>) {
        let request = RpcRequest::new(self.config.probe_method.clone(), None, Value::from(1));
        let body = match serde_json::to_vec(&request) {
            Ok(body) => body,
            Err(_) => return (false, None),
        };

        let outcome = self.post_raw(body).await.and_then(|bytes| {
            serde_json::from_slice::<RpcResponse>(&bytes)
                .map_err(|e| BackendError::Malformed(format!("probe response: {e}")))
        });

        match outcome {
            Ok(response) if response.error.is_none() => {
                let height = response
                    .result
                    .as_ref()
                    .and_then(Value::as_str)
                    .and_then(|hex| u64::from_str_radix(hex.trim_start_matches("0x"), 16).ok());
                self.stats.lock().record_probe(true);
                (true, height)
            }
            Ok(_) | Err(_) => {
                self.stats.lock().record_probe(false);
                (false, None)
            }
        }
    }

    async fn post_raw(&self, body: Vec<u8>) -> Result<bytes::Bytes, BackendError> {
        let mut request = self
            .http
            .post(&self.config.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        for (name, value) in &self.config.headers {
            request = request.header(name, value);
        }

        let response = request
            .body(body)
            .timeout(self.config.timeout())
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::HttpStatus(status.as_u16()));
        }

        response.bytes().await.map_err(classify_transport_error)
    }

    fn begin_dispatch(&self) -> Result<InFlightGuard, BackendError> {
        let mut current = self.in_flight.load(Ordering::Relaxed);
        loop {
            if current >= self.config.max_concurrent {
                tracing::debug!(
                    backend = %self.config.name,
                    in_flight = current,
                    "in-flight limit reached"
                );
                return Err(BackendError::RateLimitedLocal);
            }
            match self.in_flight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(InFlightGuard { gauge: Arc::clone(&self.in_flight) }),
                Err(observed) => current = observed,
            }
        }
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("name", &self.config.name)
            .field("url", &self.config.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Maps reqwest failures into the backend error taxonomy without leaking
/// connection details into client-visible messages.
fn classify_transport_error(error: reqwest::Error) -> BackendError {
    if error.is_timeout() {
        BackendError::Timeout
    } else if error.is_connect() {
        BackendError::Unreachable("connection refused or unreachable".to_string())
    } else if error.is_body() || error.is_decode() {
        BackendError::Malformed("response body error".to_string())
    } else {
        BackendError::Unreachable("network error".to_string())
    }
}

/// Re-associates upstream batch responses with their requests by id.
///
/// JSON-RPC allows a server to answer a batch in any order; the proxy
/// restores request order here so the orchestrator can index responses by
/// position.
fn reorder_by_id(
    batch: &[RpcRequest],
    responses: Vec<RpcResponse>,
) -> Result<Vec<RpcResponse>, BackendError> {
    let mut pool: Vec<Option<RpcResponse>> = responses.into_iter().map(Some).collect();
    let mut ordered = Vec::with_capacity(batch.len());

    for request in batch {
        let Some(id) = request.id.as_deref() else {
            return Err(BackendError::Malformed("batched request without id".to_string()));
        };
        let found = pool
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|r| *r.id == *id))
            .and_then(Option::take);
        match found {
            Some(response) => ordered.push(response),
            None => {
                return Err(BackendError::Malformed(format!(
                    "missing response for id {id}"
                )));
            }
        }
    }

    Ok(ordered)
}
