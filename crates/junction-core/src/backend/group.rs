//! Backend groups: ordered pools with a selection policy and failover.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use serde::{Deserialize, Serialize};

use crate::{
    backend::{endpoint::Backend, errors::BackendError, state::HealthState, tip::TipTracker},
    types::{RpcRequest, RpcResponse},
};

/// How a group picks a backend for each dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Rotate through selectable backends with an atomic cursor.
    #[default]
    RoundRobin,
    /// First Healthy backend in config order; if none, the least-loaded
    /// Degraded one.
    FirstAvailable,
    /// Round-robin among backends at the chain tip (within `max_lag`).
    ConsensusAware,
}

/// An ordered set of backends plus the selection policy.
///
/// Membership is immutable after startup; the group owns the rotation cursor.
/// Two concurrent selections observe distinct cursor values, so round-robin
/// rotation holds under concurrency.
pub struct BackendGroup {
    name: String,
    backends: Vec<Arc<Backend>>,
    policy: SelectionPolicy,
    max_retries: u32,
    max_lag: u64,
    tips: Arc<TipTracker>,
    cursor: AtomicUsize,
}

impl BackendGroup {
    /// Creates a group. `backends` must be non-empty — config validation
    /// rejects empty groups before this is reached.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        backends: Vec<Arc<Backend>>,
        policy: SelectionPolicy,
        max_retries: u32,
        max_lag: u64,
        tips: Arc<TipTracker>,
    ) -> Self {
        debug_assert!(!backends.is_empty(), "groups must have at least one backend");
        Self {
            name: name.into(),
            backends,
            policy,
            max_retries,
            max_lag,
            tips,
            cursor: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    /// Selects a backend per the group policy, or `None` when nothing is
    /// selectable.
    #[must_use]
    pub fn select(&self) -> Option<Arc<Backend>> {
        self.select_excluding(&[]).map(|(_, backend)| backend)
    }

    /// Dispatches a coalesced chunk, failing over on idempotent errors.
    ///
    /// Retries go to the next selectable backend (preferring ones not yet
    /// tried) up to `max_retries` times. JSON-RPC error bodies are definitive
    /// upstream answers and come back as `Ok`; only transport-level
    /// retriable failures trigger failover.
    ///
    /// # Errors
    ///
    /// [`BackendError::NoBackendsAvailable`] when no backend is selectable,
    /// otherwise the last dispatch error once retries are exhausted.
    pub async fn dispatch(&self, batch: &[RpcRequest]) -> Result<Vec<RpcResponse>, BackendError> {
        let attempts = self.max_retries.saturating_add(1);
        let mut tried: Vec<usize> = Vec::new();
        let mut last_error: Option<BackendError> = None;

        for attempt in 0..attempts {
            let Some((index, backend)) = self.select_excluding(&tried) else {
                break;
            };
            tried.push(index);

            match backend.dispatch(batch).await {
                Ok(responses) => return Ok(responses),
                Err(e) if e.is_retriable() && attempt + 1 < attempts => {
                    tracing::warn!(
                        group = %self.name,
                        backend = %backend.name(),
                        attempt,
                        error = %e,
                        "dispatch failed, trying next backend"
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(BackendError::NoBackendsAvailable))
    }

    /// Policy-driven selection, skipping `exclude`d indices when an
    /// alternative exists. Falls back to already-tried backends rather than
    /// giving up while something selectable remains.
    fn select_excluding(&self, exclude: &[usize]) -> Option<(usize, Arc<Backend>)> {
        self.pick(exclude).or_else(|| {
            if exclude.is_empty() {
                None
            } else {
                self.pick(&[])
            }
        })
    }

    fn pick(&self, exclude: &[usize]) -> Option<(usize, Arc<Backend>)> {
        match self.policy {
            SelectionPolicy::RoundRobin => self.pick_round_robin(exclude, |_| true),
            SelectionPolicy::FirstAvailable => self.pick_first_available(exclude),
            SelectionPolicy::ConsensusAware => {
                let names: Vec<&str> = self.backends.iter().map(|b| b.name()).collect();
                self.pick_round_robin(exclude, |backend| {
                    self.tips.is_at_tip(backend.name(), names.iter().copied(), self.max_lag)
                })
            }
        }
    }

    fn pick_round_robin(
        &self,
        exclude: &[usize],
        eligible: impl Fn(&Backend) -> bool,
    ) -> Option<(usize, Arc<Backend>)> {
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        let count = self.backends.len();
        for offset in 0..count {
            let index = (start + offset) % count;
            let backend = &self.backends[index];
            if !exclude.contains(&index) && backend.is_selectable() && eligible(backend) {
                return Some((index, Arc::clone(backend)));
            }
        }
        None
    }

    fn pick_first_available(&self, exclude: &[usize]) -> Option<(usize, Arc<Backend>)> {
        for (index, backend) in self.backends.iter().enumerate() {
            if !exclude.contains(&index) && backend.state() == HealthState::Healthy {
                return Some((index, Arc::clone(backend)));
            }
        }

        // All Healthy are excluded or absent: least-loaded Degraded.
        self.backends
            .iter()
            .enumerate()
            .filter(|(index, backend)| {
                !exclude.contains(index) && backend.state() == HealthState::Degraded
            })
            .min_by_key(|(_, backend)| backend.in_flight())
            .map(|(index, backend)| (index, Arc::clone(backend)))
    }
}

impl std::fmt::Debug for BackendGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendGroup")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("backends", &self.backends.len())
            .finish_non_exhaustive()
    }
}
