//! Periodic liveness probing of backends.

use std::sync::Arc;

use tokio::{sync::broadcast, time::interval};

use crate::backend::{endpoint::Backend, tip::TipTracker};

/// Drives each backend's liveness probe on its own timer task.
///
/// Probe outcomes feed the backend's health machine (`F` consecutive probe
/// failures mark it Unhealthy, any success while Unhealthy recovers it, and a
/// lapsed ban needs one successful probe to lift). When a probe reports a
/// chain tip height — `probe_method = "eth_blockNumber"` — the height is
/// recorded into the tip tracker that consensus-aware groups select from.
pub struct HealthMonitor {
    backends: Vec<Arc<Backend>>,
    tips: Arc<TipTracker>,
}

impl HealthMonitor {
    #[must_use]
    pub fn new(backends: Vec<Arc<Backend>>, tips: Arc<TipTracker>) -> Self {
        Self { backends, tips }
    }

    /// Spawns one probe task per backend, each honoring that backend's
    /// configured interval. Tasks exit when the shutdown channel fires.
    #[must_use]
    pub fn start(
        &self,
        shutdown: &broadcast::Sender<()>,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        self.backends
            .iter()
            .map(|backend| {
                let backend = Arc::clone(backend);
                let tips = Arc::clone(&self.tips);
                let mut shutdown_rx = shutdown.subscribe();

                tokio::spawn(async move {
                    let mut ticker = interval(backend.config().probe_interval());
                    // The first tick fires immediately so a freshly started
                    // proxy learns backend health before taking traffic.
                    loop {
                        tokio::select! {
                            _ = ticker.tick() => {
                                Self::probe_one(&backend, &tips).await;
                            }
                            _ = shutdown_rx.recv() => {
                                tracing::debug!(backend = %backend.name(), "probe task shutting down");
                                break;
                            }
                        }
                    }
                })
            })
            .collect()
    }

    async fn probe_one(backend: &Backend, tips: &TipTracker) {
        let (healthy, height) = backend.probe().await;
        if let Some(height) = height {
            tips.record(backend.name(), height);
        }
        tracing::trace!(
            backend = %backend.name(),
            healthy,
            state = backend.state().as_str(),
            height,
            "probe complete"
        );
    }

    /// Runs a single probe round across all backends, awaiting completion.
    /// Used at startup and by tests; the spawned tasks handle steady state.
    pub async fn probe_all(&self) {
        for backend in &self.backends {
            Self::probe_one(backend, &self.tips).await;
        }
    }
}
