//! Upstream backend management.
//!
//! A [`Backend`] is one upstream RPC endpoint with its own health machine,
//! token bucket, and counters. A [`BackendGroup`] is an ordered pool of
//! backends with a [`SelectionPolicy`] and failover retries. The
//! [`HealthMonitor`] probes each backend on a timer, and the [`TipTracker`]
//! feeds consensus-aware selection.

pub mod endpoint;
pub mod errors;
pub mod group;
pub mod monitor;
pub mod state;
pub mod tip;

pub use endpoint::Backend;
pub use errors::BackendError;
pub use group::{BackendGroup, SelectionPolicy};
pub use monitor::HealthMonitor;
pub use state::{HealthState, LatencyWindow, MethodCounters};
pub use tip::TipTracker;

use std::time::Duration;

/// Builds the shared upstream HTTP client.
///
/// One pooled client serves every backend; per-backend headers are applied
/// per request. Per-dispatch deadlines come from backend config, so no
/// overall client timeout is set here.
///
/// # Errors
///
/// Returns [`BackendError::Unreachable`] if the TLS backend fails to
/// initialize.
pub fn build_http_client() -> Result<reqwest::Client, BackendError> {
    reqwest::Client::builder()
        .pool_idle_timeout(Duration::from_secs(30))
        .pool_max_idle_per_host(32)
        .connect_timeout(Duration::from_secs(5))
        .use_rustls_tls()
        .redirect(reqwest::redirect::Policy::none())
        .user_agent(concat!("junction/", env!("CARGO_PKG_VERSION")))
        .tcp_keepalive(Duration::from_secs(30))
        .tcp_nodelay(true)
        .build()
        .map_err(|e| {
            tracing::error!(error = %e, "failed to build upstream http client");
            BackendError::Unreachable(format!("http client build failed: {e}"))
        })
}
