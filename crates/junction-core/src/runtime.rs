//! Wires configuration into running components.
//!
//! The runtime owns the long-lived pieces — backends, groups, router,
//! override engine, rate limiter, health monitor — and hands the frontend an
//! [`Orchestrator`] plus the limiter handle. Background probe tasks are
//! started explicitly so tests can run a runtime without timers.

use std::{collections::HashMap, sync::Arc};

use thiserror::Error;
use tokio::sync::broadcast;

use crate::{
    backend::{build_http_client, Backend, BackendGroup, HealthMonitor, TipTracker},
    config::{AppConfig, ConfigError},
    overrides::OverrideEngine,
    proxy::Orchestrator,
    ratelimit::{AllowAll, RateLimit, TokenBucketLimiter},
    routing::{Router, RoutingTable},
};

/// Failures while assembling the runtime from validated config.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("runtime initialization failed: {0}")]
    Init(String),
}

/// All long-lived proxy components, assembled from one [`AppConfig`].
pub struct ProxyRuntime {
    config: AppConfig,
    orchestrator: Arc<Orchestrator>,
    rate_limiter: Arc<dyn RateLimit>,
    monitor: HealthMonitor,
    router: Arc<Router>,
}

impl ProxyRuntime {
    /// Builds backends, groups, routing tables, the override engine, and the
    /// rate limiter from a validated config.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] if the HTTP client cannot be built or an
    /// override rule fails to compile.
    pub fn from_config(config: AppConfig) -> Result<Self, RuntimeError> {
        let http = build_http_client().map_err(|e| RuntimeError::Init(e.to_string()))?;
        let tips = Arc::new(TipTracker::new());

        let mut backends: HashMap<String, Arc<Backend>> = HashMap::new();
        for backend_config in &config.backends {
            let backend = Arc::new(Backend::new(backend_config.clone(), http.clone()));
            backends.insert(backend_config.name.clone(), backend);
        }

        let mut groups: HashMap<String, Arc<BackendGroup>> = HashMap::new();
        for group_config in &config.backend_groups {
            let members: Vec<Arc<Backend>> = group_config
                .backends
                .iter()
                .filter_map(|name| backends.get(name).cloned())
                .collect();
            // Validation guarantees every member name resolved.
            if members.len() != group_config.backends.len() {
                return Err(RuntimeError::Init(format!(
                    "group {} references unknown backends",
                    group_config.name
                )));
            }
            let max_lag = group_config.consensus.unwrap_or_default().max_lag;
            let group = Arc::new(BackendGroup::new(
                group_config.name.clone(),
                members,
                group_config.policy,
                group_config.max_retries,
                max_lag,
                Arc::clone(&tips),
            ));
            groups.insert(group_config.name.clone(), group);
        }

        let router = Arc::new(Router::new(RoutingTable::from_config(
            &config.default_rpc_method_mappings,
            &config.domain_rpc_method_mappings,
        )));

        let overrides = Arc::new(
            OverrideEngine::from_config(&config.method_overrides)
                .map_err(|e| RuntimeError::Init(format!("override rules: {e}")))?,
        );

        let rate_limiter: Arc<dyn RateLimit> = if config.rate_limit.enabled {
            Arc::new(TokenBucketLimiter::new(config.rate_limit.max_rps, config.rate_limit.burst))
        } else {
            Arc::new(AllowAll)
        };

        let monitor =
            HealthMonitor::new(backends.values().cloned().collect(), Arc::clone(&tips));

        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&router),
            overrides,
            groups,
            config.request_timeout(),
        ));

        tracing::info!(
            backends = config.backends.len(),
            groups = config.backend_groups.len(),
            overrides = config.method_overrides.len(),
            domains = config.domain_rpc_method_mappings.len(),
            "proxy runtime assembled"
        );

        Ok(Self { config, orchestrator, rate_limiter, monitor, router })
    }

    /// Loads, validates, and assembles in one step.
    ///
    /// # Errors
    ///
    /// Propagates config-load and assembly failures.
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, RuntimeError> {
        Self::from_config(AppConfig::from_file(path)?)
    }

    /// Spawns the health-monitor probe tasks. Returns their join handles;
    /// they exit when the shutdown channel fires.
    #[must_use]
    pub fn start_background_tasks(
        &self,
        shutdown: &broadcast::Sender<()>,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        self.monitor.start(shutdown)
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    #[must_use]
    pub fn orchestrator(&self) -> Arc<Orchestrator> {
        Arc::clone(&self.orchestrator)
    }

    #[must_use]
    pub fn rate_limiter(&self) -> Arc<dyn RateLimit> {
        Arc::clone(&self.rate_limiter)
    }

    #[must_use]
    pub fn router(&self) -> Arc<Router> {
        Arc::clone(&self.router)
    }
}

impl std::fmt::Debug for ProxyRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyRuntime")
            .field("backends", &self.config.backends.len())
            .field("groups", &self.config.backend_groups.len())
            .finish_non_exhaustive()
    }
}
