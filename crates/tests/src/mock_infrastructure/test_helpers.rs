//! Construction helpers shared across test modules.

use junction_core::{config::AppConfig, runtime::ProxyRuntime};
use std::sync::Arc;

/// Builds a runtime from inline TOML. Panics on invalid config — tests own
/// their config strings.
#[must_use]
pub fn runtime_from_toml(raw: &str) -> Arc<ProxyRuntime> {
    let config = AppConfig::from_toml(raw).expect("test config must validate");
    Arc::new(ProxyRuntime::from_config(config).expect("test runtime must assemble"))
}

/// Builds the axum application from inline TOML.
#[must_use]
pub fn app_from_toml(raw: &str) -> axum::Router {
    server::build_app(runtime_from_toml(raw))
}
