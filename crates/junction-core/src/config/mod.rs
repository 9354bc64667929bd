//! Proxy configuration: TOML document, `${VAR}` expansion, load-time validation.
//!
//! # Loading
//!
//! 1. The raw file text is read and every `${VAR}` occurrence is expanded from
//!    the process environment. Referencing an undefined variable is a load
//!    error, not a silent empty string.
//! 2. The expanded text is deserialized with serde. Method-mapping keys are
//!    case-sensitive (`eth_blockNumber` ≠ `eth_blocknumber`), which is why the
//!    document goes through `toml` directly rather than a layered loader that
//!    folds key case.
//! 3. [`AppConfig::validate`] cross-checks references: group members must name
//!    configured backends, method mappings must name configured groups, and
//!    every override matcher path must parse.
//!
//! # Example
//!
//! ```toml
//! [server]
//! listen_addr = "127.0.0.1:8545"
//!
//! [[backends]]
//! name = "main"
//! url = "${MAIN_BACKEND_RPC_URL}"
//!
//! [[backend_groups]]
//! name = "main"
//! backends = ["main"]
//! policy = "round_robin"
//!
//! [default_rpc_method_mappings]
//! default_group = "main"
//! ```

use crate::{backend::group::SelectionPolicy, overrides::MatcherPath};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, net::SocketAddr, path::Path, time::Duration};
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("undefined environment variable referenced in config: {0}")]
    UndefinedEnvVar(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// HTTP frontend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind, e.g. `127.0.0.1:8545`.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Maximum accepted request body size in bytes. Defaults to 10 MiB.
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    /// Overall deadline for a request, including upstream round-trips.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    /// Maximum concurrently handled HTTP requests.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

fn default_listen_addr() -> String {
    "127.0.0.1:8545".to_string()
}

fn default_max_body_size() -> usize {
    10 * 1024 * 1024
}

fn default_request_timeout_seconds() -> u64 {
    30
}

fn default_max_concurrent_requests() -> usize {
    256
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_body_size: default_max_body_size(),
            request_timeout_seconds: default_request_timeout_seconds(),
            max_concurrent_requests: default_max_concurrent_requests(),
        }
    }
}

/// Client-facing rate limiting. The storage engine is behind the
/// [`crate::ratelimit::RateLimit`] contract; this selects and parameterizes
/// the shipped in-memory token-bucket engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Sustained tokens per second granted to each key.
    #[serde(default = "default_rate_limit_rps")]
    pub max_rps: u32,

    /// Bucket capacity (burst allowance).
    #[serde(default = "default_rate_limit_burst")]
    pub burst: u32,

    /// Subject the key is derived from: `"ip"` or `"authorization"`.
    #[serde(default = "default_rate_limit_key_by")]
    pub key_by: String,
}

fn default_rate_limit_rps() -> u32 {
    100
}

fn default_rate_limit_burst() -> u32 {
    200
}

fn default_rate_limit_key_by() -> String {
    "ip".to_string()
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_rps: default_rate_limit_rps(),
            burst: default_rate_limit_burst(),
            key_by: default_rate_limit_key_by(),
        }
    }
}

/// Log output settings for the server binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: `"json"` or `"pretty"`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

/// One upstream RPC endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Identifier used in group membership, logs, and counters.
    pub name: String,

    /// HTTP(S) endpoint URL for JSON-RPC requests.
    pub url: String,

    /// Load-balancing weight. Reserved for weighted policies; defaults to 1.
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Local token-bucket rate toward this backend, in requests per second.
    #[serde(default = "default_backend_max_rps")]
    pub max_rps: u32,

    /// Maximum in-flight dispatches toward this backend.
    #[serde(default = "default_backend_max_concurrent")]
    pub max_concurrent: usize,

    /// Extra headers attached to every upstream request.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Cheap RPC method used by the health monitor as a liveness probe.
    #[serde(default = "default_probe_method")]
    pub probe_method: String,

    /// Interval between liveness probes.
    #[serde(default = "default_probe_interval_seconds")]
    pub probe_interval_seconds: u64,

    /// Consecutive failures before the backend is marked Unhealthy.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Duration of a ban once the ban policy triggers.
    #[serde(default = "default_ban_duration_seconds")]
    pub ban_duration_seconds: u64,

    /// p99 latency (over the rolling window) above which the backend is
    /// considered Degraded: still selectable, deprioritized.
    #[serde(default = "default_degraded_latency_ms")]
    pub degraded_latency_ms: u64,

    /// Per-dispatch upstream timeout.
    #[serde(default = "default_backend_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_weight() -> u32 {
    1
}

fn default_backend_max_rps() -> u32 {
    200
}

fn default_backend_max_concurrent() -> usize {
    64
}

fn default_probe_method() -> String {
    "net_version".to_string()
}

fn default_probe_interval_seconds() -> u64 {
    10
}

fn default_failure_threshold() -> u32 {
    2
}

fn default_ban_duration_seconds() -> u64 {
    300
}

fn default_degraded_latency_ms() -> u64 {
    2000
}

fn default_backend_timeout_seconds() -> u64 {
    10
}

impl BackendConfig {
    /// Returns the per-dispatch timeout as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Returns the probe interval as a [`Duration`].
    #[must_use]
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_seconds)
    }

    /// Returns the ban duration as a [`Duration`].
    #[must_use]
    pub fn ban_duration(&self) -> Duration {
        Duration::from_secs(self.ban_duration_seconds)
    }
}

/// Consensus parameters for `consensus_aware` groups.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Maximum blocks a backend may lag behind the group tip and still be
    /// considered "at tip".
    #[serde(default = "default_max_lag")]
    pub max_lag: u64,
}

fn default_max_lag() -> u64 {
    8
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self { max_lag: default_max_lag() }
    }
}

/// An ordered pool of backends with a selection policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendGroupConfig {
    pub name: String,

    /// Member backend names, in selection order. Must be non-empty.
    pub backends: Vec<String>,

    #[serde(default)]
    pub policy: SelectionPolicy,

    /// Retries on the next selectable backend after an idempotent failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default)]
    pub consensus: Option<ConsensusConfig>,
}

fn default_max_retries() -> u32 {
    0
}

/// A `method → group` map with an optional catch-all group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MethodMappingConfig {
    #[serde(default)]
    pub methods: HashMap<String, String>,

    #[serde(default)]
    pub default_group: Option<String>,
}

/// Per-domain method mappings, matched on the lowercased request host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainMappingConfig {
    pub domain: String,

    #[serde(default)]
    pub methods: HashMap<String, String>,

    #[serde(default)]
    pub default_group: Option<String>,
}

/// One declarative method override rule.
///
/// Rules are consulted in document order; the first match wins. See
/// [`crate::overrides`] for matcher path grammar and hex comparison rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideRuleConfig {
    /// Exact, case-sensitive method name.
    pub method: String,

    /// Structural matchers: `path → expected value`.
    #[serde(default)]
    pub matchers: HashMap<String, serde_json::Value>,

    /// Literal JSON value emitted as the synthetic `result`.
    pub response: serde_json::Value,
}

/// Root configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub backends: Vec<BackendConfig>,

    #[serde(default)]
    pub backend_groups: Vec<BackendGroupConfig>,

    #[serde(default)]
    pub default_rpc_method_mappings: MethodMappingConfig,

    #[serde(default)]
    pub domain_rpc_method_mappings: Vec<DomainMappingConfig>,

    #[serde(default)]
    pub method_overrides: Vec<OverrideRuleConfig>,
}

impl AppConfig {
    /// Loads and validates configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, references an
    /// undefined environment variable, fails to parse, or fails validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    /// Loads and validates configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on undefined environment variables, parse
    /// failures, or validation failures.
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env(raw)?;
        let config: Self = toml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Returns the parsed listen address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `server.listen_addr` is not a
    /// parseable socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server.listen_addr.parse().map_err(|_| {
            ConfigError::Invalid(format!("invalid listen_addr: {}", self.server.listen_addr))
        })
    }

    /// Returns the overall request deadline.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_seconds)
    }

    /// Cross-checks the document for dangling references and malformed values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backends.is_empty() {
            return Err(ConfigError::Invalid("no backends configured".to_string()));
        }

        for backend in &self.backends {
            if backend.name.is_empty() {
                return Err(ConfigError::Invalid("backend with empty name".to_string()));
            }
            if !backend.url.starts_with("http") {
                return Err(ConfigError::Invalid(format!(
                    "backend {}: url must be http(s), got {}",
                    backend.name, backend.url
                )));
            }
            if backend.failure_threshold == 0 {
                return Err(ConfigError::Invalid(format!(
                    "backend {}: failure_threshold must be greater than 0",
                    backend.name
                )));
            }
            if backend.max_concurrent == 0 {
                return Err(ConfigError::Invalid(format!(
                    "backend {}: max_concurrent must be greater than 0",
                    backend.name
                )));
            }
        }

        let backend_names: std::collections::HashSet<&str> =
            self.backends.iter().map(|b| b.name.as_str()).collect();
        if backend_names.len() != self.backends.len() {
            return Err(ConfigError::Invalid("duplicate backend name".to_string()));
        }

        if self.backend_groups.is_empty() {
            return Err(ConfigError::Invalid("no backend groups configured".to_string()));
        }

        for group in &self.backend_groups {
            if group.backends.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "backend group {} has no members",
                    group.name
                )));
            }
            for member in &group.backends {
                if !backend_names.contains(member.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "backend group {} references unknown backend {member}",
                        group.name
                    )));
                }
            }
        }

        let group_names: std::collections::HashSet<&str> =
            self.backend_groups.iter().map(|g| g.name.as_str()).collect();
        if group_names.len() != self.backend_groups.len() {
            return Err(ConfigError::Invalid("duplicate backend group name".to_string()));
        }

        self.validate_mapping(
            &group_names,
            &self.default_rpc_method_mappings.methods,
            self.default_rpc_method_mappings.default_group.as_deref(),
            "default",
        )?;
        for domain in &self.domain_rpc_method_mappings {
            if domain.domain.is_empty() {
                return Err(ConfigError::Invalid("domain mapping with empty domain".to_string()));
            }
            self.validate_mapping(
                &group_names,
                &domain.methods,
                domain.default_group.as_deref(),
                &domain.domain,
            )?;
        }

        for rule in &self.method_overrides {
            if rule.method.is_empty() {
                return Err(ConfigError::Invalid("override rule with empty method".to_string()));
            }
            for path in rule.matchers.keys() {
                MatcherPath::parse(path).map_err(|e| {
                    ConfigError::Invalid(format!(
                        "override rule for {}: bad matcher path {path}: {e}",
                        rule.method
                    ))
                })?;
            }
        }

        if self.server.max_body_size == 0 {
            return Err(ConfigError::Invalid("max_body_size must be greater than 0".to_string()));
        }
        if self.server.request_timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_seconds must be greater than 0".to_string(),
            ));
        }
        if !["ip", "authorization"].contains(&self.rate_limit.key_by.as_str()) {
            return Err(ConfigError::Invalid(
                "rate_limit.key_by must be 'ip' or 'authorization'".to_string(),
            ));
        }
        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err(ConfigError::Invalid(
                "logging.format must be 'json' or 'pretty'".to_string(),
            ));
        }

        Ok(())
    }

    fn validate_mapping(
        &self,
        group_names: &std::collections::HashSet<&str>,
        methods: &HashMap<String, String>,
        default_group: Option<&str>,
        scope: &str,
    ) -> Result<(), ConfigError> {
        for (method, group) in methods {
            if !group_names.contains(group.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "mapping for {scope}: method {method} references unknown group {group}"
                )));
            }
        }
        if let Some(group) = default_group {
            if !group_names.contains(group) {
                return Err(ConfigError::Invalid(format!(
                    "mapping for {scope}: default_group references unknown group {group}"
                )));
            }
        }
        Ok(())
    }
}

/// Expands `${VAR}` references from the process environment.
///
/// Every reference must resolve; an undefined variable fails the load rather
/// than producing an empty URL that would surface as a confusing dial error
/// later.
fn expand_env(raw: &str) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            return Err(ConfigError::Invalid("unterminated ${ in config".to_string()));
        };
        let name = &after[..end];
        let value =
            std::env::var(name).map_err(|_| ConfigError::UndefinedEnvVar(name.to_string()))?;
        out.push_str(&value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
