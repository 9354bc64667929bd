//! `(domain, method) → backend group` resolution.
//!
//! Each domain owns a method map with an optional catch-all group; a
//! distinguished default map serves requests whose host matches no domain.
//! Resolution order for a `(domain, method)` pair:
//!
//! 1. pick the domain's map, or the default map for unknown domains;
//! 2. exact method lookup in that map;
//! 3. the map's `default_group`, if any;
//! 4. for domain maps only: repeat 2–3 against the default map;
//! 5. otherwise the method is unroutable.
//!
//! Tables are immutable after startup and shared without synchronization;
//! the whole table swaps atomically on reload via `ArcSwap`, so readers
//! always observe a consistent snapshot and resolution is deterministic
//! between reloads.

use crate::config::{DomainMappingConfig, MethodMappingConfig};
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};

/// A `method → group` map with an optional catch-all.
#[derive(Debug, Clone, Default)]
pub struct MethodTable {
    methods: HashMap<String, String>,
    default_group: Option<String>,
}

impl MethodTable {
    #[must_use]
    pub fn new(methods: HashMap<String, String>, default_group: Option<String>) -> Self {
        Self { methods, default_group }
    }

    fn lookup(&self, method: &str) -> Option<&str> {
        self.methods.get(method).or(self.default_group.as_ref()).map(String::as_str)
    }
}

/// The full routing table: per-domain maps plus the default map.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    domains: HashMap<String, MethodTable>,
    default_mapping: MethodTable,
}

impl RoutingTable {
    /// Builds the table from config. Domain keys are lowercased here so that
    /// lookup is a plain map access against the lowercased request host.
    #[must_use]
    pub fn from_config(default: &MethodMappingConfig, domains: &[DomainMappingConfig]) -> Self {
        let default_mapping =
            MethodTable::new(default.methods.clone(), default.default_group.clone());
        let domains = domains
            .iter()
            .map(|d| {
                (
                    d.domain.to_ascii_lowercase(),
                    MethodTable::new(d.methods.clone(), d.default_group.clone()),
                )
            })
            .collect();
        Self { domains, default_mapping }
    }

    fn resolve(&self, domain: &str, method: &str) -> Option<&str> {
        match self.domains.get(domain) {
            Some(table) => table.lookup(method).or_else(|| self.default_mapping.lookup(method)),
            None => self.default_mapping.lookup(method),
        }
    }
}

/// Shared resolver handle. Reads are lock-free snapshots; `replace` swaps the
/// table atomically on explicit reload.
#[derive(Debug)]
pub struct Router {
    table: ArcSwap<RoutingTable>,
}

impl Router {
    #[must_use]
    pub fn new(table: RoutingTable) -> Self {
        Self { table: ArcSwap::from_pointee(table) }
    }

    /// Resolves the backend-group name for a `(domain, method)` pair.
    ///
    /// `domain` must already be lowercased (the frontend normalizes the host
    /// header). Returns `None` when no mapping and no default applies — the
    /// caller surfaces that as method-not-found.
    #[must_use]
    pub fn resolve(&self, domain: &str, method: &str) -> Option<String> {
        self.table.load().resolve(domain, method).map(str::to_string)
    }

    /// Atomically replaces the routing table. In-flight requests keep the
    /// snapshot they started with.
    pub fn replace(&self, table: RoutingTable) {
        self.table.store(Arc::new(table));
    }
}
