//! Integration tests for the junction JSON-RPC reverse proxy.
//!
//! Test modules:
//!
//! - `override_tests`: method-override matching through the full pipeline,
//!   including the `eth_call` argument hook and backend-traffic counting
//! - `routing_tests`: domain routing via `X-Forwarded-Host`, fallback chains,
//!   and multi-group setups
//! - `batch_tests`: batch orchestration — coalescing, ordering, notifications,
//!   duplicate ids
//! - `failover_tests`: group retries, health eviction, no-backends behavior
//! - `frontend_tests`: HTTP status mapping — parse errors, payload limits,
//!   rate limiting
//! - `mock_infrastructure`: reusable mockito-backed mock backends with
//!   request counting
//!
//! All tests run against in-process mock backends; no external environment is
//! required:
//!
//! ```bash
//! cargo test --package tests
//! ```


#[cfg(test)]
mod failover_tests;

#[cfg(test)]
mod frontend_tests;

#[cfg(test)]
mod override_tests;

#[cfg(test)]
mod routing_tests;

#[cfg(test)]
mod support;

/// Mock infrastructure for testing
pub mod mock_infrastructure;
