//! # Junction Core
//!
//! Core library for the junction JSON-RPC reverse proxy.
//!
//! This crate provides the routing and dispatch pipeline:
//!
//! - **[`backend`]**: Upstream endpoint management with health state tracking,
//!   local rate limiting, group selection policies, and failover retries.
//!
//! - **[`routing`]**: The `(domain, method) → backend group` resolution table,
//!   with per-domain method maps falling back to a default map.
//!
//! - **[`overrides`]**: Declarative method overrides that synthesize responses
//!   without contacting any backend, including the `eth_call` argument hook.
//!
//! - **[`proxy`]**: Batch orchestration — splits a JSON-RPC payload along
//!   routing boundaries, coalesces identically-routed sub-requests into nested
//!   upstream batches, and reassembles responses in input order.
//!
//! - **[`ratelimit`]**: Client-facing rate-limit contract plus the shipped
//!   in-memory token-bucket engine.
//!
//! - **[`config`]**: TOML configuration with `${VAR}` expansion and load-time
//!   validation.
//!
//! ## Request Flow
//!
//! ```text
//! HTTP request
//!       │
//!       ▼
//! ┌──────────────┐
//! │   Frontend   │ ── oversized / unparseable ──► 413 / 400
//! └──────┬───────┘
//!        ▼
//! ┌──────────────┐
//! │ Orchestrator │ ── duplicate ids ──► -32600 (whole batch)
//! └──────┬───────┘
//!        │  per sub-request
//!        ▼
//! ┌──────────────┐     hit
//! │  Overrides   │ ──────────► synthetic response (no backend traffic)
//! └──────┬───────┘
//!        │ miss
//!        ▼
//! ┌──────────────┐
//! │    Router    │ ── unresolved ──► -32601
//! └──────┬───────┘
//!        ▼
//! ┌──────────────┐
//! │ BackendGroup │ ── select / retry / failover
//! └──────┬───────┘
//!        ▼
//!   upstream HTTP (coalesced batches, one call per routed chunk)
//! ```

pub mod backend;
pub mod config;
pub mod overrides;
pub mod proxy;
pub mod ratelimit;
pub mod routing;
pub mod runtime;
pub mod types;
