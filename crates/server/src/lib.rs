//! HTTP frontend for the junction JSON-RPC reverse proxy.
//!
//! The [`router`] module builds the axum application: one POST endpoint that
//! extracts the routing domain from headers, enforces body-size and rate
//! limits, hands the parsed payload to the orchestrator, and maps the outcome
//! onto HTTP per JSON-RPC convention (sub-request failures stay HTTP 200;
//! only parse, payload-size, and rate-limit failures change the status).

pub mod router;

pub use router::{build_app, AppState};
