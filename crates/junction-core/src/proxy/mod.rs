//! Request processing: the batch orchestrator and its error taxonomy.
//!
//! # Processing flow
//!
//! ```text
//! parsed payload (object or array)
//!       │
//!       ▼
//! duplicate-id check ── duplicate ──► -32600, whole batch
//!       │
//!       ▼  per sub-request
//! notification? ──► consumed, no output slot
//! override hit? ──► synthetic response, no backend traffic
//! router miss?  ──► -32601 in slot
//!       │
//!       ▼
//! group by backend group ──► one nested upstream batch per group,
//!                            groups dispatched concurrently
//!       │
//!       ▼
//! reassemble by slot index ──► input order, single-in single-out
//! ```

pub mod errors;
pub mod orchestrator;

pub use errors::{codes, ProxyError};
pub use orchestrator::{Orchestrator, ResponsePayload};
