//! Reusable mock types for testing the proxy without real upstream nodes.
//!
//! - [`rpc_mock::MockBackend`]: a mockito-backed JSON-RPC endpoint with
//!   hit-count assertions, standing in for an upstream node
//! - [`test_helpers`]: runtime/app construction from inline TOML

pub mod test_helpers;

pub use rpc_mock::MockBackend;
pub use test_helpers::{app_from_toml, runtime_from_toml};
