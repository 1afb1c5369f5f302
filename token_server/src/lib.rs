//! HTTP shell over the token ledger.
//!
//! Exposes balances, gated contacts and the purchase webhook as a small
//! axum application. Authentication is upstream; the caller's user id
//! arrives in the `x-user-id` header.

pub mod api;
pub mod config;
pub mod logging;
pub mod metrics;
