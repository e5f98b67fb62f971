//! Meta-transaction relay for the tri-escrow protocol.
//!
//! Serves a local escrow ledger over HTTP. Participants sign confirm, cancel,
//! dispute and split authorizations off-chain; the relay submits them as the
//! transaction sender.
//!
//! # Modules
//!
//! - [`handlers`]: Axum route handlers and router builder
//! - [`error`]: Relay error types and their HTTP mapping
//! - [`config`]: Server configuration with environment variable expansion

pub mod config;
pub mod error;
pub mod handlers;

pub use handlers::{RelayState, relay_router};
