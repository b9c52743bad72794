//! # ward-cli
//!
//! Command-line interface for Ward.
//!
//! ## Commands
//!
//! - `ward gateway`: Run the Gateway on its Unix socket
//! - `ward submit`: Push one action through the Core decision flow
//! - `ward tier`: Inspect and change per-domain autonomy tiers
//! - `ward allowlist`: Manage the Gateway's domain allowlist
//! - `ward audit`: Browse and verify the audit chains
//! - `ward config`: Show the effective configuration

pub mod commands;

pub use commands::Cli;
