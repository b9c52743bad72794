//! # ward-config
//!
//! Configuration system for Ward. Reads from `ward.toml` and environment
//! variables, in that precedence order, and validates the result before any
//! component sees it.
//!
//! Supports hot-reload via filesystem watcher.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::WardConfig;
pub use schema::{
    AllowlistConfig, AuditConfig, AutonomyConfig, ConfigWarning, EscalationConfig, IpcConfig,
    LoggingConfig, RateLimitsConfig, ServiceConfig, SigningConfig, StorageConfig, VALID_TIERS,
    WarningSeverity,
};
