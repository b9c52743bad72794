use thiserror::Error;

use crate::types::ActionStatus;

/// Unified error type for the Ward pipeline.
#[derive(Error, Debug)]
pub enum WardError {
    // ── Policy errors ──────────────────────────────────────────
    #[error("action denied by policy: {action}: {reason}")]
    PolicyDenied { action: String, reason: String },

    #[error("human approval required: {action}: {reason}")]
    ApprovalRequired { action: String, reason: String },

    // ── Gateway enforcement errors ─────────────────────────────
    #[error("signature invalid for request {request_id}")]
    SignatureInvalid { request_id: String },

    #[error("rate limited: {action}, retry after {retry_after_ms}ms")]
    RateLimited { action: String, retry_after_ms: u64 },

    #[error("gateway returned {status} for {action}: {reason}")]
    GatewayFailed {
        action: String,
        status: ActionStatus,
        reason: String,
    },

    #[error("domain not allowed: {domain} (port {port:?})")]
    DomainNotAllowed { domain: String, port: Option<u16> },

    #[error("invalid allowlist entry: {0}")]
    InvalidAllowlistEntry(String),

    // ── Audit errors ───────────────────────────────────────────
    #[error("audit write failed: {0}")]
    AuditWriteFailure(String),

    // ── Infrastructure errors ──────────────────────────────────
    #[error("storage error: {0}")]
    Storage(String),

    #[error("ipc error: {0}")]
    Ipc(String),

    #[error("adapter error: {action}: {reason}")]
    Adapter { action: String, reason: String },

    #[error("not found: {0}")]
    NotFound(String),

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    #[error("config validation failed: {field}: {reason}")]
    ConfigValidation { field: String, reason: String },

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl WardError {
    /// Whether the caller may retry the same action later.
    ///
    /// Only rate limiting is transient; every other failure needs either a
    /// human decision or an explicit configuration change.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

pub type Result<T> = std::result::Result<T, WardError>;
