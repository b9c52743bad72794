//! # ward-audit
//!
//! Everything that makes an action provable after the fact:
//!
//! - [`canonical`]: key-sorted JSON so equal payloads hash equally
//! - [`signing`]: HMAC-SHA256 request signatures shared by Core and Gateway
//! - [`chain`]: the append-only, hash-chained audit log

pub mod canonical;
pub mod chain;
pub mod signing;

pub use canonical::{canonical_json, sha256_hex};
pub use chain::{
    AuditChain, AuditEntry, AuditStats, ChainVerification, GENESIS_HASH, NewAuditEntry,
    verify_chain,
};
pub use signing::{RequestSigner, SigningKey, verify};
