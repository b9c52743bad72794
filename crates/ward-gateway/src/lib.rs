//! # ward-gateway
//!
//! The only process allowed to reach the network. Every signed action from
//! Core is audited, verified, rate limited and checked against the allowlist
//! before a [`ServiceAdapter`](ward_core::ServiceAdapter) runs it.

pub mod allowlist;
pub mod ipc;
pub mod pipeline;
pub mod ratelimit;
pub mod registry;

pub use allowlist::{Allowlist, AllowlistEntry, NewService};
pub use ipc::{IpcServer, handle_connection};
pub use pipeline::Gateway;
pub use ratelimit::{
    Clock, LimitScope, ManualClock, RateLimitConfig, RateLimitDecision, RateLimitSnapshot,
    SlidingWindowLimiter, SystemClock,
};
pub use registry::{AdapterRegistry, DryRunAdapter};
