//! # ward-core
//!
//! Core types, traits, and primitives for the Ward action pipeline.
//! This crate defines the shared vocabulary used by both the Core process
//! (policy, signing, orchestration) and the Gateway process (verification,
//! admission control, execution).

pub mod adapter;
pub mod error;
pub mod event;
pub mod ipc;
pub mod types;

pub use adapter::{AdapterOutcome, Endpoint, ServiceAdapter};
pub use error::{Result, WardError};
pub use event::{Event, EventBus};
pub use ipc::IpcMessage;
pub use types::*;
