//! # ward-runtime
//!
//! The Core side of the pipeline. Core decides and signs; it never touches
//! the network itself.
//!
//! ```text
//!   ActionIntent
//!        │
//!        ▼
//!   ┌──────────────┐   boundaries   ┌─────────────────┐
//!   │ Orchestrator │ ─────────────▶ │ AutonomyEngine  │
//!   └──────┬───────┘                └─────────────────┘
//!          │ auto_execute │ requires_approval │ denied
//!          ▼              ▼                   ▼
//!     sign + audit    approval queue     audit + error
//!          │
//!          ▼  GatewayTransport (Unix socket)
//!     ┌─────────┐
//!     │ Gateway │
//!     └─────────┘
//! ```

pub mod orchestrator;
pub mod transport;

pub use orchestrator::{ActionIntent, Orchestrator, PendingApproval, SubmitOutcome};
pub use transport::{GatewayTransport, IpcClient};
