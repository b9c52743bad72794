//! # ward-autonomy
//!
//! Per-domain autonomy tiers and the policy that decides whether an action
//! may run unattended.
//!
//! An action passes through two checks before anything is signed:
//!
//! 1. [`EscalationBoundaryChecker`] lists every boundary the action trips
//!    (money, legal wording, irreversibility, novelty, low confidence).
//! 2. [`AutonomyEngine::decide`] combines those boundaries with the domain's
//!    [`AutonomyTier`] into `auto_execute`, `requires_approval` or `denied`.
//!
//! Any boundary forces approval; no tier overrides it.

pub mod boundary;
pub mod decision;
pub mod pattern;
pub mod store;
pub mod tier;

pub use boundary::{
    ActionContext, BoundaryKind, BoundaryRule, EscalationBoundary, EscalationBoundaryChecker,
    Severity, should_escalate,
};
pub use decision::{AutonomyEngine, Decision, DecisionPolicy, Outcome};
pub use pattern::{ApprovalPattern, ApprovalPatternStore, SqlitePatternStore};
pub use store::{TierSnapshot, TierStore};
pub use tier::AutonomyTier;
