use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use ward_config::AutonomyConfig;

use crate::boundary::EscalationBoundary;
use crate::pattern::ApprovalPatternStore;
use crate::store::TierSnapshot;
use crate::tier::AutonomyTier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    AutoExecute,
    RequiresApproval,
    Denied,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoExecute => "auto_execute",
            Self::RequiresApproval => "requires_approval",
            Self::Denied => "denied",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub outcome: Outcome,
    pub tier: AutonomyTier,
    pub reason: String,
}

impl Decision {
    fn new(outcome: Outcome, tier: AutonomyTier, reason: impl Into<String>) -> Self {
        Self {
            outcome,
            tier,
            reason: reason.into(),
        }
    }
}

/// Which actions are read-only, and which a guardian domain may run unattended.
#[derive(Debug, Clone, Default)]
pub struct DecisionPolicy {
    pub read_only_actions: HashSet<String>,
    pub guardian_preapproved: HashSet<String>,
}

impl DecisionPolicy {
    pub fn from_config(config: &AutonomyConfig) -> Self {
        Self {
            read_only_actions: config.read_only_actions.iter().cloned().collect(),
            guardian_preapproved: config.guardian_preapproved.iter().cloned().collect(),
        }
    }

    pub fn is_read_only(&self, action: &str) -> bool {
        self.read_only_actions.contains(action)
    }
}

/// Combines a domain's tier with the escalation boundaries of one action.
///
/// Every call is a function of its arguments plus a read of the approval
/// pattern store; the engine keeps no per-session state.
pub struct AutonomyEngine {
    policy: DecisionPolicy,
    patterns: Arc<dyn ApprovalPatternStore>,
}

impl AutonomyEngine {
    pub fn new(policy: DecisionPolicy, patterns: Arc<dyn ApprovalPatternStore>) -> Self {
        Self { policy, patterns }
    }

    pub fn policy(&self) -> &DecisionPolicy {
        &self.policy
    }

    pub fn decide(
        &self,
        tiers: &TierSnapshot,
        action: &str,
        domain: &str,
        boundaries: &[EscalationBoundary],
    ) -> Decision {
        let tier = tiers.tier_for(domain);

        // A disabled domain blocks everything, with or without boundaries.
        if tiers.is_disabled(domain) {
            return Decision::new(
                Outcome::Denied,
                tier,
                format!("domain '{domain}' is disabled"),
            );
        }

        if let Some(first) = boundaries.first() {
            let kinds: Vec<&str> = boundaries.iter().map(|b| b.kind.as_str()).collect();
            debug!(action, domain, %tier, ?kinds, "escalation forces approval");
            return Decision::new(
                Outcome::RequiresApproval,
                tier,
                format!("escalation: {} ({})", kinds.join(", "), first.reason),
            );
        }

        let decision = match tier {
            AutonomyTier::Observer => {
                if self.policy.is_read_only(action) {
                    Decision::new(Outcome::AutoExecute, tier, "read-only action")
                } else {
                    Decision::new(
                        Outcome::RequiresApproval,
                        tier,
                        "observer domains ask before changing state",
                    )
                }
            }
            AutonomyTier::Guardian => {
                if self.policy.guardian_preapproved.contains(action) {
                    Decision::new(Outcome::AutoExecute, tier, "pre-approved idempotent action")
                } else {
                    Decision::new(
                        Outcome::RequiresApproval,
                        tier,
                        "not on the guardian pre-approved list",
                    )
                }
            }
            AutonomyTier::Partner => self.decide_partner(action),
            AutonomyTier::AlterEgo => {
                Decision::new(Outcome::AutoExecute, tier, "acting on the user's behalf")
            }
        };

        // Tiers never override a high-severity boundary.
        debug_assert!(
            !(decision.outcome == Outcome::AutoExecute && boundaries.iter().any(|b| b.is_high()))
        );
        decision
    }

    fn decide_partner(&self, action: &str) -> Decision {
        let tier = AutonomyTier::Partner;
        if self.policy.is_read_only(action) {
            return Decision::new(Outcome::AutoExecute, tier, "read-only action");
        }
        match self.patterns.get(action) {
            Ok(Some(_)) => Decision::new(Outcome::AutoExecute, tier, "routine action"),
            Ok(None) => Decision::new(Outcome::RequiresApproval, tier, "first-time action"),
            Err(e) => {
                warn!(action, error = %e, "approval pattern lookup failed, requiring approval");
                Decision::new(
                    Outcome::RequiresApproval,
                    tier,
                    "approval history unavailable",
                )
            }
        }
    }
}
