use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Four autonomy tiers, assigned per functional domain:
///
/// - **Observer**: Read-only actions run; anything that changes state needs approval.
/// - **Guardian**: Only a short list of pre-approved idempotent actions runs unattended.
/// - **Partner**: Routine actions run; first-time actions need approval.
/// - **AlterEgo**: Acts on the user's behalf unless an escalation boundary fires.
///
/// Unconfigured domains resolve to [`AutonomyTier::CONSERVATIVE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyTier {
    Observer,
    Guardian,
    Partner,
    AlterEgo,
}

impl AutonomyTier {
    /// Fallback tier for domains with no explicit configuration.
    pub const CONSERVATIVE: AutonomyTier = AutonomyTier::Guardian;

    pub const ALL: [AutonomyTier; 4] = [
        AutonomyTier::Observer,
        AutonomyTier::Guardian,
        AutonomyTier::Partner,
        AutonomyTier::AlterEgo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Observer => "observer",
            Self::Guardian => "guardian",
            Self::Partner => "partner",
            Self::AlterEgo => "alter_ego",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Observer => "Reads freely, asks before changing anything",
            Self::Guardian => "Only pre-approved idempotent actions run unattended",
            Self::Partner => "Routine actions run, first-time actions need approval",
            Self::AlterEgo => "Acts on your behalf unless an escalation boundary fires",
        }
    }
}

impl fmt::Display for AutonomyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AutonomyTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "observer" => Ok(Self::Observer),
            "guardian" => Ok(Self::Guardian),
            "partner" => Ok(Self::Partner),
            "alter_ego" | "alterego" | "alter-ego" => Ok(Self::AlterEgo),
            other => Err(format!("unknown autonomy tier '{other}'")),
        }
    }
}
