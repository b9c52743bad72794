use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use ward_config::EscalationConfig;
use ward_core::{Payload, Result, WardError};

use crate::pattern::ApprovalPatternStore;

/// Which policy rule fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryKind {
    FinancialThreshold,
    LegalLanguage,
    Irreversible,
    Novel,
    LowConfidence,
}

impl BoundaryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FinancialThreshold => "financial_threshold",
            Self::LegalLanguage => "legal_language",
            Self::Irreversible => "irreversible",
            Self::Novel => "novel",
            Self::LowConfidence => "low_confidence",
        }
    }
}

impl fmt::Display for BoundaryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Medium,
    High,
}

/// A policy rule that forces human approval regardless of tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationBoundary {
    #[serde(rename = "type")]
    pub kind: BoundaryKind,
    pub reason: String,
    pub severity: Severity,
}

impl EscalationBoundary {
    pub fn new(kind: BoundaryKind, severity: Severity, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
            severity,
        }
    }

    pub fn is_high(&self) -> bool {
        self.severity == Severity::High
    }
}

/// `true` if any boundary fired.
pub fn should_escalate(boundaries: &[EscalationBoundary]) -> bool {
    !boundaries.is_empty()
}

/// What a boundary rule looks at.
#[derive(Debug, Clone, Copy)]
pub struct ActionContext<'a> {
    pub action: &'a str,
    pub payload: &'a Payload,
    pub llm_confidence: Option<f64>,
}

/// A single escalation rule.
pub trait BoundaryRule: Send + Sync {
    fn kind(&self) -> BoundaryKind;
    fn evaluate(&self, ctx: &ActionContext<'_>) -> Option<EscalationBoundary>;
}

/// Runs every registered rule against an action. Rules are not
/// short-circuited: the result lists every boundary that fired, in rule order.
pub struct EscalationBoundaryChecker {
    rules: Vec<Box<dyn BoundaryRule>>,
}

impl EscalationBoundaryChecker {
    /// The built-in rule set: financial, legal, irreversible, novel, low confidence.
    pub fn new(config: &EscalationConfig, patterns: Arc<dyn ApprovalPatternStore>) -> Result<Self> {
        let mut checker = Self::empty();
        checker.add_rule(Box::new(FinancialThresholdRule {
            threshold: config.financial_threshold,
        }));
        checker.add_rule(Box::new(LegalLanguageRule::new()?));
        checker.add_rule(Box::new(IrreversibleRule {
            actions: config.irreversible_actions.clone(),
        }));
        checker.add_rule(Box::new(NoveltyRule { patterns }));
        checker.add_rule(Box::new(LowConfidenceRule {
            threshold: config.confidence_threshold,
        }));
        Ok(checker)
    }

    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add_rule(&mut self, rule: Box<dyn BoundaryRule>) {
        self.rules.push(rule);
    }

    pub fn check(
        &self,
        action: &str,
        payload: &Payload,
        llm_confidence: Option<f64>,
    ) -> Vec<EscalationBoundary> {
        let ctx = ActionContext {
            action,
            payload,
            llm_confidence,
        };
        let boundaries: Vec<EscalationBoundary> = self
            .rules
            .iter()
            .filter_map(|rule| rule.evaluate(&ctx))
            .collect();
        if !boundaries.is_empty() {
            debug!(
                action,
                kinds = ?boundaries.iter().map(|b| b.kind).collect::<Vec<_>>(),
                "escalation boundaries fired"
            );
        }
        boundaries
    }
}

// ── Built-in rules ─────────────────────────────────────────────

/// Payload `amount` above the configured threshold.
struct FinancialThresholdRule {
    threshold: f64,
}

fn parse_amount(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

impl BoundaryRule for FinancialThresholdRule {
    fn kind(&self) -> BoundaryKind {
        BoundaryKind::FinancialThreshold
    }

    fn evaluate(&self, ctx: &ActionContext<'_>) -> Option<EscalationBoundary> {
        let amount = ctx.payload.get("amount").and_then(parse_amount)?;
        // NaN and infinities compare false; treat them as over the line.
        (!amount.is_finite() || amount > self.threshold).then(|| {
            EscalationBoundary::new(
                self.kind(),
                Severity::High,
                format!("amount {amount} exceeds threshold {}", self.threshold),
            )
        })
    }
}

const LEGAL_FIELDS: [&str; 5] = ["body", "subject", "description", "text", "content"];

const LEGAL_PATTERN: &str = r"\b(contracts?|agreements?|binding|nda|liabilit(?:y|ies)|indemnif\w*|arbitration|jurisdictions?|waivers?|power\s+of\s+attorney)\b";

const EXCERPT_CHARS: usize = 80;
const EXCERPT_LEAD: usize = 20;

/// Contract-like wording in any free-text field.
struct LegalLanguageRule {
    pattern: Regex,
}

impl LegalLanguageRule {
    fn new() -> Result<Self> {
        let pattern = RegexBuilder::new(LEGAL_PATTERN)
            .case_insensitive(true)
            .build()
            .map_err(|e| WardError::Config(format!("legal language pattern: {e}")))?;
        Ok(Self { pattern })
    }
}

/// Up to [`EXCERPT_CHARS`] characters around byte offset `at`, never splitting a char.
fn excerpt(text: &str, at: usize) -> String {
    let lead = text[..at].chars().count().saturating_sub(EXCERPT_LEAD);
    text.chars().skip(lead).take(EXCERPT_CHARS).collect()
}

impl BoundaryRule for LegalLanguageRule {
    fn kind(&self) -> BoundaryKind {
        BoundaryKind::LegalLanguage
    }

    fn evaluate(&self, ctx: &ActionContext<'_>) -> Option<EscalationBoundary> {
        LEGAL_FIELDS.iter().find_map(|field| {
            let text = ctx.payload.get(*field)?.as_str()?;
            let m = self.pattern.find(text)?;
            Some(EscalationBoundary::new(
                self.kind(),
                Severity::High,
                format!(
                    "legal language ('{}') in {field}: \"{}\"",
                    m.as_str(),
                    excerpt(text, m.start())
                ),
            ))
        })
    }
}

/// Actions that cannot be undone.
struct IrreversibleRule {
    actions: Vec<String>,
}

impl BoundaryRule for IrreversibleRule {
    fn kind(&self) -> BoundaryKind {
        BoundaryKind::Irreversible
    }

    fn evaluate(&self, ctx: &ActionContext<'_>) -> Option<EscalationBoundary> {
        self.actions.iter().any(|a| a == ctx.action).then(|| {
            EscalationBoundary::new(
                self.kind(),
                Severity::High,
                format!("'{}' cannot be undone", ctx.action),
            )
        })
    }
}

/// Action types that have never been approved by a human.
struct NoveltyRule {
    patterns: Arc<dyn ApprovalPatternStore>,
}

impl BoundaryRule for NoveltyRule {
    fn kind(&self) -> BoundaryKind {
        BoundaryKind::Novel
    }

    fn evaluate(&self, ctx: &ActionContext<'_>) -> Option<EscalationBoundary> {
        match self.patterns.get(ctx.action) {
            Ok(Some(_)) => None,
            Ok(None) => Some(EscalationBoundary::new(
                self.kind(),
                Severity::Medium,
                format!("'{}' has never been approved before", ctx.action),
            )),
            // Unreadable history counts as no history.
            Err(e) => {
                warn!(action = ctx.action, error = %e, "approval pattern lookup failed, treating action as novel");
                Some(EscalationBoundary::new(
                    self.kind(),
                    Severity::Medium,
                    format!(
                        "approval history for '{}' unavailable, treating as first-time",
                        ctx.action
                    ),
                ))
            }
        }
    }
}

/// Model-reported confidence below the configured threshold.
struct LowConfidenceRule {
    threshold: f64,
}

impl BoundaryRule for LowConfidenceRule {
    fn kind(&self) -> BoundaryKind {
        BoundaryKind::LowConfidence
    }

    fn evaluate(&self, ctx: &ActionContext<'_>) -> Option<EscalationBoundary> {
        let confidence = ctx.llm_confidence?;
        (confidence < self.threshold).then(|| {
            EscalationBoundary::new(
                self.kind(),
                Severity::Medium,
                format!("confidence {confidence:.2} below {:.2}", self.threshold),
            )
        })
    }
}
