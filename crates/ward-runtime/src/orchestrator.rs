use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};
use ward_audit::{
    AuditChain, AuditEntry, NewAuditEntry, RequestSigner, SigningKey, canonical_json, sha256_hex,
};
use ward_autonomy::{
    ApprovalPatternStore, AutonomyEngine, Decision, DecisionPolicy, EscalationBoundary,
    EscalationBoundaryChecker, Outcome, SqlitePatternStore, TierStore,
};
use ward_config::{AuditConfig, WardConfig};
use ward_core::{
    ActionRequest, ActionResponse, ActionStatus, Direction, Event, EventBus, Payload, Result,
    WardError, now_iso,
};

use crate::transport::GatewayTransport;

/// What the agent wants to do, before any policy has looked at it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionIntent {
    pub action: String,
    /// Functional domain, e.g. "email".
    pub domain: String,
    pub payload: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_confidence: Option<f64>,
}

impl ActionIntent {
    pub fn new(action: impl Into<String>, domain: impl Into<String>, payload: Payload) -> Self {
        Self {
            action: action.into(),
            domain: domain.into(),
            payload,
            llm_confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.llm_confidence = Some(confidence);
        self
    }
}

/// An action waiting for a human.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub request: ActionRequest,
    pub decision: Decision,
    pub boundaries: Vec<EscalationBoundary>,
    pub queued_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Dispatched to the Gateway; the response carries the final status.
    Executed(ActionResponse),
    /// Queued until [`Orchestrator::approve`] or [`Orchestrator::reject`].
    PendingApproval(PendingApproval),
}

/// Drives an intent through boundaries, decision, signing, audit and dispatch.
pub struct Orchestrator {
    tiers: TierStore,
    patterns: Arc<dyn ApprovalPatternStore>,
    checker: EscalationBoundaryChecker,
    engine: AutonomyEngine,
    signer: RequestSigner,
    audit: AuditChain,
    transport: Arc<dyn GatewayTransport>,
    events: EventBus,
    time_saved: AuditConfig,
    pending: Mutex<HashMap<String, PendingApproval>>,
}

impl Orchestrator {
    pub fn new(
        tiers: TierStore,
        patterns: Arc<dyn ApprovalPatternStore>,
        checker: EscalationBoundaryChecker,
        engine: AutonomyEngine,
        signer: RequestSigner,
        audit: AuditChain,
        transport: Arc<dyn GatewayTransport>,
    ) -> Self {
        Self {
            tiers,
            patterns,
            checker,
            engine,
            signer,
            audit,
            transport,
            events: EventBus::default(),
            time_saved: AuditConfig::default(),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Open the Core database at `core_db` and wire every component from config.
    pub fn open(
        config: &WardConfig,
        core_db: &Path,
        key: &SigningKey,
        transport: Arc<dyn GatewayTransport>,
    ) -> Result<Self> {
        let tiers = TierStore::open(core_db)?;
        let seeded = tiers.apply_config(&config.autonomy)?;
        if seeded > 0 {
            info!(seeded, "applied configured domain tiers");
        }
        let patterns: Arc<dyn ApprovalPatternStore> = Arc::new(SqlitePatternStore::open(core_db)?);
        let checker = EscalationBoundaryChecker::new(&config.escalation, patterns.clone())?;
        let engine = AutonomyEngine::new(
            DecisionPolicy::from_config(&config.autonomy),
            patterns.clone(),
        );
        let audit = AuditChain::open(core_db)?;
        Ok(Self::new(
            tiers,
            patterns,
            checker,
            engine,
            RequestSigner::new(key),
            audit,
            transport,
        )
        .with_time_saved(config.audit.clone()))
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_time_saved(mut self, config: AuditConfig) -> Self {
        self.time_saved = config;
        self
    }

    pub fn tiers(&self) -> &TierStore {
        &self.tiers
    }

    pub fn audit(&self) -> &AuditChain {
        &self.audit
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub async fn health(&self) -> Result<()> {
        self.transport.ping().await
    }

    /// Decide and, where policy allows, execute.
    ///
    /// A denied action is audited and returned as [`WardError::PolicyDenied`].
    pub async fn submit(&self, intent: ActionIntent) -> Result<SubmitOutcome> {
        let request = ActionRequest::new(&intent.action, intent.payload, &intent.domain);
        let boundaries = self
            .checker
            .check(&request.action, &request.payload, intent.llm_confidence);
        let tiers = self.tiers.snapshot()?;
        let decision = self
            .engine
            .decide(&tiers, &request.action, &intent.domain, &boundaries);

        info!(
            request_id = %request.id,
            action = %request.action,
            domain = %intent.domain,
            tier = %decision.tier,
            outcome = %decision.outcome,
            boundaries = boundaries.len(),
            "action decided"
        );
        self.events.publish(Event::ActionDecided {
            request_id: request.id.clone(),
            action: request.action.clone(),
            outcome: decision.outcome.to_string(),
        });

        match decision.outcome {
            Outcome::Denied => {
                self.record_decision(&request, &decision, &boundaries, ActionStatus::Rejected)?;
                Err(WardError::PolicyDenied {
                    action: request.action,
                    reason: decision.reason,
                })
            }
            Outcome::RequiresApproval => {
                self.record_decision(&request, &decision, &boundaries, ActionStatus::Pending)?;
                let reason = boundaries
                    .iter()
                    .map(|b| b.reason.as_str())
                    .collect::<Vec<_>>()
                    .join("; ");
                self.events.publish(Event::ApprovalRequested {
                    request_id: request.id.clone(),
                    action: request.action.clone(),
                    reason: if reason.is_empty() {
                        decision.reason.clone()
                    } else {
                        reason
                    },
                });
                let pending = PendingApproval {
                    request,
                    decision,
                    boundaries,
                    queued_at: now_iso(),
                };
                self.pending
                    .lock()
                    .insert(pending.request.id.clone(), pending.clone());
                Ok(SubmitOutcome::PendingApproval(pending))
            }
            Outcome::AutoExecute => {
                let response = self.dispatch(request, Some(&decision)).await?;
                Ok(SubmitOutcome::Executed(response))
            }
        }
    }

    /// Approve a queued action: remember the approval, then execute it.
    pub async fn approve(&self, request_id: &str) -> Result<ActionResponse> {
        let pending = self.take_pending(request_id)?;
        let action = pending.request.action.clone();

        // The domain may have been disabled while the request sat in the queue.
        if self.tiers.snapshot()?.is_disabled(&pending.request.source_domain) {
            let denied = Decision {
                outcome: Outcome::Denied,
                tier: pending.decision.tier,
                reason: format!("domain '{}' is disabled", pending.request.source_domain),
            };
            self.record_decision(&pending.request, &denied, &[], ActionStatus::Rejected)?;
            return Err(WardError::PolicyDenied {
                action,
                reason: denied.reason,
            });
        }

        let pattern = self.patterns.record_approval(&action)?;
        info!(
            request_id,
            action = %action,
            consecutive = pattern.consecutive_approvals,
            "action approved"
        );
        self.events.publish(Event::ApprovalGranted {
            request_id: request_id.to_string(),
        });
        self.dispatch(pending.request, None).await
    }

    /// Reject a queued action. The rejection is audited and resets the
    /// action type's approval streak.
    pub fn reject(&self, request_id: &str) -> Result<ActionResponse> {
        let pending = self.take_pending(request_id)?;
        let request = &pending.request;
        self.patterns.record_rejection(&request.action)?;

        let mut response =
            ActionResponse::error(&request.id, ActionStatus::Rejected, "rejected by operator");
        let entry = NewAuditEntry::new(
            &request.id,
            &request.action,
            Direction::Response,
            ActionStatus::Rejected,
        )
        .with_signature(payload_hash(&request.payload), "")
        .with_metadata(json!({ "stage": "approval", "error": response.error }));
        response.audit_ref = self.append(entry)?.id;

        info!(request_id, action = %request.action, "action rejected by operator");
        self.events.publish(Event::ApprovalDenied {
            request_id: request_id.to_string(),
        });
        Ok(response)
    }

    /// Queued approvals, oldest first.
    pub fn pending(&self) -> Vec<PendingApproval> {
        let mut queued: Vec<PendingApproval> = self.pending.lock().values().cloned().collect();
        queued.sort_by(|a, b| a.queued_at.cmp(&b.queued_at));
        queued
    }

    fn take_pending(&self, request_id: &str) -> Result<PendingApproval> {
        self.pending
            .lock()
            .remove(request_id)
            .ok_or_else(|| WardError::NotFound(format!("pending approval '{request_id}'")))
    }

    /// Sign, audit, send, audit. Both audit writes must land before the
    /// response is reported.
    async fn dispatch(
        &self,
        request: ActionRequest,
        decision: Option<&Decision>,
    ) -> Result<ActionResponse> {
        let signed = self.signer.sign(request);
        let request = &signed.request;

        let mut metadata = json!({ "stage": "dispatch" });
        if let Some(decision) = decision {
            metadata["decision"] = decision_metadata(decision, &[]);
        }
        let request_entry = NewAuditEntry::new(
            &request.id,
            &request.action,
            Direction::Request,
            ActionStatus::Pending,
        )
        .with_signature(&signed.payload_hash, &signed.signature)
        .with_metadata(metadata);
        self.append(request_entry)?;

        let response = match self.transport.send(signed.to_ipc()).await {
            Ok(response) => response,
            Err(e) => {
                warn!(request_id = %request.id, error = %e, "gateway unreachable");
                ActionResponse::error(&request.id, ActionStatus::Error, e.to_string())
            }
        };

        let saved = if response.is_success() {
            self.time_saved.time_saved_for(&request.action)
        } else {
            0
        };
        let response_entry = NewAuditEntry::new(
            &request.id,
            &request.action,
            Direction::Response,
            response.status,
        )
        .with_signature(&signed.payload_hash, &signed.signature)
        .with_metadata(json!({
            "gateway_audit_ref": response.audit_ref,
            "error": response.error,
            "retry_after_ms": response.retry_after_ms,
        }))
        .with_time_saved(saved);
        self.append(response_entry)?;

        info!(
            request_id = %request.id,
            action = %request.action,
            status = %response.status,
            "action dispatched"
        );
        Ok(response)
    }

    fn record_decision(
        &self,
        request: &ActionRequest,
        decision: &Decision,
        boundaries: &[EscalationBoundary],
        status: ActionStatus,
    ) -> Result<AuditEntry> {
        let entry = NewAuditEntry::new(&request.id, &request.action, Direction::Request, status)
            .with_signature(payload_hash(&request.payload), "")
            .with_metadata(json!({
                "stage": "decision",
                "decision": decision_metadata(decision, boundaries),
            }));
        self.append(entry)
    }

    fn append(&self, entry: NewAuditEntry) -> Result<AuditEntry> {
        let request_id = entry.request_id.clone();
        match self.audit.append(entry) {
            Ok(stored) => {
                self.events.publish(Event::AuditAppended {
                    entry_id: stored.id.clone(),
                    chain_hash: stored.chain_hash.clone(),
                });
                Ok(stored)
            }
            Err(e) => {
                error!(request_id = %request_id, error = %e, "audit append failed");
                self.events.publish(Event::AuditWriteFailed {
                    request_id,
                    error: e.to_string(),
                });
                Err(match e {
                    WardError::AuditWriteFailure(_) => e,
                    other => WardError::AuditWriteFailure(other.to_string()),
                })
            }
        }
    }
}

fn payload_hash(payload: &Payload) -> String {
    sha256_hex(canonical_json(payload))
}

fn decision_metadata(decision: &Decision, boundaries: &[EscalationBoundary]) -> Value {
    json!({
        "outcome": decision.outcome.as_str(),
        "tier": decision.tier.as_str(),
        "reason": decision.reason,
        "boundaries": boundaries,
    })
}
