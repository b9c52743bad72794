use serde_json::json;
use tracing::{debug, error, info, warn};
use ward_audit::{AuditChain, AuditEntry, NewAuditEntry, RequestSigner, canonical_json, sha256_hex};
use ward_core::{
    ActionResponse, ActionStatus, Direction, Event, EventBus, IpcEnvelope, Result, WardError,
};

use crate::allowlist::Allowlist;
use crate::ratelimit::SlidingWindowLimiter;
use crate::registry::AdapterRegistry;

/// The Gateway's per-request pipeline: audit, verify, admit, execute, audit.
///
/// Nothing is executed unless the request entry was written, and no result is
/// returned as successful unless the response entry was written too.
pub struct Gateway {
    signer: RequestSigner,
    limiter: SlidingWindowLimiter,
    allowlist: Allowlist,
    adapters: AdapterRegistry,
    audit: AuditChain,
    events: EventBus,
}

impl Gateway {
    pub fn new(
        signer: RequestSigner,
        limiter: SlidingWindowLimiter,
        allowlist: Allowlist,
        adapters: AdapterRegistry,
        audit: AuditChain,
    ) -> Self {
        Self {
            signer,
            limiter,
            allowlist,
            adapters,
            audit,
            events: EventBus::default(),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn limiter(&self) -> &SlidingWindowLimiter {
        &self.limiter
    }

    pub fn allowlist(&self) -> &Allowlist {
        &self.allowlist
    }

    pub fn audit(&self) -> &AuditChain {
        &self.audit
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub async fn handle(&self, envelope: IpcEnvelope) -> ActionResponse {
        let payload_hash = sha256_hex(canonical_json(&envelope.payload));

        let request_entry = NewAuditEntry::new(
            &envelope.id,
            &envelope.action,
            Direction::Request,
            ActionStatus::Pending,
        )
        .with_signature(&payload_hash, &envelope.signature)
        .with_metadata(json!({ "source": envelope.source }));
        if let Err(e) = self.append(request_entry) {
            return ActionResponse::error(&envelope.id, ActionStatus::Error, e.to_string());
        }

        let response = self.enforce_and_execute(&envelope).await;
        self.finish(&envelope, &payload_hash, response)
    }

    async fn enforce_and_execute(&self, envelope: &IpcEnvelope) -> ActionResponse {
        let id = envelope.id.as_str();
        let action = envelope.action.as_str();

        if !self.signer.verify_envelope(envelope) {
            warn!(request_id = id, action, "signature verification failed");
            self.events.publish(Event::SignatureRejected {
                request_id: id.to_string(),
            });
            let err = WardError::SignatureInvalid {
                request_id: id.to_string(),
            };
            return ActionResponse::error(id, ActionStatus::Rejected, err.to_string());
        }

        let admission = self.limiter.try_acquire(action);
        if !admission.allowed {
            info!(request_id = id, action, retry_after_ms = admission.retry_after_ms, scope = ?admission.scope, "rate limited");
            self.events.publish(Event::RateLimited {
                request_id: id.to_string(),
                action: action.to_string(),
                retry_after_ms: admission.retry_after_ms,
            });
            return ActionResponse::rate_limited(id, admission.retry_after_ms);
        }

        let Some(adapter) = self.adapters.resolve(action) else {
            self.limiter.release(action);
            warn!(request_id = id, action, "no adapter for action");
            return ActionResponse::error(
                id,
                ActionStatus::Rejected,
                format!("no adapter serves '{action}'"),
            );
        };
        let Some(endpoint) = adapter.endpoint(action, &envelope.payload) else {
            self.limiter.release(action);
            return ActionResponse::error(
                id,
                ActionStatus::Rejected,
                format!("adapter '{}' cannot resolve an endpoint for '{action}'", adapter.namespace()),
            );
        };
        if !self.allowlist.is_allowed(&endpoint.domain, endpoint.port) {
            self.limiter.release(action);
            warn!(request_id = id, domain = %endpoint.domain, port = ?endpoint.port, "domain not on allowlist");
            self.events.publish(Event::DomainBlocked {
                request_id: id.to_string(),
                domain: endpoint.domain.clone(),
                port: endpoint.port,
            });
            let err = WardError::DomainNotAllowed {
                domain: endpoint.domain,
                port: endpoint.port,
            };
            return ActionResponse::error(id, ActionStatus::Rejected, err.to_string());
        }

        debug!(request_id = id, action, domain = %endpoint.domain, "executing action");
        let outcome = adapter.execute(action, &envelope.payload).await;
        if outcome.success {
            ActionResponse::success(id, outcome.data)
        } else {
            let err = WardError::Adapter {
                action: action.to_string(),
                reason: outcome.error.unwrap_or_else(|| "adapter reported failure".into()),
            };
            ActionResponse::error(id, ActionStatus::Error, err.to_string())
        }
    }

    fn finish(
        &self,
        envelope: &IpcEnvelope,
        payload_hash: &str,
        mut response: ActionResponse,
    ) -> ActionResponse {
        let entry = NewAuditEntry::new(
            &envelope.id,
            &envelope.action,
            Direction::Response,
            response.status,
        )
        .with_signature(payload_hash, &envelope.signature)
        .with_metadata(json!({
            "error": response.error,
            "retry_after_ms": response.retry_after_ms,
        }));
        match self.append(entry) {
            Ok(stored) => {
                response.audit_ref = stored.id;
                info!(
                    request_id = %envelope.id,
                    action = %envelope.action,
                    status = %response.status,
                    "action handled"
                );
                self.events.publish(Event::ActionCompleted {
                    request_id: envelope.id.clone(),
                    action: envelope.action.clone(),
                    status: response.status,
                });
                response
            }
            Err(e) => ActionResponse::error(&envelope.id, ActionStatus::Error, e.to_string()),
        }
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
