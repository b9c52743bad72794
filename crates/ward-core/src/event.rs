use serde::{Deserialize, Serialize};

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::types::ActionStatus;

/// Pipeline events: what the UI and status surfaces subscribe to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    // ── Core decisions ─────────────────────────────────────────
    ActionDecided {
        request_id: String,
        action: String,
        outcome: String,
    },
    ApprovalRequested {
        request_id: String,
        action: String,
        reason: String,
    },
    ApprovalGranted {
        request_id: String,
    },
    ApprovalDenied {
        request_id: String,
    },

    // ── Gateway enforcement ────────────────────────────────────
    SignatureRejected {
        request_id: String,
    },
    RateLimited {
        request_id: String,
        action: String,
        retry_after_ms: u64,
    },
    DomainBlocked {
        request_id: String,
        domain: String,
        port: Option<u16>,
    },
    ActionCompleted {
        request_id: String,
        action: String,
        status: ActionStatus,
    },

    // ── Audit ──────────────────────────────────────────────────
    AuditAppended {
        entry_id: String,
        chain_hash: String,
    },
    AuditWriteFailed {
        request_id: String,
        error: String,
    },
}

/// A broadcast-based event bus for pipeline pub/sub.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<Event>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn publish(&self, event: Event) {
        // Ignore send errors (no subscribers).
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
