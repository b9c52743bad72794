use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Payload;

/// The network endpoint an adapter will contact for a given action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub domain: String,
    #[serde(default)]
    pub port: Option<u16>,
}

impl Endpoint {
    pub fn new(domain: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            domain: domain.into(),
            port,
        }
    }
}

/// What a service adapter reports back after executing an action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AdapterOutcome {
    pub fn ok(data: Option<Value>) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Contract for the Gateway-side adapters that talk to external services
/// (IMAP/SMTP, CalDAV, cloud storage, …).
///
/// Adapters are only invoked after signature, rate-limit and allowlist checks
/// have passed.
#[async_trait]
pub trait ServiceAdapter: Send + Sync {
    /// Action namespace this adapter serves, e.g. "email" for "email.send".
    fn namespace(&self) -> &str;

    /// The host and port the adapter would connect to for this action.
    /// `None` means the adapter cannot service the action.
    fn endpoint(&self, action: &str, payload: &Payload) -> Option<Endpoint>;

    /// Perform the action.
    async fn execute(&self, action: &str, payload: &Payload) -> AdapterOutcome;
}
