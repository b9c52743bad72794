use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use ward_core::{AdapterOutcome, Endpoint, Payload, ServiceAdapter, action_namespace};

/// Service adapters keyed by action namespace.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn ServiceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn ServiceAdapter>) {
        let namespace = adapter.namespace().to_string();
        info!(namespace = %namespace, "adapter registered");
        self.adapters.insert(namespace, adapter);
    }

    /// The adapter serving `action`'s namespace.
    pub fn resolve(&self, action: &str) -> Option<Arc<dyn ServiceAdapter>> {
        self.adapters.get(action_namespace(action)).cloned()
    }

    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Resolves the endpoint from the payload's `host`/`port` fields and reports
/// success without touching the network. Used by `ward gateway --dry-run`.
pub struct DryRunAdapter {
    namespace: String,
}

impl DryRunAdapter {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }
}

#[async_trait]
impl ServiceAdapter for DryRunAdapter {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn endpoint(&self, _action: &str, payload: &Payload) -> Option<Endpoint> {
        let host = payload.get("host")?.as_str()?;
        let port = payload
            .get("port")
            .and_then(|p| p.as_u64())
            .and_then(|p| u16::try_from(p).ok());
        Some(Endpoint::new(host, port))
    }

    async fn execute(&self, action: &str, _payload: &Payload) -> AdapterOutcome {
        AdapterOutcome::ok(Some(serde_json::json!({ "dry_run": true, "action": action })))
    }
}
