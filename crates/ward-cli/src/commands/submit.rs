use console::style;
use std::sync::Arc;

use ward_audit::SigningKey;
use ward_config::ConfigLoader;
use ward_core::{ActionResponse, ActionStatus, Payload, Result, WardError};
use ward_runtime::{ActionIntent, IpcClient, Orchestrator, PendingApproval, SubmitOutcome};

use super::data_file;

pub(super) struct SubmitArgs {
    pub action: String,
    pub domain: String,
    pub payload: String,
    pub confidence: Option<f64>,
    pub approve: bool,
}

pub(super) async fn cmd_submit(config_loader: &ConfigLoader, args: SubmitArgs) -> Result<()> {
    let config = config_loader.get();
    let key = SigningKey::load(&config.signing)?;
    let core_db = data_file(config_loader, &config.storage.core_db_path)?;
    let socket_path = config_loader.data_path(&config.ipc.socket_path);
    let client = IpcClient::from_config(&config.ipc, socket_path);

    let core = Orchestrator::open(&config, &core_db, &key, Arc::new(client))?;

    let payload: Payload = serde_json::from_str(&args.payload)?;
    let action = args.action.clone();
    let mut intent = ActionIntent::new(args.action, args.domain, payload);
    if let Some(confidence) = args.confidence {
        intent = intent.with_confidence(confidence);
    }

    let response = match core.submit(intent).await? {
        SubmitOutcome::Executed(response) => response,
        SubmitOutcome::PendingApproval(pending) => {
            print_pending(&pending);
            if !args.approve {
                println!(
                    "   Not executed. Re-run with {} to approve.",
                    style("--approve").bold()
                );
                return Err(WardError::ApprovalRequired {
                    action: pending.request.action,
                    reason: pending.decision.reason,
                });
            }
            println!("   Approved by operator, dispatching...");
            core.approve(&pending.request.id).await?
        }
    };
    print_response(&response);
    response_result(&action, &response)
}

/// Turn a non-success Gateway response into the matching error so the exit
/// code reflects it. Rate limiting stays retryable.
fn response_result(action: &str, response: &ActionResponse) -> Result<()> {
    let reason = response.error.clone().unwrap_or_default();
    match response.status {
        ActionStatus::Success => Ok(()),
        ActionStatus::RateLimited => Err(WardError::RateLimited {
            action: action.to_string(),
            retry_after_ms: response.retry_after_ms.unwrap_or(0),
        }),
        status => Err(WardError::GatewayFailed {
            action: action.to_string(),
            status,
            reason,
        }),
    }
}

fn print_pending(pending: &PendingApproval) {
    println!(
        "{} {} ({})",
        style("APPROVAL REQUIRED").yellow().bold(),
        pending.request.action,
        pending.request.id
    );
    println!("   Tier: {}", pending.decision.tier);
    println!("   Reason: {}", pending.decision.reason);
    for boundary in &pending.boundaries {
        println!(
            "   - [{:?}] {}: {}",
            boundary.severity, boundary.kind, boundary.reason
        );
    }
}

fn print_response(response: &ActionResponse) {
    let status = if response.is_success() {
        style(response.status.as_str()).green()
    } else {
        style(response.status.as_str()).red()
    };
    println!("{} {}", status, response.request_id);
    if let Some(ref data) = response.data {
        println!("   Data: {data}");
    }
    if let Some(ref error) = response.error {
        println!("   Error: {error}");
    }
    if let Some(retry) = response.retry_after_ms {
        println!("   Retry after: {retry}ms");
    }
    if !response.audit_ref.is_empty() {
        println!("   Gateway audit ref: {}", response.audit_ref);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_is_ok() {
        let response = ActionResponse::success("req-1", None);
        assert!(response_result("email.fetch", &response).is_ok());
    }

    #[test]
    fn test_rate_limited_is_retryable() {
        let response = ActionResponse::rate_limited("req-1", 1_500);
        let err = response_result("email.send", &response).unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(
            err,
            WardError::RateLimited { ref action, retry_after_ms: 1_500 } if action == "email.send"
        ));
    }

    #[test]
    fn test_rejected_is_not_retryable() {
        let response = ActionResponse::error(
            "req-1",
            ActionStatus::Rejected,
            "domain not allowed: smtp.gmail.com (port Some(465))",
        );
        let err = response_result("email.send", &response).unwrap_err();
        assert!(!err.is_retryable());
        match err {
            WardError::GatewayFailed { status, reason, .. } => {
                assert_eq!(status, ActionStatus::Rejected);
                assert!(reason.contains("smtp.gmail.com"));
            }
            other => panic!("unexpected error {other}"),
        }
    }
}
