#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use ward_audit::{AuditChain, RequestSigner, SigningKey};
    use ward_autonomy::{
        ApprovalPatternStore, AutonomyEngine, AutonomyTier, DecisionPolicy,
        EscalationBoundaryChecker, SqlitePatternStore, TierStore,
    };
    use ward_config::{AutonomyConfig, EscalationConfig};
    use ward_core::*;
    use ward_gateway::{
        AdapterRegistry, Allowlist, DryRunAdapter, Gateway, NewService, RateLimitConfig,
        SlidingWindowLimiter,
    };
    use ward_runtime::*;

    fn key() -> SigningKey {
        SigningKey::from_bytes(vec![7; 32]).unwrap()
    }

    /// Runs the Gateway pipeline in-process instead of over a socket.
    struct InProcess {
        gateway: Arc<Gateway>,
        sent: AtomicUsize,
    }

    #[async_trait]
    impl GatewayTransport for InProcess {
        async fn send(&self, envelope: IpcEnvelope) -> Result<ActionResponse> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(self.gateway.handle(envelope).await)
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }
    }

    struct Unreachable;

    #[async_trait]
    impl GatewayTransport for Unreachable {
        async fn send(&self, _envelope: IpcEnvelope) -> Result<ActionResponse> {
            Err(WardError::Ipc("connection refused".into()))
        }

        async fn ping(&self) -> Result<()> {
            Err(WardError::Ipc("connection refused".into()))
        }
    }

    fn gateway(gateway_key: &SigningKey) -> Arc<Gateway> {
        let allowlist = Allowlist::open_in_memory().unwrap();
        allowlist
            .add_service(NewService::new("gmail-imap", "imap.gmail.com", Some(993)))
            .unwrap();
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(DryRunAdapter::new("email")));
        Arc::new(Gateway::new(
            RequestSigner::new(gateway_key),
            SlidingWindowLimiter::new(RateLimitConfig::default()),
            allowlist,
            registry,
            AuditChain::open_in_memory().unwrap(),
        ))
    }

    struct Harness {
        core: Orchestrator,
        patterns: Arc<SqlitePatternStore>,
        transport: Arc<InProcess>,
    }

    fn harness_with_keys(core_key: &SigningKey, gateway_key: &SigningKey) -> Harness {
        let transport = Arc::new(InProcess {
            gateway: gateway(gateway_key),
            sent: AtomicUsize::new(0),
        });
        let (core, patterns) = orchestrator(core_key, transport.clone());
        Harness {
            core,
            patterns,
            transport,
        }
    }

    fn harness() -> Harness {
        harness_with_keys(&key(), &key())
    }

    fn orchestrator(
        core_key: &SigningKey,
        transport: Arc<dyn GatewayTransport>,
    ) -> (Orchestrator, Arc<SqlitePatternStore>) {
        orchestrator_on(core_key, transport, AuditChain::open_in_memory().unwrap())
    }

    fn orchestrator_on(
        core_key: &SigningKey,
        transport: Arc<dyn GatewayTransport>,
        audit: AuditChain,
    ) -> (Orchestrator, Arc<SqlitePatternStore>) {
        let tiers = TierStore::open_in_memory().unwrap();
        tiers.set_domain_tier("email", AutonomyTier::AlterEgo).unwrap();
        let patterns = Arc::new(SqlitePatternStore::open_in_memory().unwrap());
        let store: Arc<dyn ApprovalPatternStore> = patterns.clone();
        let checker = EscalationBoundaryChecker::new(&EscalationConfig::default(), store.clone())
            .unwrap();
        let engine = AutonomyEngine::new(DecisionPolicy::from_config(&AutonomyConfig::default()), store.clone());
        let core = Orchestrator::new(
            tiers,
            store,
            checker,
            engine,
            RequestSigner::new(core_key),
            audit,
            transport,
        );
        (core, patterns)
    }

    fn fetch_intent() -> ActionIntent {
        ActionIntent::new(
            "email.fetch",
            "email",
            json!({"host": "imap.gmail.com", "port": 993, "folder": "INBOX"}),
        )
    }

    mod submit {
        use super::*;

        #[tokio::test]
        async fn test_known_action_auto_executes() {
            let h = harness();
            h.patterns.record_approval("email.fetch").unwrap();

            let outcome = h.core.submit(fetch_intent()).await.unwrap();
            let SubmitOutcome::Executed(response) = outcome else {
                panic!("expected execution, got {outcome:?}");
            };
            assert!(response.is_success());
            assert_eq!(response.data.unwrap()["dry_run"], json!(true));
            assert_eq!(h.transport.sent.load(Ordering::SeqCst), 1);

            let entries = h.core.audit().for_request(&response.request_id).unwrap();
            assert_eq!(entries.len(), 2);
            assert_eq!(entries[1].status, ActionStatus::Success);
            assert_eq!(entries[1].estimated_time_saved_seconds, 30);
            assert_eq!(
                entries[1].metadata["gateway_audit_ref"],
                json!(response.audit_ref)
            );
        }

        #[tokio::test]
        async fn test_first_time_action_waits_for_approval() {
            let h = harness();
            let outcome = h.core.submit(fetch_intent()).await.unwrap();
            let SubmitOutcome::PendingApproval(pending) = outcome else {
                panic!("expected approval, got {outcome:?}");
            };
            assert_eq!(pending.boundaries.len(), 1);
            assert_eq!(pending.boundaries[0].kind.as_str(), "novel");
            assert_eq!(h.transport.sent.load(Ordering::SeqCst), 0);
            assert_eq!(h.core.pending().len(), 1);

            let entries = h.core.audit().for_request(&pending.request.id).unwrap();
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].status, ActionStatus::Pending);
            assert_eq!(entries[0].metadata["decision"]["outcome"], json!("requires_approval"));
        }

        #[tokio::test]
        async fn test_financial_boundary_beats_alter_ego() {
            let h = harness();
            h.patterns.record_approval("email.send").unwrap();
            let intent = ActionIntent::new(
                "email.send",
                "email",
                json!({"to": "landlord@example.com", "amount": 1200}),
            )
            .with_confidence(0.95);
            let outcome = h.core.submit(intent).await.unwrap();
            assert!(matches!(outcome, SubmitOutcome::PendingApproval(_)));
        }

        #[tokio::test]
        async fn test_disabled_domain_denied_and_audited() {
            let h = harness();
            h.core.tiers().disable_domain("email").unwrap();
            h.patterns.record_approval("email.fetch").unwrap();

            let err = h.core.submit(fetch_intent()).await.unwrap_err();
            assert!(matches!(err, WardError::PolicyDenied { .. }));
            assert_eq!(h.transport.sent.load(Ordering::SeqCst), 0);

            let log = h.core.audit().get_entries(None).unwrap();
            assert_eq!(log.len(), 1);
            assert_eq!(log[0].status, ActionStatus::Rejected);
        }

        #[tokio::test]
        async fn test_unreachable_gateway_is_audited_error() {
            let (core, patterns) = orchestrator(&key(), Arc::new(Unreachable));
            patterns.record_approval("email.fetch").unwrap();
            let outcome = core.submit(fetch_intent()).await.unwrap();
            let SubmitOutcome::Executed(response) = outcome else {
                panic!("expected dispatch");
            };
            assert_eq!(response.status, ActionStatus::Error);
            assert!(response.error.unwrap().contains("connection refused"));
            assert!(core.health().await.is_err());

            let entries = core.audit().for_request(&response.request_id).unwrap();
            assert_eq!(entries.len(), 2);
            assert_eq!(entries[1].estimated_time_saved_seconds, 0);
        }

        #[tokio::test]
        async fn test_key_mismatch_rejected_by_gateway() {
            let other = SigningKey::from_bytes(vec![8; 32]).unwrap();
            let h = harness_with_keys(&key(), &other);
            h.patterns.record_approval("email.fetch").unwrap();
            let SubmitOutcome::Executed(response) = h.core.submit(fetch_intent()).await.unwrap()
            else {
                panic!("expected dispatch");
            };
            assert_eq!(response.status, ActionStatus::Rejected);
        }
    }

    mod audit_failure {
        use super::*;

        /// Core chain on disk whose inserts matching `when` are aborted by a
        /// trigger installed through a second connection.
        fn failing_chain(dir: &tempfile::TempDir, when: &str) -> AuditChain {
            let path = dir.path().join("core.db");
            let audit = AuditChain::open(&path).unwrap();
            rusqlite::Connection::open(&path)
                .unwrap()
                .execute_batch(&format!(
                    "CREATE TRIGGER audit_log_full BEFORE INSERT ON audit_log
                     WHEN {when}
                     BEGIN SELECT RAISE(ABORT, 'disk full'); END;"
                ))
                .unwrap();
            audit
        }

        fn transport() -> Arc<InProcess> {
            Arc::new(InProcess {
                gateway: gateway(&key()),
                sent: AtomicUsize::new(0),
            })
        }

        #[tokio::test]
        async fn test_request_audit_failure_aborts_before_sending() {
            let dir = tempfile::tempdir().unwrap();
            let transport = transport();
            let (core, patterns) =
                orchestrator_on(&key(), transport.clone(), failing_chain(&dir, "1"));
            patterns.record_approval("email.fetch").unwrap();

            let err = core.submit(fetch_intent()).await.unwrap_err();
            assert!(matches!(err, WardError::AuditWriteFailure(_)));
            assert_eq!(transport.sent.load(Ordering::SeqCst), 0);
        }

        #[tokio::test]
        async fn test_response_audit_failure_is_not_reported_as_success() {
            let dir = tempfile::tempdir().unwrap();
            let transport = transport();
            let (core, patterns) = orchestrator_on(
                &key(),
                transport.clone(),
                failing_chain(&dir, "NEW.direction = 'response'"),
            );
            patterns.record_approval("email.fetch").unwrap();
            let mut rx = core.events().subscribe();

            let err = core.submit(fetch_intent()).await.unwrap_err();
            assert!(matches!(err, WardError::AuditWriteFailure(_)));
            assert_eq!(transport.sent.load(Ordering::SeqCst), 1);

            let mut saw_failure = false;
            while let Ok(event) = rx.try_recv() {
                if matches!(event, Event::AuditWriteFailed { .. }) {
                    saw_failure = true;
                }
            }
            assert!(saw_failure);
        }

        #[tokio::test]
        async fn test_decision_audit_failure_leaves_nothing_queued() {
            let dir = tempfile::tempdir().unwrap();
            let (core, _) = orchestrator_on(&key(), transport(), failing_chain(&dir, "1"));

            let err = core.submit(fetch_intent()).await.unwrap_err();
            assert!(matches!(err, WardError::AuditWriteFailure(_)));
            assert!(core.pending().is_empty());
        }
    }

    mod approval {
        use super::*;

        #[tokio::test]
        async fn test_approve_executes_and_learns() {
            let h = harness();
            let SubmitOutcome::PendingApproval(pending) =
                h.core.submit(fetch_intent()).await.unwrap()
            else {
                panic!("expected approval");
            };

            let response = h.core.approve(&pending.request.id).await.unwrap();
            assert!(response.is_success());
            assert_eq!(response.request_id, pending.request.id);
            assert!(h.core.pending().is_empty());

            let pattern = h.patterns.get("email.fetch").unwrap().unwrap();
            assert_eq!(pattern.consecutive_approvals, 1);

            // Now known: the next fetch runs unattended.
            let outcome = h.core.submit(fetch_intent()).await.unwrap();
            assert!(matches!(outcome, SubmitOutcome::Executed(_)));
            assert!(h.core.audit().verify().unwrap().valid);
        }

        #[tokio::test]
        async fn test_reject_is_audited_and_resets_streak() {
            let h = harness();
            h.patterns.record_approval("email.send").unwrap();
            let intent = ActionIntent::new("email.send", "email", json!({"amount": 900}));
            let SubmitOutcome::PendingApproval(pending) = h.core.submit(intent).await.unwrap()
            else {
                panic!("expected approval");
            };

            let response = h.core.reject(&pending.request.id).unwrap();
            assert_eq!(response.status, ActionStatus::Rejected);
            assert!(!response.audit_ref.is_empty());
            assert_eq!(h.transport.sent.load(Ordering::SeqCst), 0);

            let pattern = h.patterns.get("email.send").unwrap().unwrap();
            assert_eq!(pattern.consecutive_approvals, 0);
            assert_eq!(pattern.total_approvals, 1);

            let entries = h.core.audit().for_request(&pending.request.id).unwrap();
            assert_eq!(entries.len(), 2);
            assert_eq!(entries[1].id, response.audit_ref);
        }

        #[tokio::test]
        async fn test_resolving_twice_is_not_found() {
            let h = harness();
            let SubmitOutcome::PendingApproval(pending) =
                h.core.submit(fetch_intent()).await.unwrap()
            else {
                panic!("expected approval");
            };
            h.core.reject(&pending.request.id).unwrap();
            assert!(matches!(
                h.core.approve(&pending.request.id).await,
                Err(WardError::NotFound(_))
            ));
            assert!(matches!(h.core.reject("missing"), Err(WardError::NotFound(_))));
        }

        #[tokio::test]
        async fn test_domain_disabled_while_queued() {
            let h = harness();
            let SubmitOutcome::PendingApproval(pending) =
                h.core.submit(fetch_intent()).await.unwrap()
            else {
                panic!("expected approval");
            };
            h.core.tiers().disable_domain("email").unwrap();
            let err = h.core.approve(&pending.request.id).await.unwrap_err();
            assert!(matches!(err, WardError::PolicyDenied { .. }));
            assert_eq!(h.transport.sent.load(Ordering::SeqCst), 0);
            assert!(h.patterns.get("email.fetch").unwrap().is_none());
        }

        #[tokio::test]
        async fn test_events_follow_the_flow() {
            let h = harness();
            let mut rx = h.core.events().subscribe();
            let SubmitOutcome::PendingApproval(pending) =
                h.core.submit(fetch_intent()).await.unwrap()
            else {
                panic!("expected approval");
            };
            h.core.approve(&pending.request.id).await.unwrap();

            let mut kinds = Vec::new();
            while let Ok(event) = rx.try_recv() {
                kinds.push(match event {
                    Event::ActionDecided { .. } => "decided",
                    Event::ApprovalRequested { .. } => "requested",
                    Event::ApprovalGranted { .. } => "granted",
                    Event::AuditAppended { .. } => "audited",
                    _ => "other",
                });
            }
            let position = |k: &str| kinds.iter().position(|x| *x == k).unwrap();
            assert!(position("decided") < position("requested"));
            assert!(position("requested") < position("granted"));
        }
    }

    #[cfg(unix)]
    mod ipc {
        use super::*;
        use std::time::Duration;
        use ward_gateway::IpcServer;

        #[tokio::test]
        async fn test_client_round_trip_over_socket() {
            let dir = tempfile::tempdir().unwrap();
            let socket = dir.path().join("gateway.sock");
            let server = IpcServer::new(gateway(&key()), socket.clone(), 1 << 20);
            let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
            let task = tokio::spawn(server.serve(async {
                let _ = stop_rx.await;
            }));

            let client = IpcClient::new(socket.clone(), Duration::from_secs(5), 1 << 20);
            let mut ready = false;
            for _ in 0..50 {
                if client.ping().await.is_ok() {
                    ready = true;
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            assert!(ready);

            let (core, patterns) = orchestrator(&key(), Arc::new(client));
            patterns.record_approval("email.fetch").unwrap();
            let SubmitOutcome::Executed(response) = core.submit(fetch_intent()).await.unwrap()
            else {
                panic!("expected dispatch");
            };
            assert!(response.is_success());

            stop_tx.send(()).unwrap();
            task.await.unwrap().unwrap();
        }

        #[tokio::test]
        async fn test_missing_socket_is_ipc_error() {
            let dir = tempfile::tempdir().unwrap();
            let client = IpcClient::new(
                dir.path().join("absent.sock"),
                Duration::from_secs(1),
                1 << 20,
            );
            assert!(matches!(client.ping().await, Err(WardError::Ipc(_))));
        }
    }
}
