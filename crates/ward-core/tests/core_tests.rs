#[cfg(test)]
mod tests {
    use ward_core::*;

    // ── Type tests ─────────────────────────────────────────────

    #[test]
    fn test_action_request_new_generates_unique_ids() {
        let a = ActionRequest::new("email.send", serde_json::json!({}), "email");
        let b = ActionRequest::new("email.send", serde_json::json!({}), "email");
        assert_ne!(a.id, b.id);
        assert_eq!(a.source_domain, "email");
        assert!(a.timestamp.ends_with('Z'));
    }

    #[test]
    fn test_action_namespace() {
        assert_eq!(action_namespace("email.send"), "email");
        assert_eq!(action_namespace("service.api_call"), "service");
        assert_eq!(action_namespace("standalone"), "standalone");
    }

    #[test]
    fn test_status_wire_names() {
        let json = serde_json::to_string(&ActionStatus::RateLimited).unwrap();
        assert_eq!(json, "\"rate_limited\"");
        assert_eq!("rate_limited".parse::<ActionStatus>().unwrap(), ActionStatus::RateLimited);
        assert!("bogus".parse::<ActionStatus>().is_err());
        assert_eq!(ActionStatus::Pending.to_string(), "pending");
    }

    #[test]
    fn test_direction_roundtrip_str() {
        for d in [Direction::Request, Direction::Response] {
            assert_eq!(d.as_str().parse::<Direction>().unwrap(), d);
        }
    }

    #[test]
    fn test_signed_envelope_to_ipc() {
        let request = ActionRequest::new(
            "calendar.create",
            serde_json::json!({"title": "standup"}),
            "calendar",
        );
        let envelope = SignedEnvelope {
            request: request.clone(),
            payload_hash: "ab".repeat(32),
            signature: "cd".repeat(32),
        };
        let ipc = envelope.to_ipc();
        assert_eq!(ipc.id, request.id);
        assert_eq!(ipc.timestamp, request.timestamp);
        assert_eq!(ipc.source, "calendar");
        assert_eq!(ipc.signature, "cd".repeat(32));
        assert_eq!(ipc.payload["title"], "standup");
    }

    #[test]
    fn test_rate_limited_response() {
        let resp = ActionResponse::rate_limited("req-1", 1500);
        assert_eq!(resp.status, ActionStatus::RateLimited);
        assert_eq!(resp.retry_after_ms, Some(1500));
        assert!(resp.error.unwrap().contains("1500"));
        assert!(resp.audit_ref.is_empty());
    }

    #[test]
    fn test_response_skips_empty_optionals() {
        let resp = ActionResponse::success("req-2", None);
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("data").is_none());
        assert!(json.get("error").is_none());
        assert_eq!(json["status"], "success");
    }

    // ── Error tests ────────────────────────────────────────────

    #[test]
    fn test_error_rate_limited_is_retryable() {
        let err = WardError::RateLimited {
            action: "email.send".into(),
            retry_after_ms: 30_000,
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("30000"));
    }

    #[test]
    fn test_policy_errors_not_retryable() {
        let denied = WardError::PolicyDenied {
            action: "finance.transfer".into(),
            reason: "domain disabled".into(),
        };
        let sig = WardError::SignatureInvalid {
            request_id: "r".into(),
        };
        let domain = WardError::DomainNotAllowed {
            domain: "evil.example".into(),
            port: Some(443),
        };
        assert!(!denied.is_retryable());
        assert!(!sig.is_retryable());
        assert!(!domain.is_retryable());
        assert!(domain.to_string().contains("evil.example"));
    }

    #[test]
    fn test_gateway_failure_names_status() {
        let err = WardError::GatewayFailed {
            action: "email.send".into(),
            status: ActionStatus::Rejected,
            reason: "signature invalid for request r".into(),
        };
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "gateway returned rejected for email.send: signature invalid for request r"
        );
    }

    #[test]
    fn test_error_from_serde() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{nope").unwrap_err();
        let err: WardError = parse_err.into();
        assert!(matches!(err, WardError::Serialization(_)));
    }

    // ── Event bus tests ────────────────────────────────────────

    #[tokio::test]
    async fn test_event_bus_delivers() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(Event::ApprovalGranted {
            request_id: "r1".into(),
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            Event::ApprovalGranted {
                request_id: "r1".into()
            }
        );
    }

    #[test]
    fn test_event_bus_without_subscribers() {
        let bus = EventBus::default();
        bus.publish(Event::SignatureRejected {
            request_id: "r2".into(),
        });
    }

    // ── IPC framing tests ──────────────────────────────────────

    #[tokio::test]
    async fn test_ipc_roundtrip_over_duplex() {
        use ward_core::ipc::{framed, recv_message, send_message};

        let (a, b) = tokio::io::duplex(64 * 1024);
        let mut client = framed(a, 1024 * 1024);
        let mut server = framed(b, 1024 * 1024);

        let request = ActionRequest::new("email.fetch", serde_json::json!({"folder": "INBOX"}), "email");
        let envelope = IpcEnvelope {
            id: request.id.clone(),
            timestamp: request.timestamp.clone(),
            action: request.action.clone(),
            payload: request.payload.clone(),
            source: request.source_domain.clone(),
            signature: "ab".repeat(32),
        };
        send_message(&mut client, &IpcMessage::Action(envelope.clone()))
            .await
            .unwrap();
        send_message(&mut client, &IpcMessage::Ping).await.unwrap();

        assert_eq!(
            recv_message(&mut server).await.unwrap(),
            Some(IpcMessage::Action(envelope))
        );
        assert_eq!(recv_message(&mut server).await.unwrap(), Some(IpcMessage::Ping));

        drop(client);
        assert_eq!(recv_message(&mut server).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ipc_oversized_frame_is_error() {
        use ward_core::ipc::{framed, recv_message, send_message};

        let (a, b) = tokio::io::duplex(64 * 1024);
        let mut client = framed(a, 1024 * 1024);
        let mut server = framed(b, 16);

        let response = ActionResponse::success("r1", Some(serde_json::json!({"big": "x".repeat(100)})));
        send_message(&mut client, &IpcMessage::Response(response))
            .await
            .unwrap();
        assert!(matches!(
            recv_message(&mut server).await,
            Err(WardError::Ipc(_))
        ));
    }

    #[test]
    fn test_ipc_message_wire_shape() {
        let json = serde_json::to_value(IpcMessage::Ping).unwrap();
        assert_eq!(json["type"], "ping");
    }
}
