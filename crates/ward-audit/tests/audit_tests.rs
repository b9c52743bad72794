#[cfg(test)]
mod tests {
    use serde_json::json;
    use ward_audit::*;
    use ward_core::{ActionRequest, ActionStatus, Direction};

    fn key() -> SigningKey {
        SigningKey::from_bytes((0u8..32).collect()).unwrap()
    }

    fn request() -> ActionRequest {
        ActionRequest {
            id: "6f1c2d9e-0000-4000-8000-000000000001".into(),
            timestamp: "2026-03-01T09:30:00.000Z".into(),
            action: "email.send".into(),
            payload: json!({"to": "ana@example.com", "subject": "Lunch", "body": "Noon?"}),
            source_domain: "email".into(),
        }
    }

    // ── Signing ────────────────────────────────────────────────

    mod signing {
        use super::*;

        #[test]
        fn test_signature_is_deterministic() {
            let signer = RequestSigner::new(&key());
            let a = signer.sign(request());
            let b = signer.sign(request());
            assert_eq!(a.signature, b.signature);
            assert_eq!(a.payload_hash, b.payload_hash);
            assert_eq!(a.signature.len(), 64);
        }

        #[test]
        fn test_key_order_does_not_change_signature() {
            let signer = RequestSigner::new(&key());
            let mut reordered = request();
            reordered.payload = serde_json::from_str(
                r#"{"body": "Noon?", "subject": "Lunch", "to": "ana@example.com"}"#,
            )
            .unwrap();
            assert_eq!(signer.sign(request()).signature, signer.sign(reordered).signature);
        }

        #[test]
        fn test_verify_roundtrip_via_ipc() {
            let signer = RequestSigner::new(&key());
            let envelope = signer.sign(request()).to_ipc();
            assert!(signer.verify_envelope(&envelope));
            assert!(verify(
                &envelope.signature,
                &envelope.id,
                &envelope.timestamp,
                &envelope.action,
                &envelope.payload,
                &key()
            ));
        }

        #[test]
        fn test_wrong_key_fails() {
            let envelope = RequestSigner::new(&key()).sign(request()).to_ipc();
            let other = SigningKey::from_bytes(vec![7; 32]).unwrap();
            assert!(!RequestSigner::new(&other).verify_envelope(&envelope));
        }

        #[test]
        fn test_malformed_signatures_fail_without_panic() {
            let signer = RequestSigner::new(&key());
            let mut envelope = signer.sign(request()).to_ipc();
            let too_long = "0".repeat(66);
            for bad in ["", "zz", "abcd", too_long.as_str()] {
                envelope.signature = bad.to_string();
                assert!(!signer.verify_envelope(&envelope));
            }
        }

        #[test]
        fn test_tampered_payload_fails() {
            let signer = RequestSigner::new(&key());
            let mut envelope = signer.sign(request()).to_ipc();
            envelope.payload["to"] = json!("mallory@example.com");
            assert!(!signer.verify_envelope(&envelope));
        }
    }

    // ── Randomized tamper detection ────────────────────────────

    mod tamper {
        use super::*;
        use proptest::prelude::*;

        fn flip(s: &str, at: usize) -> String {
            let mut bytes = s.as_bytes().to_vec();
            let i = at % bytes.len();
            bytes[i] ^= 0x01;
            String::from_utf8(bytes).unwrap()
        }

        fn flip_hex(s: &str, at: usize) -> String {
            let mut chars: Vec<char> = s.chars().collect();
            let i = at % chars.len();
            chars[i] = if chars[i] == '0' { '1' } else { '0' };
            chars.into_iter().collect()
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(10_000))]

            #[test]
            fn prop_genuine_signature_verifies(
                key_bytes in proptest::collection::vec(any::<u8>(), 32..64),
                id in "[a-z0-9-]{1,36}",
                action in "[a-z]{1,10}\\.[a-z]{1,10}",
                text in any::<String>(),
                amount in any::<i64>(),
            ) {
                let key = SigningKey::from_bytes(key_bytes).unwrap();
                let signer = RequestSigner::new(&key);
                let request = ActionRequest {
                    id,
                    timestamp: "2026-01-01T00:00:00.000Z".into(),
                    action,
                    payload: json!({"text": text, "amount": amount, "nested": {"b": [1, 2], "a": null}}),
                    source_domain: "test".into(),
                };
                let envelope = signer.sign(request).to_ipc();
                prop_assert!(signer.verify_envelope(&envelope));
            }

            #[test]
            fn prop_single_byte_change_is_detected(
                key_bytes in proptest::collection::vec(any::<u8>(), 32..64),
                id in "[a-z0-9]{1,36}",
                action in "[a-z]{1,10}\\.[a-z]{1,10}",
                text in "[a-z0-9 ]{1,64}",
                field in 0usize..5,
                at in any::<usize>(),
            ) {
                let key = SigningKey::from_bytes(key_bytes).unwrap();
                let signer = RequestSigner::new(&key);
                let request = ActionRequest {
                    id,
                    timestamp: "2026-01-01T00:00:00.000Z".into(),
                    action,
                    payload: json!({"text": text.clone()}),
                    source_domain: "test".into(),
                };
                let mut envelope = signer.sign(request).to_ipc();
                match field {
                    0 => envelope.signature = flip_hex(&envelope.signature, at),
                    1 => envelope.id = flip(&envelope.id, at),
                    2 => envelope.timestamp = flip(&envelope.timestamp, at),
                    3 => envelope.action = flip(&envelope.action, at),
                    _ => envelope.payload = json!({"text": flip(&text, at)}),
                }
                prop_assert!(!signer.verify_envelope(&envelope));
            }
        }
    }

    // ── Audit chain ────────────────────────────────────────────

    mod chain {
        use super::*;
        use std::sync::Arc;

        fn entry(n: usize) -> NewAuditEntry {
            let status = if n % 2 == 0 {
                ActionStatus::Pending
            } else {
                ActionStatus::Success
            };
            let direction = if n % 2 == 0 {
                Direction::Request
            } else {
                Direction::Response
            };
            NewAuditEntry::new(format!("req-{}", n / 2), "email.send", direction, status)
                .with_signature(format!("hash-{n}"), format!("sig-{n}"))
                .with_time_saved(if n % 2 == 1 { 120 } else { 0 })
        }

        fn filled(n: usize) -> AuditChain {
            let chain = AuditChain::open_in_memory().unwrap();
            for i in 0..n {
                chain.append(entry(i)).unwrap();
            }
            chain
        }

        #[test]
        fn test_intact_chain_verifies() {
            let chain = filled(10);
            let result = chain.verify().unwrap();
            assert!(result.valid);
            assert_eq!(result.checked, 10);
            assert_eq!(result.broken_at_index, None);
        }

        #[test]
        fn test_empty_chain_is_valid() {
            assert!(verify_chain(&[]).valid);
        }

        #[test]
        fn test_modified_entry_breaks_at_its_index() {
            let entries = filled(10).get_entries(None).unwrap();
            for k in 0..entries.len() {
                let mut tampered = entries.clone();
                tampered[k].status = ActionStatus::Rejected;
                let result = verify_chain(&tampered);
                assert!(!result.valid);
                assert_eq!(result.broken_at_index, Some(k));
                assert_eq!(result.checked, k);
            }
        }

        #[test]
        fn test_removed_entry_breaks_chain() {
            let mut entries = filled(6).get_entries(None).unwrap();
            entries.remove(3);
            assert_eq!(verify_chain(&entries).broken_at_index, Some(3));
        }

        #[test]
        fn test_swapped_entries_break_chain() {
            let mut entries = filled(6).get_entries(None).unwrap();
            entries.swap(1, 2);
            assert_eq!(verify_chain(&entries).broken_at_index, Some(1));
        }

        #[test]
        fn test_forged_chain_hash_detected() {
            let mut entries = filled(4).get_entries(None).unwrap();
            entries[2].chain_hash = GENESIS_HASH.to_string();
            assert_eq!(verify_chain(&entries).broken_at_index, Some(2));
        }

        #[test]
        fn test_reappend_same_entry_is_idempotent() {
            let chain = AuditChain::open_in_memory().unwrap();
            let new = entry(0).with_id("fixed-id");
            let first = chain.append(new.clone()).unwrap();
            let second = chain.append(new).unwrap();
            assert_eq!(first, second);
            assert_eq!(chain.stats().unwrap().entry_count, 1);
        }

        #[test]
        fn test_conflicting_id_is_audit_failure() {
            let chain = AuditChain::open_in_memory().unwrap();
            chain.append(entry(0).with_id("fixed-id")).unwrap();
            let err = chain.append(entry(1).with_id("fixed-id")).unwrap_err();
            assert!(matches!(err, ward_core::WardError::AuditWriteFailure(_)));
        }

        #[test]
        fn test_get_entries_since() {
            let chain = filled(5);
            let all = chain.get_entries(None).unwrap();
            let after = chain.get_entries(Some(&all[1].id)).unwrap();
            assert_eq!(after.len(), 3);
            assert_eq!(after[0].id, all[2].id);
            assert!(chain.get_entries(Some("unknown")).unwrap().is_empty());
            assert!(chain.get_entries(Some(&all[4].id)).unwrap().is_empty());
        }

        #[test]
        fn test_query_is_newest_first_and_paginated() {
            let chain = filled(7);
            let all = chain.get_entries(None).unwrap();
            let page = chain.query(3, 0).unwrap();
            assert_eq!(page[0].id, all[6].id);
            assert_eq!(page.len(), 3);
            let last = chain.query(3, 6).unwrap();
            assert_eq!(last.len(), 1);
            assert_eq!(last[0].id, all[0].id);
        }

        #[test]
        fn test_stats_and_request_lookup() {
            let chain = filled(6);
            let stats = chain.stats().unwrap();
            assert_eq!(stats.entry_count, 6);
            assert_eq!(stats.total_time_saved_seconds, 360);
            assert!(stats.last_entry_at.is_some());

            let req = chain.for_request("req-1").unwrap();
            assert_eq!(req.len(), 2);
            assert_eq!(req[0].direction, Direction::Request);
            assert_eq!(req[1].direction, Direction::Response);
        }

        #[test]
        fn test_metadata_roundtrips() {
            let chain = AuditChain::open_in_memory().unwrap();
            chain
                .append(entry(0).with_metadata(json!({"decision": "auto_execute", "tier": "partner"})))
                .unwrap();
            let stored = chain.get_entries(None).unwrap();
            assert_eq!(stored[0].metadata["tier"], "partner");
        }

        #[test]
        fn test_concurrent_appends_keep_single_chain() {
            let chain = Arc::new(AuditChain::open_in_memory().unwrap());
            let handles: Vec<_> = (0..8)
                .map(|t| {
                    let chain = Arc::clone(&chain);
                    std::thread::spawn(move || {
                        for i in 0..25 {
                            chain.append(entry(t * 100 + i)).unwrap();
                        }
                    })
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }
            let result = chain.verify().unwrap();
            assert!(result.valid);
            assert_eq!(result.checked, 200);
        }

        #[test]
        fn test_two_handles_on_one_file_share_the_chain() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("core.db");
            let first = AuditChain::open(&path).unwrap();
            let second = AuditChain::open(&path).unwrap();

            let handles: Vec<_> = [first, second]
                .into_iter()
                .enumerate()
                .map(|(t, chain)| {
                    std::thread::spawn(move || {
                        (0..150)
                            .filter(|i| chain.append(entry(t * 1000 + i)).is_err())
                            .count()
                    })
                })
                .collect();
            let failed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
            assert_eq!(failed, 0);

            let chain = AuditChain::open(&path).unwrap();
            let result = chain.verify().unwrap();
            assert!(result.valid);
            assert_eq!(result.checked, 300);
        }

        #[test]
        fn test_chain_survives_reopen_and_rejects_raw_edits() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("core.db");
            let tip = {
                let chain = AuditChain::open(&path).unwrap();
                for i in 0..4 {
                    chain.append(entry(i)).unwrap();
                }
                chain.tip().unwrap()
            };

            let chain = AuditChain::open(&path).unwrap();
            assert_eq!(chain.tip().unwrap(), tip);
            let next = chain.append(entry(4)).unwrap();
            assert_ne!(next.chain_hash, tip);
            assert!(chain.verify().unwrap().valid);

            let raw = rusqlite::Connection::open(&path).unwrap();
            assert!(raw.execute("UPDATE audit_log SET action = 'x'", []).is_err());
            assert!(raw.execute("DELETE FROM audit_log WHERE seq = 1", []).is_err());
            assert!(chain.verify().unwrap().valid);
        }
    }
}
