use ring::hmac;
use std::fmt;
use std::path::Path;
use subtle::ConstantTimeEq;
use tracing::{debug, info};
use ward_config::SigningConfig;
use ward_core::{ActionRequest, IpcEnvelope, Payload, Result, SignedEnvelope, WardError};

use crate::canonical::{canonical_json, sha256_hex};

/// Shared Core/Gateway secret. Provisioned out of band; ward never generates it.
#[derive(Clone)]
pub struct SigningKey {
    bytes: Vec<u8>,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("len", &self.bytes.len())
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// Shortest accepted key, in bytes.
    pub const MIN_LEN: usize = 32;

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() < Self::MIN_LEN {
            return Err(WardError::Config(format!(
                "signing key is {} bytes, need at least {}",
                bytes.len(),
                Self::MIN_LEN
            )));
        }
        Ok(Self { bytes })
    }

    pub fn from_hex(encoded: &str) -> Result<Self> {
        let bytes = hex::decode(encoded.trim())
            .map_err(|e| WardError::Config(format!("signing key is not valid hex: {e}")))?;
        Self::from_bytes(bytes)
    }

    /// Load the key named by `config`: the environment variable wins over the key file.
    pub fn load(config: &SigningConfig) -> Result<Self> {
        let from_env = std::env::var(&config.key_env).ok();
        Self::resolve(&config.key_env, from_env, config.key_file.as_deref())
    }

    fn resolve(env_name: &str, from_env: Option<String>, key_file: Option<&Path>) -> Result<Self> {
        if let Some(value) = from_env.filter(|v| !v.trim().is_empty()) {
            info!(source = env_name, "signing key loaded from environment");
            return Self::from_hex(&value);
        }
        if let Some(path) = key_file {
            let contents = std::fs::read_to_string(path).map_err(|e| {
                WardError::Config(format!("cannot read signing key {}: {e}", path.display()))
            })?;
            info!(path = %path.display(), "signing key loaded from file");
            return Self::from_hex(&contents);
        }
        Err(WardError::Config(format!(
            "no signing key: set {env_name} or signing.key_file"
        )))
    }

    fn hmac_key(&self) -> hmac::Key {
        hmac::Key::new(hmac::HMAC_SHA256, &self.bytes)
    }
}

fn signing_input(id: &str, timestamp: &str, action: &str, payload_hash: &str) -> String {
    format!("{id}|{timestamp}|{action}|{payload_hash}")
}

fn mac(key: &hmac::Key, id: &str, timestamp: &str, action: &str, payload_hash: &str) -> Vec<u8> {
    hmac::sign(key, signing_input(id, timestamp, action, payload_hash).as_bytes())
        .as_ref()
        .to_vec()
}

/// Signs requests on Core and verifies them on the Gateway.
///
/// Signatures are deterministic: the same key and request always produce the
/// same bytes, so replay protection relies on request id uniqueness.
pub struct RequestSigner {
    key: hmac::Key,
}

impl RequestSigner {
    pub fn new(key: &SigningKey) -> Self {
        Self {
            key: key.hmac_key(),
        }
    }

    pub fn sign(&self, request: ActionRequest) -> SignedEnvelope {
        let payload_hash = sha256_hex(canonical_json(&request.payload));
        let signature = hex::encode(mac(
            &self.key,
            &request.id,
            &request.timestamp,
            &request.action,
            &payload_hash,
        ));
        debug!(request_id = %request.id, action = %request.action, "request signed");
        SignedEnvelope {
            request,
            payload_hash,
            signature,
        }
    }

    /// Recompute the signature over the received fields and compare in constant time.
    pub fn verify(
        &self,
        signature: &str,
        id: &str,
        timestamp: &str,
        action: &str,
        payload: &Payload,
    ) -> bool {
        let Ok(given) = hex::decode(signature) else {
            return false;
        };
        let payload_hash = sha256_hex(canonical_json(payload));
        let expected = mac(&self.key, id, timestamp, action, &payload_hash);
        if given.len() != expected.len() {
            return false;
        }
        expected.as_slice().ct_eq(given.as_slice()).into()
    }

    pub fn verify_envelope(&self, envelope: &IpcEnvelope) -> bool {
        self.verify(
            &envelope.signature,
            &envelope.id,
            &envelope.timestamp,
            &envelope.action,
            &envelope.payload,
        )
    }
}

/// One-shot verification with a bare key.
pub fn verify(
    signature: &str,
    id: &str,
    timestamp: &str,
    action: &str,
    payload: &Payload,
    key: &SigningKey,
) -> bool {
    RequestSigner::new(key).verify(signature, id, timestamp, action, payload)
}
