use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for an action request.
pub type RequestId = String;

/// Structured, arbitrarily nested action payload.
///
/// `serde_json::Value` is already a tagged variant (null / bool / number /
/// string / array / object); signing never relies on its map ordering and
/// goes through the canonical serializer instead.
pub type Payload = Value;

/// Current time as an RFC 3339 / ISO-8601 string with millisecond precision.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// The functional domain of a namespaced action: `"email.send"` → `"email"`.
pub fn action_namespace(action: &str) -> &str {
    action.split_once('.').map(|(ns, _)| ns).unwrap_or(action)
}

/// A request from Core to perform a real-world action.
///
/// Immutable once signed. The `timestamp` is kept as the exact string that
/// was signed so verification never depends on re-formatting a parsed date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub id: RequestId,
    pub timestamp: String,
    /// Namespaced action type, e.g. "email.send", "calendar.create".
    pub action: String,
    pub payload: Payload,
    /// Functional domain the action belongs to (email, calendar, finances, …).
    pub source_domain: String,
}

impl ActionRequest {
    /// Build a request with a fresh UUIDv4 id and the current timestamp.
    pub fn new(action: impl Into<String>, payload: Payload, source_domain: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: now_iso(),
            action: action.into(),
            payload,
            source_domain: source_domain.into(),
        }
    }
}

/// A signed action request, ready to cross the IPC boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedEnvelope {
    pub request: ActionRequest,
    /// Hex SHA-256 of the canonicalized payload.
    pub payload_hash: String,
    /// Hex HMAC over `id|timestamp|action|payload_hash`.
    pub signature: String,
}

impl SignedEnvelope {
    /// The wire form sent to the Gateway. The payload hash is deliberately
    /// dropped: the Gateway recomputes it from the payload it received.
    pub fn to_ipc(&self) -> IpcEnvelope {
        IpcEnvelope {
            id: self.request.id.clone(),
            timestamp: self.request.timestamp.clone(),
            action: self.request.action.clone(),
            payload: self.request.payload.clone(),
            source: self.request.source_domain.clone(),
            signature: self.signature.clone(),
        }
    }
}

/// Core → Gateway message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpcEnvelope {
    pub id: RequestId,
    pub timestamp: String,
    pub action: String,
    pub payload: Payload,
    pub source: String,
    pub signature: String,
}

/// Outcome status of an action as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Success,
    Error,
    Rejected,
    RateLimited,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Error => "error",
            Self::Rejected => "rejected",
            Self::RateLimited => "rate_limited",
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            "rejected" => Ok(Self::Rejected),
            "rate_limited" => Ok(Self::RateLimited),
            other => Err(format!("unknown action status '{other}'")),
        }
    }
}

/// Which half of an action exchange an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Request,
    Response,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "request" => Ok(Self::Request),
            "response" => Ok(Self::Response),
            other => Err(format!("unknown audit direction '{other}'")),
        }
    }
}

/// Gateway → Core reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub request_id: RequestId,
    pub timestamp: String,
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when `status` is `rate_limited`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    /// Id of the audit entry that recorded this response (empty if none could be written).
    pub audit_ref: String,
}

impl ActionResponse {
    pub fn success(request_id: impl Into<String>, data: Option<Value>) -> Self {
        Self::with_status(request_id, ActionStatus::Success, data, None)
    }

    pub fn error(request_id: impl Into<String>, status: ActionStatus, error: impl Into<String>) -> Self {
        Self::with_status(request_id, status, None, Some(error.into()))
    }

    pub fn rate_limited(request_id: impl Into<String>, retry_after_ms: u64) -> Self {
        let mut response = Self::with_status(
            request_id,
            ActionStatus::RateLimited,
            None,
            Some(format!("rate limit exceeded, retry after {retry_after_ms}ms")),
        );
        response.retry_after_ms = Some(retry_after_ms);
        response
    }

    fn with_status(
        request_id: impl Into<String>,
        status: ActionStatus,
        data: Option<Value>,
        error: Option<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            timestamp: now_iso(),
            status,
            data,
            error,
            retry_after_ms: None,
            audit_ref: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ActionStatus::Success
    }
}
