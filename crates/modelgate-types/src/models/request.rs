//! Canonical request/response records exchanged with the ingress layer and
//! the upstream HTTP executor, plus the classifier output.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Canonical request produced by ingress after protocol parsing.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    /// Client-supplied model name (alias or upstream name)
    pub model: String,
    /// Opaque request payload, already in the client dialect
    pub payload: Bytes,
    pub stream: bool,
    /// Bypass selection; used for testing and explicit invocation
    pub pinned_account_id: Option<String>,
}

/// Canonical non-streaming response.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status_code: u16,
    pub payload: Bytes,
}

/// What the core hands the external `HTTPExecutor` for one upstream call.
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub upstream_model: String,
    pub payload: Bytes,
    /// The account's permanent egress binding, if any
    pub proxy_url: Option<String>,
    /// Bearer value (OAuth access token or API key)
    pub token: String,
}

/// Raw upstream result before classification.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
    pub latency_ms: u64,
}

impl UpstreamResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Closed set of classified upstream outcomes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Success,
    AuthFailed,
    RateLimit,
    QuotaExceeded,
    Transient,
    InvalidRequest,
    UpstreamError,
}

impl ErrorKind {
    /// Whether the executor may switch accounts and try again.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::QuotaExceeded | Self::AuthFailed | Self::Transient
        )
    }
}

/// Classifier output: kind, suggested cooldown, human-readable message.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedError {
    pub kind: ErrorKind,
    pub cooldown: Option<Duration>,
    pub message: String,
}

impl ParsedError {
    pub fn success() -> Self {
        Self {
            kind: ErrorKind::Success,
            cooldown: None,
            message: String::new(),
        }
    }

    pub fn new(kind: ErrorKind, cooldown: Option<Duration>, message: impl Into<String>) -> Self {
        Self {
            kind,
            cooldown,
            message: message.into(),
        }
    }
}

/// Pending OAuth authorization flow, keyed by the random state string.
/// Stored in the fast store with a 10-minute TTL and consumed exactly once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OAuthSession {
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub flow_type: String,
    pub redirect_uri: String,
    pub code_verifier: String,
    pub created_at: DateTime<Utc>,
}
