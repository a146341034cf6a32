//! Request audit log entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Append-only audit record for one completed request attempt chain.
/// Written asynchronously; never read by the core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestLogEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    pub model: String,
    pub status_code: i32,
    pub latency_ms: i64,
    pub retry_count: i32,
    /// Set when the request switched accounts mid-retry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub switched_from_account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}
