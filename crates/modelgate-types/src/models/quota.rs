//! Quota usage snapshots and learned quota patterns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-(account, model) usage inside the current rolling window.
///
/// Lives in the shared fast store; all fields share the window TTL and expire
/// together. Absence means the window is fresh and the pair is available.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuotaUsage {
    pub requests: i64,
    pub tokens: i64,
    /// Unix seconds, set once per window via SETNX
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_start: Option<i64>,
    #[serde(default)]
    pub exhausted: bool,
}

/// Learned per-(account, model) limit estimates, persisted across windows.
///
/// Limits are learned, never authoritative: estimates converge via weighted
/// averaging over observed exhaustion events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuotaPattern {
    pub account_id: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub est_request_limit: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub est_token_limit: Option<i64>,
    /// In [0, 1]
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub sample_count: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_exhausted_at: Option<DateTime<Utc>>,
}

impl QuotaPattern {
    /// Fresh pattern with no observations; invariant: estimates null while
    /// `sample_count` is zero.
    pub fn empty(account_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            model: model.into(),
            est_request_limit: None,
            est_token_limit: None,
            confidence: 0.0,
            sample_count: 0,
            last_exhausted_at: None,
        }
    }
}
