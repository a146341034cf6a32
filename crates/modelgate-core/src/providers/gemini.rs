//! Adapter for the Google-hosted Gemini/Claude endpoint.

use modelgate_types::{ErrorKind, GatewayResult, ParsedError};
use std::time::Duration;

use super::{rewrite_model_field, ProviderAdapter};
use crate::classify::retry_time;

pub struct GeminiAdapter;

impl GeminiAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GeminiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderAdapter for GeminiAdapter {
    fn route_hints(&self) -> &[&str] {
        &["gemini-", "claude-"]
    }

    fn translate_request(&self, payload: &[u8], upstream_model: &str) -> GatewayResult<Vec<u8>> {
        rewrite_model_field(payload, upstream_model)
    }

    fn translate_response(&self, payload: &[u8]) -> GatewayResult<Vec<u8>> {
        Ok(payload.to_vec())
    }

    fn translate_chunk(&self, chunk: &[u8]) -> GatewayResult<Vec<u8>> {
        Ok(chunk.to_vec())
    }

    fn extract_tokens(&self, payload: &[u8]) -> i64 {
        let Ok(json) = serde_json::from_slice::<serde_json::Value>(payload) else {
            return 0;
        };
        json.get("usageMetadata")
            .and_then(|u| u.get("totalTokenCount"))
            .and_then(|v| v.as_i64())
            .unwrap_or(0)
    }

    fn classify(&self, status: u16, body: &[u8]) -> Option<ParsedError> {
        if !(400..600).contains(&status) {
            return None;
        }
        let text = String::from_utf8_lossy(body);
        let json: serde_json::Value = serde_json::from_str(text.trim()).ok()?;
        let error = json.get("error")?;

        let grpc_status = error.get("status").and_then(|v| v.as_str()).unwrap_or("");
        let detail_reason = error
            .get("details")
            .and_then(|d| d.as_array())
            .and_then(|a| a.first())
            .and_then(|o| o.get("reason"))
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let message = error
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("upstream error")
            .to_string();

        let cooldown = retry_time::parse_retry_seconds(&text).map(Duration::from_secs);

        if grpc_status == "RESOURCE_EXHAUSTED" || detail_reason == "QUOTA_EXHAUSTED" {
            return Some(ParsedError::new(ErrorKind::QuotaExceeded, cooldown, message));
        }
        if detail_reason == "RATE_LIMIT_EXCEEDED" || detail_reason == "MODEL_CAPACITY_EXHAUSTED" {
            return Some(ParsedError::new(ErrorKind::RateLimit, cooldown, message));
        }
        if grpc_status == "UNAUTHENTICATED" || grpc_status == "PERMISSION_DENIED" {
            return Some(ParsedError::new(ErrorKind::AuthFailed, None, message));
        }
        None
    }
}
