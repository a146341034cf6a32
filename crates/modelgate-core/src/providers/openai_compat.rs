//! Adapter for OpenAI-compatible endpoints.

use modelgate_types::{ErrorKind, GatewayResult, ParsedError};

use super::{rewrite_model_field, ProviderAdapter};

pub struct OpenAiCompatAdapter;

impl OpenAiCompatAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for OpenAiCompatAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderAdapter for OpenAiCompatAdapter {
    fn route_hints(&self) -> &[&str] {
        &["gpt-", "o1-", "o3-", "text-embedding-"]
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
        json.get("usage")
            .and_then(|u| u.get("total_tokens"))
            .and_then(|v| v.as_i64())
            .unwrap_or(0)
    }

    fn classify(&self, status: u16, body: &[u8]) -> Option<ParsedError> {
        if !(400..600).contains(&status) {
            return None;
        }
        let json: serde_json::Value = serde_json::from_slice(body).ok()?;
        let error = json.get("error")?;
        let err_type = error.get("type").and_then(|v| v.as_str()).unwrap_or("");
        let code = error.get("code").and_then(|v| v.as_str()).unwrap_or("");
        let message = error
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("upstream error")
            .to_string();

        match (err_type, code) {
            ("rate_limit_error", _) | ("requests", _) => {
                Some(ParsedError::new(ErrorKind::RateLimit, None, message))
            }
            ("insufficient_quota", _) | (_, "insufficient_quota") => {
                Some(ParsedError::new(ErrorKind::QuotaExceeded, None, message))
            }
            ("authentication_error", _) | (_, "invalid_api_key") => {
                Some(ParsedError::new(ErrorKind::AuthFailed, None, message))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_quota_maps_to_quota_exceeded() {
        let body = br#"{"error":{"type":"insufficient_quota","message":"You exceeded your current quota"}}"#;
        let parsed = OpenAiCompatAdapter::new().classify(429, body).unwrap();
        assert_eq!(parsed.kind, ErrorKind::QuotaExceeded);
    }

    #[test]
    fn rate_limit_error_maps_to_rate_limit() {
        let body = br#"{"error":{"type":"rate_limit_error","message":"Rate limit reached"}}"#;
        let parsed = OpenAiCompatAdapter::new().classify(429, body).unwrap();
        assert_eq!(parsed.kind, ErrorKind::RateLimit);
    }

    #[test]
    fn usage_total_tokens() {
        let body = br#"{"usage":{"prompt_tokens":9,"completion_tokens":12,"total_tokens":21}}"#;
        assert_eq!(OpenAiCompatAdapter::new().extract_tokens(body), 21);
    }
}
