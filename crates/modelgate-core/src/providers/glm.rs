//! Adapter for GLM endpoints.

use modelgate_types::{ErrorKind, GatewayResult, ParsedError};

use super::{rewrite_model_field, ProviderAdapter};

pub struct GlmAdapter;

impl GlmAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GlmAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderAdapter for GlmAdapter {
    fn route_hints(&self) -> &[&str] {
        &["glm-"]
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
        // GLM signals everything through numeric string codes
        let code = error
            .get("code")
            .and_then(|v| v.as_str().map(String::from).or_else(|| v.as_i64().map(|n| n.to_string())))
            .unwrap_or_default();
        let message = error
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("upstream error")
            .to_string();

        match code.as_str() {
            "1302" | "1305" => Some(ParsedError::new(ErrorKind::RateLimit, None, message)),
            "1113" | "1308" => Some(ParsedError::new(ErrorKind::QuotaExceeded, None, message)),
            "1000" | "1001" | "1002" | "1003" | "1004" => {
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
    fn concurrency_code_maps_to_rate_limit() {
        let body = br#"{"error":{"code":"1302","message":"too many concurrent requests"}}"#;
        let parsed = GlmAdapter::new().classify(429, body).unwrap();
        assert_eq!(parsed.kind, ErrorKind::RateLimit);
    }

    #[test]
    fn numeric_code_is_accepted() {
        let body = br#"{"error":{"code":1113,"message":"account in arrears"}}"#;
        let parsed = GlmAdapter::new().classify(429, body).unwrap();
        assert_eq!(parsed.kind, ErrorKind::QuotaExceeded);
    }
}
