//! Upstream error classification.
//!
//! A pure function of status code and body bytes: no I/O, so the executor's
//! retry decisions stay deterministic and unit-testable. Provider-specific
//! body inspection is delegated to the adapter; the status-code table here is
//! the fallback every provider shares.

pub mod retry_time;

use modelgate_types::{ErrorKind, ParsedError};
use std::time::Duration;

use crate::config::CooldownConfig;
use crate::providers::ProviderAdapter;

pub struct Classifier {
    cooldowns: CooldownConfig,
}

impl Classifier {
    pub fn new(cooldowns: CooldownConfig) -> Self {
        Self { cooldowns }
    }

    /// Classify one upstream result.
    ///
    /// Precedence: 2xx short-circuits to success, then the provider adapter's
    /// body inspection, then the shared status mapping. Cooldowns come from
    /// the response when it names one (`Retry-After`, reset-delay hints in the
    /// body) and from configured defaults otherwise.
    pub fn classify(
        &self,
        adapter: Option<&dyn ProviderAdapter>,
        status: u16,
        retry_after: Option<&str>,
        body: &[u8],
    ) -> ParsedError {
        if (200..300).contains(&status) {
            return ParsedError::success();
        }

        if let Some(mut parsed) = adapter.and_then(|a| a.classify(status, body)) {
            if parsed.cooldown.is_none() {
                parsed.cooldown = Some(self.default_cooldown(parsed.kind));
            }
            return parsed;
        }

        let text = String::from_utf8_lossy(body);
        match status {
            401 | 403 => ParsedError::new(
                ErrorKind::AuthFailed,
                Some(Duration::from_secs(self.cooldowns.auth_failure_secs)),
                truncate(&text),
            ),
            429 => {
                let cooldown = retry_after
                    .and_then(retry_time::parse_retry_after_header)
                    .or_else(|| retry_time::parse_retry_seconds(&text))
                    .map(Duration::from_secs)
                    .unwrap_or(Duration::from_secs(self.cooldowns.rate_limit_secs));
                ParsedError::new(ErrorKind::RateLimit, Some(cooldown), truncate(&text))
            }
            500..=599 => ParsedError::new(
                ErrorKind::Transient,
                Some(Duration::from_secs(self.cooldowns.transient_secs)),
                truncate(&text),
            ),
            400..=499 => ParsedError::new(ErrorKind::InvalidRequest, None, truncate(&text)),
            _ => ParsedError::new(ErrorKind::UpstreamError, None, truncate(&text)),
        }
    }

    fn default_cooldown(&self, kind: ErrorKind) -> Duration {
        let secs = match kind {
            ErrorKind::AuthFailed => self.cooldowns.auth_failure_secs,
            ErrorKind::RateLimit => self.cooldowns.rate_limit_secs,
            ErrorKind::QuotaExceeded => self.cooldowns.quota_exceeded_secs,
            _ => self.cooldowns.transient_secs,
        };
        Duration::from_secs(secs)
    }
}

fn truncate(text: &str) -> String {
    const MAX: usize = 512;
    if text.len() <= MAX {
        text.to_string()
    } else {
        let mut end = MAX;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &text[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::GeminiAdapter;

    fn classifier() -> Classifier {
        Classifier::new(CooldownConfig::default())
    }

    #[test]
    fn two_xx_is_success() {
        let parsed = classifier().classify(None, 200, None, b"{}");
        assert_eq!(parsed.kind, ErrorKind::Success);
        let parsed = classifier().classify(None, 204, None, b"");
        assert_eq!(parsed.kind, ErrorKind::Success);
    }

    #[test]
    fn status_fallback_table() {
        let c = classifier();
        assert_eq!(c.classify(None, 401, None, b"").kind, ErrorKind::AuthFailed);
        assert_eq!(c.classify(None, 403, None, b"").kind, ErrorKind::AuthFailed);
        assert_eq!(c.classify(None, 429, None, b"").kind, ErrorKind::RateLimit);
        assert_eq!(c.classify(None, 500, None, b"").kind, ErrorKind::Transient);
        assert_eq!(c.classify(None, 503, None, b"").kind, ErrorKind::Transient);
        assert_eq!(
            c.classify(None, 404, None, b"").kind,
            ErrorKind::InvalidRequest
        );
    }

    #[test]
    fn retry_after_header_drives_rate_limit_cooldown() {
        let parsed = classifier().classify(None, 429, Some("5"), b"");
        assert_eq!(parsed.kind, ErrorKind::RateLimit);
        assert_eq!(parsed.cooldown, Some(Duration::from_secs(5)));
    }

    #[test]
    fn rate_limit_without_hint_uses_default() {
        let parsed = classifier().classify(None, 429, None, b"slow down");
        assert_eq!(parsed.cooldown, Some(Duration::from_secs(5)));
    }

    #[test]
    fn adapter_body_inspection_wins_over_status() {
        let adapter = GeminiAdapter::new();
        let body = br#"{"error":{"status":"RESOURCE_EXHAUSTED","message":"quota"}}"#;
        let parsed = classifier().classify(Some(&adapter), 429, None, body);
        assert_eq!(parsed.kind, ErrorKind::QuotaExceeded);
        // Default quota cooldown filled in since the body named none
        assert_eq!(parsed.cooldown, Some(Duration::from_secs(60)));
    }

    #[test]
    fn invalid_request_carries_no_cooldown() {
        let parsed = classifier().classify(None, 400, None, b"bad field");
        assert_eq!(parsed.kind, ErrorKind::InvalidRequest);
        assert!(parsed.cooldown.is_none());
    }
}
