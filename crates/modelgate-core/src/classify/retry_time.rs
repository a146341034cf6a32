//! Retry-delay extraction from upstream error payloads.
//!
//! Providers disagree about where the reset hint lives: a `Retry-After`
//! header, a `quotaResetDelay` duration string buried in error details, or a
//! free-text "try again in 1m 30s". Everything funnels through here.

use once_cell::sync::Lazy;
use regex::Regex;

static DURATION_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:(\d+)\s*h)?\s*(?:(\d+)\s*m)?\s*(?:(\d+(?:\.\d+)?)\s*s)?\s*(?:(\d+(?:\.\d+)?)\s*ms)?")
        .expect("duration regex is valid")
});

static RETRY_M_S_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)try again in (\d+)m\s*(\d+)s").expect("retry m s regex is valid"));

static RETRY_S_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:try again in|backoff for|wait)\s*(\d+)s").expect("retry s regex is valid")
});

static RETRY_AFTER_SECONDS_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:retry after|quota will reset in) (\d+) second")
        .expect("retry after regex is valid")
});

/// Parse compound duration strings like `1h 2m 3.5s` or `750ms`.
pub fn parse_duration_string(s: &str) -> Option<u64> {
    let caps = DURATION_REGEX.captures(s)?;

    let any_matched =
        caps.get(1).is_some() || caps.get(2).is_some() || caps.get(3).is_some() || caps.get(4).is_some();
    if !any_matched {
        return None;
    }

    let hours = caps.get(1).and_then(|m| m.as_str().parse::<u64>().ok()).unwrap_or(0);
    let minutes = caps.get(2).and_then(|m| m.as_str().parse::<u64>().ok()).unwrap_or(0);
    let seconds = caps.get(3).and_then(|m| m.as_str().parse::<f64>().ok()).unwrap_or(0.0);
    let millis = caps.get(4).and_then(|m| m.as_str().parse::<f64>().ok()).unwrap_or(0.0);

    Some(hours * 3600 + minutes * 60 + seconds.ceil() as u64 + (millis / 1000.0).ceil() as u64)
}

/// Best-effort reset delay in seconds from an error body.
pub fn parse_retry_seconds(body: &str) -> Option<u64> {
    let trimmed = body.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
            if let Some(delay_str) = json
                .get("error")
                .and_then(|e| e.get("details"))
                .and_then(|d| d.as_array())
                .and_then(|a| a.first())
                .and_then(|o| o.get("metadata"))
                .and_then(|m| m.get("quotaResetDelay"))
                .and_then(|v| v.as_str())
            {
                if let Some(seconds) = parse_duration_string(delay_str) {
                    return Some(seconds);
                }
            }

            if let Some(retry) = json
                .get("error")
                .and_then(|e| e.get("retry_after"))
                .and_then(|v| v.as_u64())
            {
                return Some(retry);
            }
        }
    }

    if let Some(caps) = RETRY_M_S_REGEX.captures(body) {
        if let (Ok(m), Ok(s)) = (caps[1].parse::<u64>(), caps[2].parse::<u64>()) {
            return Some(m * 60 + s);
        }
    }

    if let Some(caps) = RETRY_S_REGEX.captures(body) {
        if let Ok(s) = caps[1].parse::<u64>() {
            return Some(s);
        }
    }

    if let Some(caps) = RETRY_AFTER_SECONDS_REGEX.captures(body) {
        if let Ok(s) = caps[1].parse::<u64>() {
            return Some(s);
        }
    }

    None
}

/// `Retry-After` header: delta-seconds form only; HTTP-date is rare enough
/// upstream that we fall back to body parsing instead.
pub fn parse_retry_after_header(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compound_duration_strings() {
        assert_eq!(parse_duration_string("1h 30m"), Some(5400));
        assert_eq!(parse_duration_string("45s"), Some(45));
        assert_eq!(parse_duration_string("2.5s"), Some(3));
        assert_eq!(parse_duration_string("750ms"), Some(1));
        assert_eq!(parse_duration_string("no units here"), None);
    }

    #[test]
    fn quota_reset_delay_from_json_details() {
        let body = r#"{"error":{"details":[{"metadata":{"quotaResetDelay":"2m 10s"}}]}}"#;
        assert_eq!(parse_retry_seconds(body), Some(130));
    }

    #[test]
    fn free_text_retry_hints() {
        assert_eq!(parse_retry_seconds("Please try again in 1m 30s."), Some(90));
        assert_eq!(parse_retry_seconds("backoff for 20s"), Some(20));
        assert_eq!(parse_retry_seconds("Quota will reset in 300 seconds"), Some(300));
        assert_eq!(parse_retry_seconds("no hint"), None);
    }

    #[test]
    fn retry_after_header_delta_seconds() {
        assert_eq!(parse_retry_after_header("5"), Some(5));
        assert_eq!(parse_retry_after_header(" 30 "), Some(30));
        assert_eq!(parse_retry_after_header("Wed, 21 Oct 2026 07:28:00 GMT"), None);
    }
}
