//! Account model: one credential set at one upstream provider.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One credential set at a provider; the unit of rotation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    /// Unique identifier (opaque string, UUID in practice)
    pub id: String,
    /// Provider this credential belongs to; exactly one per account
    pub provider_id: String,
    /// Operator-facing label
    pub label: String,
    /// Whether the account participates in selection at all
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Provider-specific credential bag
    pub auth_data: AuthData,
    /// Permanent egress binding, assigned once at creation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_id: Option<String>,
    /// URL of the bound proxy; must match `proxy_id`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
    /// Ownership link, preserved on updates (external concern)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl Account {
    pub fn new(id: impl Into<String>, provider_id: impl Into<String>, auth_data: AuthData) -> Self {
        let now = Utc::now();
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            provider_id: provider_id.into(),
            is_active: true,
            auth_data,
            proxy_id: None,
            proxy_url: None,
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Provider-specific credential bag.
///
/// OAuth providers carry `access_token`/`refresh_token`/`expires_at`;
/// API-key providers carry only `api_key`. Unknown fields round-trip through
/// `extra` so provider-private state is never dropped on update.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuthData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Unix seconds, always UTC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AuthData {
    /// API-key credentials have no refresh semantics.
    pub fn is_api_key(&self) -> bool {
        self.api_key.is_some() && self.refresh_token.is_none()
    }

    /// The bearer value to send upstream, if any is currently held.
    pub fn bearer(&self) -> Option<&str> {
        self.api_key.as_deref().or(self.access_token.as_deref())
    }

    /// True when the access token is absent or expires within `lead`.
    pub fn expires_within(&self, lead: Duration) -> bool {
        match self.expires_at {
            Some(ts) => Utc::now().timestamp() >= ts - lead.num_seconds(),
            None => true,
        }
    }

    pub fn from_api_key(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_bag_has_no_refresh_semantics() {
        let auth = AuthData::from_api_key("sk-test");
        assert!(auth.is_api_key());
        assert_eq!(auth.bearer(), Some("sk-test"));
    }

    #[test]
    fn oauth_bag_reports_expiry_with_lead() {
        let mut auth = AuthData {
            access_token: Some("tok".into()),
            refresh_token: Some("ref".into()),
            ..Default::default()
        };
        auth.expires_at = Some(Utc::now().timestamp() + 3600);
        assert!(!auth.expires_within(Duration::minutes(5)));
        assert!(auth.expires_within(Duration::hours(2)));

        auth.expires_at = None;
        assert!(auth.expires_within(Duration::minutes(5)));
    }

    #[test]
    fn unknown_auth_fields_round_trip() {
        let raw = r#"{"access_token":"t","refresh_token":"r","project_id":"p-123"}"#;
        let auth: AuthData = serde_json::from_str(raw).unwrap();
        assert_eq!(
            auth.extra.get("project_id").and_then(|v| v.as_str()),
            Some("p-123")
        );
        let out = serde_json::to_string(&auth).unwrap();
        assert!(out.contains("project_id"));
    }
}
