//! Provider registry entry.

use serde::{Deserialize, Serialize};

/// Authentication schemes a provider accepts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    OAuth,
    ApiKey,
    Bearer,
}

/// Operator-managed registry entry for one upstream provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Provider {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub supported_auth_types: Vec<AuthType>,
    pub supported_models: Vec<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Per-provider override of the quota window, in seconds.
    /// `None` falls back to `quota.window_ttl` from config.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota_window_secs: Option<i64>,
}

fn default_true() -> bool {
    true
}

impl Provider {
    pub fn supports_oauth(&self) -> bool {
        self.supported_auth_types.contains(&AuthType::OAuth)
    }
}
