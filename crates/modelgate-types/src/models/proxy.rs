//! Egress proxy endpoint model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProxyHealth {
    Healthy,
    Degraded,
    Down,
}

/// One egress endpoint accounts can be permanently bound to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProxyServer {
    pub id: String,
    pub url: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// 0 means unlimited.
    #[serde(default)]
    pub max_accounts: i32,
    /// Invariant: equals the number of accounts whose proxy_id = this.id.
    #[serde(default)]
    pub current_accounts: i32,
    #[serde(default = "default_health")]
    pub health_status: ProxyHealth,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marked_down_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub priority: i32,
}

fn default_true() -> bool {
    true
}

fn default_health() -> ProxyHealth {
    ProxyHealth::Healthy
}

impl ProxyServer {
    /// Whether a new account may be bound to this proxy right now.
    pub fn has_capacity(&self) -> bool {
        self.max_accounts == 0 || self.current_accounts < self.max_accounts
    }
}
