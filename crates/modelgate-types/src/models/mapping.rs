//! Model alias mappings.

use serde::{Deserialize, Serialize};

/// A user- or admin-defined alias resolving to (provider, upstream model).
///
/// Cached write-through under `model:mapping:{alias}` with no TTL; every
/// mutation invalidates the affected alias immediately.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelMapping {
    /// Unique alias clients send as the model name
    pub alias: String,
    pub provider_id: String,
    /// Upstream model name the alias resolves to
    pub model_name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: i32,
    /// `None` = global mapping
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}

fn default_true() -> bool {
    true
}
