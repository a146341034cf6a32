//! Provider plugin surface.
//!
//! One adapter per upstream provider, holding no shared mutable state. The
//! adapter owns everything provider-shaped: request/response/chunk
//! translation, token extraction, streaming support, routing hints, and
//! provider-specific error-body classification. The heavyweight wire-format
//! translators live outside the core; the adapters here are the thin JSON
//! plumbing the pipeline needs to stay provider-agnostic.

mod gemini;
mod glm;
mod openai_compat;

pub use gemini::GeminiAdapter;
pub use glm::GlmAdapter;
pub use openai_compat::OpenAiCompatAdapter;

use modelgate_types::{GatewayError, GatewayResult, ParsedError};
use std::collections::HashMap;
use std::sync::Arc;

/// Capability set implemented once per provider.
///
/// Translate functions are pure: UTF-8 JSON in and out, no I/O, unknown
/// fields pass through untouched.
pub trait ProviderAdapter: Send + Sync {
    /// Model-name prefixes that route to this provider when no mapping matches.
    fn route_hints(&self) -> &[&str];

    fn translate_request(&self, payload: &[u8], upstream_model: &str) -> GatewayResult<Vec<u8>>;

    fn translate_response(&self, payload: &[u8]) -> GatewayResult<Vec<u8>>;

    fn translate_chunk(&self, chunk: &[u8]) -> GatewayResult<Vec<u8>>;

    /// Best-effort token count from a response or final stream chunk.
    /// Returns 0 when the provider fields are absent; callers apply the
    /// size-based fallback.
    fn extract_tokens(&self, payload: &[u8]) -> i64;

    fn supports_streaming(&self) -> bool {
        true
    }

    /// Provider-specific error-body inspection. `None` defers to the
    /// status-code fallback mapping.
    fn classify(&self, status: u16, body: &[u8]) -> Option<ParsedError>;
}

/// Registry of adapters keyed by provider id.
pub struct ProviderRegistry {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Registry with the three built-in adapters under their conventional ids.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("antigravity", Arc::new(GeminiAdapter::new()));
        registry.register("openai", Arc::new(OpenAiCompatAdapter::new()));
        registry.register("glm", Arc::new(GlmAdapter::new()));
        registry
    }

    pub fn register(&mut self, provider_id: impl Into<String>, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(provider_id.into(), adapter);
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(provider_id).cloned()
    }

    pub fn require(&self, provider_id: &str) -> GatewayResult<Arc<dyn ProviderAdapter>> {
        self.get(provider_id)
            .ok_or_else(|| GatewayError::Internal(format!("no adapter for provider {}", provider_id)))
    }

    /// (prefix, provider_id) routing rules collected from every adapter,
    /// longest prefix first so `gemini-3-` style hints win over `gemini-`.
    pub fn route_rules(&self) -> Vec<(String, String)> {
        let mut rules: Vec<(String, String)> = self
            .adapters
            .iter()
            .flat_map(|(id, adapter)| {
                adapter
                    .route_hints()
                    .iter()
                    .map(move |prefix| ((*prefix).to_string(), id.clone()))
            })
            .collect();
        rules.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        rules
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

/// Rewrite the `model` field of a JSON payload, passing everything else
/// through. Non-JSON payloads are returned untouched.
pub(crate) fn rewrite_model_field(payload: &[u8], upstream_model: &str) -> GatewayResult<Vec<u8>> {
    match serde_json::from_slice::<serde_json::Value>(payload) {
        Ok(mut value) => {
            if let Some(obj) = value.as_object_mut() {
                if obj.contains_key("model") {
                    obj.insert(
                        "model".to_string(),
                        serde_json::Value::String(upstream_model.to_string()),
                    );
                }
            }
            serde_json::to_vec(&value)
                .map_err(|e| GatewayError::Internal(format!("payload re-serialize: {}", e)))
        }
        Err(_) => Ok(payload.to_vec()),
    }
}

/// Canonical token-count fallback when provider usage fields are absent.
pub(crate) fn size_fallback_tokens(payload: &[u8]) -> i64 {
    (payload.len() / 4) as i64
}
