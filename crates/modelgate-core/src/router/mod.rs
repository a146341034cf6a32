//! Model routing: client-supplied model name → (provider, upstream model).
//!
//! Resolution order: fast-store mapping cache, persistent mappings by
//! priority, then static prefix rules contributed by the provider adapters.
//! The mapping cache has no TTL; every mutation writes through or invalidates
//! the affected alias immediately.

use modelgate_types::{GatewayError, GatewayResult, ModelMapping};
use std::sync::Arc;

use crate::providers::ProviderRegistry;
use crate::repo::Repository;
use crate::store::{FastStore, Keys};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub provider_id: String,
    pub upstream_model: String,
}

pub struct ModelRouter {
    store: Arc<dyn FastStore>,
    repo: Arc<dyn Repository>,
    /// (prefix, provider_id), longest prefix first.
    rules: Vec<(String, String)>,
}

impl ModelRouter {
    pub fn new(
        store: Arc<dyn FastStore>,
        repo: Arc<dyn Repository>,
        registry: &ProviderRegistry,
    ) -> Self {
        Self {
            store,
            repo,
            rules: registry.route_rules(),
        }
    }

    pub async fn route(&self, alias: &str) -> GatewayResult<RouteTarget> {
        let cache_key = Keys::model_mapping(alias);

        // Cache errors degrade to a DB lookup, never to a failed route.
        if let Ok(Some(cached)) = self.store.get(&cache_key).await {
            if let Ok(mapping) = serde_json::from_str::<ModelMapping>(&cached) {
                return Ok(RouteTarget {
                    provider_id: mapping.provider_id,
                    upstream_model: mapping.model_name,
                });
            }
            tracing::warn!("dropping corrupt mapping cache entry for {}", alias);
            let _ = self.store.del(&cache_key).await;
        }

        if let Some(mapping) = self.repo.find_mapping(alias).await? {
            if let Ok(json) = serde_json::to_string(&mapping) {
                if let Err(e) = self.store.set(&cache_key, &json).await {
                    tracing::warn!("mapping cache write failed for {}: {}", alias, e);
                }
            }
            return Ok(RouteTarget {
                provider_id: mapping.provider_id,
                upstream_model: mapping.model_name,
            });
        }

        for (prefix, provider_id) in &self.rules {
            if alias.starts_with(prefix.as_str()) {
                return Ok(RouteTarget {
                    provider_id: provider_id.clone(),
                    upstream_model: alias.to_string(),
                });
            }
        }

        Err(GatewayError::InvalidRequest(format!(
            "unknown model '{}'",
            alias
        )))
    }

    /// Create or update a mapping; the cache is written through when the
    /// mapping is live and invalidated when it is disabled.
    pub async fn upsert_mapping(&self, mapping: &ModelMapping) -> GatewayResult<()> {
        self.repo.upsert_mapping(mapping).await?;
        let cache_key = Keys::model_mapping(&mapping.alias);
        if mapping.enabled {
            let json = serde_json::to_string(mapping)
                .map_err(|e| GatewayError::Internal(format!("mapping serialize: {}", e)))?;
            self.store.set(&cache_key, &json).await?;
        } else {
            self.store.del(&cache_key).await?;
        }
        Ok(())
    }

    pub async fn delete_mapping(&self, alias: &str) -> GatewayResult<()> {
        self.repo.delete_mapping(alias).await?;
        self.store.del(&Keys::model_mapping(alias)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::MemoryRepository;
    use crate::store::MemoryStore;

    fn mapping(alias: &str, provider: &str, model: &str) -> ModelMapping {
        ModelMapping {
            alias: alias.to_string(),
            provider_id: provider.to_string(),
            model_name: model.to_string(),
            enabled: true,
            priority: 0,
            owner_id: None,
        }
    }

    fn router() -> (ModelRouter, Arc<MemoryStore>, Arc<MemoryRepository>) {
        let store = Arc::new(MemoryStore::new());
        let repo = Arc::new(MemoryRepository::new());
        let registry = ProviderRegistry::with_builtin();
        (
            ModelRouter::new(store.clone(), repo.clone(), &registry),
            store,
            repo,
        )
    }

    #[tokio::test]
    async fn mapping_overrides_prefix_rules() {
        let (router, _store, _repo) = router();
        router
            .upsert_mapping(&mapping("my-claude", "antigravity", "claude-sonnet-4-5"))
            .await
            .unwrap();

        let target = router.route("my-claude").await.unwrap();
        assert_eq!(target.provider_id, "antigravity");
        assert_eq!(target.upstream_model, "claude-sonnet-4-5");
    }

    #[tokio::test]
    async fn delete_falls_through_to_prefix_rules() {
        let (router, _store, _repo) = router();
        router
            .upsert_mapping(&mapping("claude-fast", "glm", "glm-4.6"))
            .await
            .unwrap();
        assert_eq!(router.route("claude-fast").await.unwrap().provider_id, "glm");

        router.delete_mapping("claude-fast").await.unwrap();
        // `claude-` prefix hint now routes it
        let target = router.route("claude-fast").await.unwrap();
        assert_eq!(target.provider_id, "antigravity");
        assert_eq!(target.upstream_model, "claude-fast");
    }

    #[tokio::test]
    async fn deleted_custom_alias_with_no_rule_is_invalid() {
        let (router, _store, _repo) = router();
        router
            .upsert_mapping(&mapping("my-claude", "antigravity", "claude-sonnet-4-5"))
            .await
            .unwrap();
        router.delete_mapping("my-claude").await.unwrap();

        assert!(matches!(
            router.route("my-claude").await,
            Err(GatewayError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn db_hit_populates_cache() {
        let (router, store, repo) = router();
        repo.insert_mapping(mapping("fast", "openai", "gpt-4o-mini"));

        assert_eq!(router.route("fast").await.unwrap().provider_id, "openai");
        assert!(store
            .get(&Keys::model_mapping("fast"))
            .await
            .unwrap()
            .is_some());

        // Delete straight from the repo: the stale cache still answers, which
        // is exactly why mutations must go through the router.
        repo.delete_mapping("fast").await.unwrap();
        assert!(router.route("fast").await.is_ok());
        router.delete_mapping("fast").await.unwrap();
        assert!(router.route("fast").await.is_err());
    }

    #[tokio::test]
    async fn prefix_rules_route_known_families() {
        let (router, _store, _repo) = router();
        assert_eq!(
            router.route("gemini-3-pro").await.unwrap().provider_id,
            "antigravity"
        );
        assert_eq!(router.route("gpt-4o").await.unwrap().provider_id, "openai");
        assert_eq!(router.route("glm-4.6").await.unwrap().provider_id, "glm");
        assert!(router.route("mystery-model").await.is_err());
    }

    #[tokio::test]
    async fn disabling_a_mapping_invalidates_its_cache_entry() {
        let (router, store, _repo) = router();
        let mut m = mapping("pin", "openai", "gpt-4o");
        router.upsert_mapping(&m).await.unwrap();
        assert!(router.route("pin").await.is_ok());

        m.enabled = false;
        router.upsert_mapping(&m).await.unwrap();
        assert!(store.get(&Keys::model_mapping("pin")).await.unwrap().is_none());
        assert!(router.route("pin").await.is_err());
    }
}
