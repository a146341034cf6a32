//! OAuth token lifecycle: cache with skew, reactive refresh on the request
//! path, proactive refresh in the background sweeper.
//!
//! Races between concurrent refreshers are benign: every successful refresh
//! produces a valid token and the last cache write wins.

pub mod oauth;
mod refresher;

pub use refresher::{RefresherHandle, TokenRefresher};

use chrono::Utc;
use modelgate_types::{Account, AuthData, GatewayError, GatewayResult};
use std::sync::Arc;
use std::time::Duration;

use crate::repo::Repository;
use crate::store::{FastStore, Keys};

pub struct TokenCache {
    store: Arc<dyn FastStore>,
    repo: Arc<dyn Repository>,
    http: reqwest::Client,
    skew: Duration,
}

impl TokenCache {
    pub fn new(store: Arc<dyn FastStore>, repo: Arc<dyn Repository>, skew: Duration) -> Self {
        Self {
            store,
            repo,
            http: reqwest::Client::new(),
            skew,
        }
    }

    /// Get a usable bearer token for the account.
    ///
    /// Order: cache hit with at least `skew` of validity left, API key
    /// verbatim, then a refresh POST that persists the rotated credential and
    /// writes through the cache.
    pub async fn get(&self, account: &Account) -> GatewayResult<String> {
        let key = Keys::auth(&account.provider_id, &account.id);

        // Store errors here are not fatal; the refresh path below re-derives
        // the token from the persistent credential.
        if let Ok(Some(cached)) = self.store.get(&key).await {
            if let Ok(auth) = serde_json::from_str::<AuthData>(&cached) {
                if !auth.expires_within(chrono::Duration::seconds(self.skew.as_secs() as i64)) {
                    if let Some(token) = auth.bearer() {
                        return Ok(token.to_string());
                    }
                }
            }
        }

        let auth = &account.auth_data;
        if auth.is_api_key() {
            return auth
                .api_key
                .clone()
                .ok_or_else(|| GatewayError::OAuth("empty api key".to_string()));
        }

        let refreshed = self.refresh_and_persist(account).await?;

        if let Some(expires_at) = refreshed.expires_at {
            let ttl = expires_at - Utc::now().timestamp() - self.skew.as_secs() as i64;
            if ttl > 0 {
                let json = serde_json::to_string(&refreshed)
                    .map_err(|e| GatewayError::Internal(format!("auth serialize: {}", e)))?;
                if let Err(e) = self.store.set_ex(&key, &json, Duration::from_secs(ttl as u64)).await
                {
                    tracing::warn!("token cache write failed for {}: {}", account.id, e);
                }
            }
        }

        refreshed
            .access_token
            .ok_or_else(|| GatewayError::OAuth("refresh yielded no access token".to_string()))
    }

    /// Refresh the OAuth credential and persist the updated bag.
    ///
    /// The rotated refresh token is kept when the endpoint supplies one;
    /// `expires_at` is always recomputed as UTC now + expires_in.
    pub(crate) async fn refresh_and_persist(&self, account: &Account) -> GatewayResult<AuthData> {
        let response = oauth::refresh_access_token(&self.http, &account.auth_data).await?;

        let mut updated = account.auth_data.clone();
        updated.access_token = Some(response.access_token.clone());
        if let Some(rotated) = response.refresh_token {
            updated.refresh_token = Some(rotated);
        }
        updated.expires_at = Some(Utc::now().timestamp() + response.expires_in);

        self.repo.update_auth_data(&account.id, &updated).await?;
        tracing::debug!(
            account = %account.id,
            provider = %account.provider_id,
            expires_in = response.expires_in,
            "token refreshed"
        );
        Ok(updated)
    }

    /// Drop the cached entry so the next reader re-populates from a fresh
    /// refresh. Used by the background sweeper after it rotates a credential.
    pub(crate) async fn invalidate(&self, account: &Account) -> GatewayResult<()> {
        let key = Keys::auth(&account.provider_id, &account.id);
        self.store.del(&key).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::MemoryRepository;
    use crate::store::MemoryStore;
    use modelgate_types::Account;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn oauth_account(token_url: &str) -> Account {
        let mut auth = AuthData {
            access_token: Some("stale-token".to_string()),
            refresh_token: Some("refresh-1".to_string()),
            client_id: Some("client-1".to_string()),
            token_url: Some(token_url.to_string()),
            ..Default::default()
        };
        auth.expires_at = Some(Utc::now().timestamp() - 10);
        Account::new("acct-1", "antigravity", auth)
    }

    fn cache_with(repo: Arc<MemoryRepository>, store: Arc<MemoryStore>) -> TokenCache {
        TokenCache::new(store, repo, Duration::from_secs(300))
    }

    #[tokio::test]
    async fn cache_hit_avoids_refresh() {
        let store = Arc::new(MemoryStore::new());
        let repo = Arc::new(MemoryRepository::new());
        let cache = cache_with(repo.clone(), store.clone());

        // Cached token valid for 10 more minutes; skew is 5, so no POST happens
        // (no mock server is even running).
        let mut auth = AuthData {
            access_token: Some("cached-token".to_string()),
            ..Default::default()
        };
        auth.expires_at = Some(Utc::now().timestamp() + 600);
        let account = Account::new("acct-1", "antigravity", auth.clone());
        store
            .set(
                &Keys::auth("antigravity", "acct-1"),
                &serde_json::to_string(&auth).unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(cache.get(&account).await.unwrap(), "cached-token");
        assert_eq!(cache.get(&account).await.unwrap(), "cached-token");
    }

    #[tokio::test]
    async fn api_key_returned_verbatim() {
        let store = Arc::new(MemoryStore::new());
        let repo = Arc::new(MemoryRepository::new());
        let cache = cache_with(repo, store);

        let account = Account::new("acct-k", "glm", AuthData::from_api_key("sk-glm-1"));
        assert_eq!(cache.get(&account).await.unwrap(), "sk-glm-1");
    }

    #[tokio::test]
    async fn expired_cache_triggers_single_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=refresh-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "fresh-token",
                "refresh_token": "refresh-2",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let repo = Arc::new(MemoryRepository::new());
        let account = oauth_account(&format!("{}/token", server.uri()));
        repo.insert_account(account.clone());
        let cache = cache_with(repo.clone(), store.clone());

        assert_eq!(cache.get(&account).await.unwrap(), "fresh-token");

        // Rotated refresh token persisted
        let stored = repo.get_account("acct-1").await.unwrap();
        assert_eq!(stored.auth_data.refresh_token.as_deref(), Some("refresh-2"));
        assert_eq!(stored.auth_data.access_token.as_deref(), Some("fresh-token"));

        // Second get is served from the write-through cache (expect(1) above)
        assert_eq!(cache.get(&account).await.unwrap(), "fresh-token");
    }

    #[tokio::test]
    async fn refresh_failure_surfaces_as_oauth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let repo = Arc::new(MemoryRepository::new());
        let account = oauth_account(&format!("{}/token", server.uri()));
        repo.insert_account(account.clone());
        let cache = cache_with(repo, store);

        let err = cache.get(&account).await.unwrap_err();
        assert!(matches!(err, GatewayError::OAuth(_)));
    }
}
