//! Proactive token refresh sweeper.
//!
//! Every interval, walks each OAuth-capable provider's active accounts and
//! refreshes credentials expiring within the lead window. A failed refresh is
//! never fatal here; the next request refreshes synchronously, and only
//! classified traffic disables an account.

use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::OAuthConfig;
use crate::repo::Repository;
use crate::token::TokenCache;

/// Backoff schedule between refresh attempts for one account.
const REFRESH_BACKOFF: [Duration; 2] = [Duration::from_secs(1), Duration::from_secs(4)];

pub struct TokenRefresher {
    cache: Arc<TokenCache>,
    repo: Arc<dyn Repository>,
    config: OAuthConfig,
}

/// Cancellation handle for the sweeper task.
pub struct RefresherHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RefresherHandle {
    /// Signal the sweeper to stop and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.task.await;
    }
}

impl TokenRefresher {
    pub fn new(cache: Arc<TokenCache>, repo: Arc<dyn Repository>, config: OAuthConfig) -> Self {
        Self {
            cache,
            repo,
            config,
        }
    }

    /// Spawn the background sweep loop. The first sweep runs after one full
    /// interval; startup traffic refreshes reactively.
    pub fn start(self: Arc<Self>) -> RefresherHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let refresher = Arc::clone(&self);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(refresher.config.refresh_interval());
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        refresher.sweep_once().await;
                    }
                    _ = stop_rx.changed() => {
                        tracing::info!("token refresh sweeper stopped");
                        return;
                    }
                }
            }
        });

        tracing::info!(
            interval_secs = self.config.refresh_interval_secs,
            lead_secs = self.config.refresh_lead_secs,
            "token refresh sweeper started"
        );
        RefresherHandle { stop_tx, task }
    }

    /// One full pass over all OAuth providers.
    pub async fn sweep_once(&self) {
        let providers = match self.repo.list_providers().await {
            Ok(providers) => providers,
            Err(e) => {
                tracing::warn!("sweep: provider list failed: {}", e);
                return;
            }
        };

        for provider in providers.iter().filter(|p| p.supports_oauth()) {
            let accounts = match self.repo.list_active_accounts(&provider.id).await {
                Ok(accounts) => accounts,
                Err(e) => {
                    tracing::warn!("sweep: account list failed for {}: {}", provider.id, e);
                    continue;
                }
            };

            let lead = ChronoDuration::seconds(self.config.refresh_lead_secs as i64);
            for account in accounts {
                if account.auth_data.is_api_key() || account.auth_data.refresh_token.is_none() {
                    continue;
                }
                if !account.auth_data.expires_within(lead) {
                    continue;
                }
                self.refresh_with_backoff(&account).await;
            }
        }
    }

    /// Attempts at 0s, 1s, 4s. On success the cache entry is invalidated so
    /// the next reader re-populates with the fresh credential.
    async fn refresh_with_backoff(&self, account: &modelgate_types::Account) {
        let mut backoff = REFRESH_BACKOFF.iter();
        loop {
            match self.cache.refresh_and_persist(account).await {
                Ok(_) => {
                    if let Err(e) = self.cache.invalidate(account).await {
                        tracing::warn!("sweep: cache invalidate failed for {}: {}", account.id, e);
                    }
                    return;
                }
                Err(e) => match backoff.next() {
                    Some(delay) => {
                        tracing::debug!(
                            "sweep: refresh failed for {}, retrying in {:?}: {}",
                            account.id,
                            delay,
                            e
                        );
                        tokio::time::sleep(*delay).await;
                    }
                    None => {
                        // Deliberately not disabling: that is the classifier's
                        // call from live traffic.
                        tracing::warn!(
                            "sweep: refresh failed permanently for {}: {}",
                            account.id,
                            e
                        );
                        return;
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::MemoryRepository;
    use crate::store::{FastStore, Keys, MemoryStore};
    use chrono::Utc;
    use modelgate_types::{Account, AuthData, AuthType, Provider};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn oauth_provider() -> Provider {
        Provider {
            id: "antigravity".to_string(),
            name: "Antigravity".to_string(),
            base_url: "https://upstream.example".to_string(),
            supported_auth_types: vec![AuthType::OAuth],
            supported_models: vec!["gemini-3-pro".to_string()],
            is_active: true,
            quota_window_secs: None,
        }
    }

    fn expiring_account(token_url: &str, id: &str) -> Account {
        let mut auth = AuthData {
            access_token: Some("old".to_string()),
            refresh_token: Some("refresh-1".to_string()),
            client_id: Some("client-1".to_string()),
            token_url: Some(token_url.to_string()),
            ..Default::default()
        };
        // Expires inside the 10-minute lead window
        auth.expires_at = Some(Utc::now().timestamp() + 60);
        Account::new(id, "antigravity", auth)
    }

    #[tokio::test]
    async fn sweep_refreshes_expiring_accounts_and_invalidates_cache() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "swept-token",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let repo = Arc::new(MemoryRepository::new());
        repo.insert_provider(oauth_provider());
        let account = expiring_account(&format!("{}/token", server.uri()), "acct-1");
        repo.insert_account(account.clone());

        // Pre-populate a stale cache entry to observe invalidation
        let key = Keys::auth("antigravity", "acct-1");
        store.set(&key, "{\"access_token\":\"stale\"}").await.unwrap();

        let cache = Arc::new(TokenCache::new(
            store.clone(),
            repo.clone(),
            Duration::from_secs(300),
        ));
        let refresher = TokenRefresher::new(cache, repo.clone(), OAuthConfig::default());
        refresher.sweep_once().await;

        let updated = repo.get_account("acct-1").await.unwrap();
        assert_eq!(updated.auth_data.access_token.as_deref(), Some("swept-token"));
        assert_eq!(store.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn sweep_skips_fresh_and_api_key_accounts() {
        let store = Arc::new(MemoryStore::new());
        let repo = Arc::new(MemoryRepository::new());
        repo.insert_provider(oauth_provider());

        let mut fresh = expiring_account("http://unused.invalid/token", "acct-fresh");
        fresh.auth_data.expires_at = Some(Utc::now().timestamp() + 24 * 3600);
        repo.insert_account(fresh);
        repo.insert_account(Account::new(
            "acct-key",
            "antigravity",
            AuthData::from_api_key("sk-1"),
        ));

        let cache = Arc::new(TokenCache::new(
            store,
            repo.clone(),
            Duration::from_secs(300),
        ));
        let refresher = TokenRefresher::new(cache, repo.clone(), OAuthConfig::default());
        // No token endpoint is reachable; a refresh attempt would error loudly,
        // and more importantly neither account qualifies for one.
        refresher.sweep_once().await;

        let untouched = repo.get_account("acct-fresh").await.unwrap();
        assert_eq!(untouched.auth_data.access_token.as_deref(), Some("old"));
    }
}
