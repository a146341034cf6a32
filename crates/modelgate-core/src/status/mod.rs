//! Read-only fleet health snapshots for the admin/status API.
//!
//! Everything here is derived from the account state store, the quota
//! tracker, and the proxy pool; nothing mutates.

use chrono::{DateTime, Utc};
use modelgate_types::error::RepoResult;
use modelgate_types::{ProxyServer, QuotaUsage};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::fleet::{AccountStateStore, ModelState};
use crate::proxy_pool::ProxyPool;
use crate::quota::{learner, QuotaTracker};
use crate::repo::Repository;
use crate::store::{FastStore, Keys};

#[derive(Debug, Serialize)]
pub struct AccountStatus {
    pub account_id: String,
    pub provider_id: String,
    pub label: String,
    pub is_active: bool,
    pub disabled: bool,
    pub proxy_id: Option<String>,
    pub models: HashMap<String, ModelState>,
}

#[derive(Debug, Serialize)]
pub struct QuotaStatus {
    pub account_id: String,
    pub model: String,
    pub est_request_limit: Option<i64>,
    pub est_token_limit: Option<i64>,
    pub confidence: f64,
    /// Confidence after staleness decay; what operators should trust.
    pub decayed_confidence: f64,
    pub sample_count: i32,
    pub last_exhausted_at: Option<DateTime<Utc>>,
    pub current_window: QuotaUsage,
}

#[derive(Debug, Serialize)]
pub struct ProxyStatus {
    #[serde(flatten)]
    pub proxy: ProxyServer,
    pub requests_today: i64,
    pub errors_today: i64,
}

pub struct StatusService {
    fleet: Arc<AccountStateStore>,
    quota: Arc<QuotaTracker>,
    proxies: Arc<ProxyPool>,
    repo: Arc<dyn Repository>,
    store: Arc<dyn FastStore>,
}

impl StatusService {
    pub fn new(
        fleet: Arc<AccountStateStore>,
        quota: Arc<QuotaTracker>,
        proxies: Arc<ProxyPool>,
        repo: Arc<dyn Repository>,
        store: Arc<dyn FastStore>,
    ) -> Self {
        Self {
            fleet,
            quota,
            proxies,
            repo,
            store,
        }
    }

    pub fn fleet_snapshot(&self) -> Vec<AccountStatus> {
        let mut statuses: Vec<AccountStatus> = self
            .fleet
            .snapshot_all()
            .into_iter()
            .map(|state| AccountStatus {
                account_id: state.account.id,
                provider_id: state.account.provider_id,
                label: state.account.label,
                is_active: state.account.is_active,
                disabled: state.disabled,
                proxy_id: state.account.proxy_id,
                models: state.model_states,
            })
            .collect();
        statuses.sort_by(|a, b| a.account_id.cmp(&b.account_id));
        statuses
    }

    pub async fn quota_snapshot(&self) -> RepoResult<Vec<QuotaStatus>> {
        let now = Utc::now();
        let patterns = self.repo.list_quota_patterns().await?;
        let mut statuses = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let current_window = self.quota.usage(&pattern.account_id, &pattern.model).await;
            statuses.push(QuotaStatus {
                decayed_confidence: learner::decayed_confidence(&pattern, now),
                account_id: pattern.account_id,
                model: pattern.model,
                est_request_limit: pattern.est_request_limit,
                est_token_limit: pattern.est_token_limit,
                confidence: pattern.confidence,
                sample_count: pattern.sample_count,
                last_exhausted_at: pattern.last_exhausted_at,
                current_window,
            });
        }
        Ok(statuses)
    }

    pub async fn proxy_snapshot(&self) -> Vec<ProxyStatus> {
        let mut statuses = Vec::new();
        for proxy in self.proxies.snapshot() {
            let requests_today = self
                .read_counter(&Keys::proxy_requests_today(&proxy.id))
                .await;
            let errors_today = self.read_counter(&Keys::proxy_errors_today(&proxy.id)).await;
            statuses.push(ProxyStatus {
                proxy,
                requests_today,
                errors_today,
            });
        }
        statuses.sort_by(|a, b| a.proxy.id.cmp(&b.proxy.id));
        statuses
    }

    async fn read_counter(&self, key: &str) -> i64 {
        self.store
            .get(key)
            .await
            .ok()
            .flatten()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyPoolConfig;
    use crate::repo::MemoryRepository;
    use crate::store::MemoryStore;
    use modelgate_types::{Account, AuthData, ErrorKind, ParsedError};
    use std::time::Duration;

    #[tokio::test]
    async fn fleet_snapshot_reflects_block_state() {
        let fleet = Arc::new(AccountStateStore::new(60, 3600));
        fleet.add_account(Account::new("a1", "p1", AuthData::from_api_key("k")));
        fleet.mark_result(
            "a1",
            "m1",
            &ParsedError::new(ErrorKind::RateLimit, Some(Duration::from_secs(30)), "429"),
        );

        let store = Arc::new(MemoryStore::new());
        let repo = Arc::new(MemoryRepository::new());
        let quota = Arc::new(QuotaTracker::new(
            store.clone(),
            repo.clone(),
            Duration::from_secs(5 * 3600),
        ));
        let proxies = Arc::new(ProxyPool::new(repo.clone(), ProxyPoolConfig::default()));
        let service = StatusService::new(fleet, quota, proxies, repo, store);

        let snapshot = service.fleet_snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].account_id, "a1");
        assert!(snapshot[0].models.contains_key("m1"));
        assert_eq!(snapshot[0].models["m1"].failure_count, 1);
    }

    #[tokio::test]
    async fn quota_snapshot_decays_stale_confidence() {
        let store = Arc::new(MemoryStore::new());
        let repo = Arc::new(MemoryRepository::new());
        let mut pattern = modelgate_types::QuotaPattern::empty("a1", "m1");
        pattern.confidence = 0.8;
        pattern.sample_count = 8;
        pattern.est_request_limit = Some(100);
        pattern.last_exhausted_at = Some(Utc::now() - chrono::Duration::days(8));
        repo.upsert_quota_pattern(&pattern).await.unwrap();

        let fleet = Arc::new(AccountStateStore::new(60, 3600));
        let quota = Arc::new(QuotaTracker::new(
            store.clone(),
            repo.clone(),
            Duration::from_secs(5 * 3600),
        ));
        let proxies = Arc::new(ProxyPool::new(repo.clone(), ProxyPoolConfig::default()));
        let service = StatusService::new(fleet, quota, proxies, repo, store);

        let snapshot = service.quota_snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].confidence, 0.8);
        assert_eq!(snapshot[0].decayed_confidence, 0.4);
    }
}
