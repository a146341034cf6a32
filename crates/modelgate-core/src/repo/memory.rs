//! In-memory repository for tests and single-node development.

use async_trait::async_trait;
use dashmap::DashMap;
use modelgate_types::error::{RepoResult, RepositoryError};
use modelgate_types::{
    Account, AuthData, ModelMapping, Provider, ProxyServer, QuotaPattern, RequestLogEntry,
};
use std::sync::Mutex;

use super::Repository;

#[derive(Default)]
pub struct MemoryRepository {
    accounts: DashMap<String, Account>,
    providers: DashMap<String, Provider>,
    proxies: DashMap<String, ProxyServer>,
    mappings: DashMap<String, ModelMapping>,
    patterns: DashMap<(String, String), QuotaPattern>,
    request_logs: Mutex<Vec<RequestLogEntry>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_account(&self, account: Account) {
        self.accounts.insert(account.id.clone(), account);
    }

    pub fn insert_provider(&self, provider: Provider) {
        self.providers.insert(provider.id.clone(), provider);
    }

    pub fn insert_proxy(&self, proxy: ProxyServer) {
        self.proxies.insert(proxy.id.clone(), proxy);
    }

    pub fn insert_mapping(&self, mapping: ModelMapping) {
        self.mappings.insert(mapping.alias.clone(), mapping);
    }

    /// Test hook: inspect what the stats writer persisted.
    pub fn request_logs(&self) -> Vec<RequestLogEntry> {
        self.request_logs.lock().expect("log mutex").clone()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn list_active_accounts(&self, provider_id: &str) -> RepoResult<Vec<Account>> {
        Ok(self
            .accounts
            .iter()
            .filter(|e| e.provider_id == provider_id && e.is_active)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn get_account(&self, id: &str) -> RepoResult<Account> {
        self.accounts
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }

    async fn create_account(&self, account: &Account) -> RepoResult<()> {
        if self.accounts.contains_key(&account.id) {
            return Err(RepositoryError::AlreadyExists(account.id.clone()));
        }
        self.accounts.insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn delete_account(&self, id: &str) -> RepoResult<()> {
        self.accounts.remove(id);
        Ok(())
    }

    async fn update_auth_data(&self, account_id: &str, auth: &AuthData) -> RepoResult<()> {
        let mut entry = self
            .accounts
            .get_mut(account_id)
            .ok_or_else(|| RepositoryError::NotFound(account_id.to_string()))?;
        entry.auth_data = auth.clone();
        entry.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn set_account_active(&self, account_id: &str, active: bool) -> RepoResult<()> {
        if let Some(mut entry) = self.accounts.get_mut(account_id) {
            entry.is_active = active;
            entry.updated_at = chrono::Utc::now();
        }
        Ok(())
    }

    async fn list_providers(&self) -> RepoResult<Vec<Provider>> {
        Ok(self
            .providers
            .iter()
            .filter(|e| e.is_active)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn get_provider(&self, id: &str) -> RepoResult<Provider> {
        self.providers
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }

    async fn list_proxies(&self) -> RepoResult<Vec<ProxyServer>> {
        Ok(self.proxies.iter().map(|e| e.value().clone()).collect())
    }

    async fn update_proxy(&self, proxy: &ProxyServer) -> RepoResult<()> {
        self.proxies.insert(proxy.id.clone(), proxy.clone());
        Ok(())
    }

    async fn count_accounts_per_proxy(&self) -> RepoResult<Vec<(String, i64)>> {
        let mut counts: std::collections::HashMap<String, i64> = std::collections::HashMap::new();
        for entry in self.accounts.iter() {
            if let Some(proxy_id) = &entry.proxy_id {
                *counts.entry(proxy_id.clone()).or_insert(0) += 1;
            }
        }
        Ok(counts.into_iter().collect())
    }

    async fn find_mapping(&self, alias: &str) -> RepoResult<Option<ModelMapping>> {
        Ok(self
            .mappings
            .get(alias)
            .filter(|m| m.enabled)
            .map(|m| m.value().clone()))
    }

    async fn upsert_mapping(&self, mapping: &ModelMapping) -> RepoResult<()> {
        self.mappings.insert(mapping.alias.clone(), mapping.clone());
        Ok(())
    }

    async fn delete_mapping(&self, alias: &str) -> RepoResult<()> {
        self.mappings.remove(alias);
        Ok(())
    }

    async fn get_quota_pattern(
        &self,
        account_id: &str,
        model: &str,
    ) -> RepoResult<Option<QuotaPattern>> {
        Ok(self
            .patterns
            .get(&(account_id.to_string(), model.to_string()))
            .map(|p| p.value().clone()))
    }

    async fn upsert_quota_pattern(&self, pattern: &QuotaPattern) -> RepoResult<()> {
        self.patterns.insert(
            (pattern.account_id.clone(), pattern.model.clone()),
            pattern.clone(),
        );
        Ok(())
    }

    async fn list_quota_patterns(&self) -> RepoResult<Vec<QuotaPattern>> {
        Ok(self.patterns.iter().map(|e| e.value().clone()).collect())
    }

    async fn insert_request_log(&self, entry: &RequestLogEntry) -> RepoResult<()> {
        self.request_logs
            .lock()
            .map_err(|_| RepositoryError::Database("log mutex poisoned".to_string()))?
            .push(entry.clone());
        Ok(())
    }
}
