//! Persistent-store abstraction.
//!
//! The core talks to PostgreSQL through this trait; tests substitute the
//! in-memory implementation. Only the slices of persistence the pipeline
//! needs appear here; user/API-key tables and migrations are external.

mod memory;
mod pg;

pub use memory::MemoryRepository;
pub use pg::PgRepository;

use async_trait::async_trait;
use modelgate_types::error::RepoResult;
use modelgate_types::{Account, AuthData, ModelMapping, Provider, ProxyServer, QuotaPattern, RequestLogEntry};

#[async_trait]
pub trait Repository: Send + Sync {
    // --- accounts ---
    async fn list_active_accounts(&self, provider_id: &str) -> RepoResult<Vec<Account>>;
    async fn get_account(&self, id: &str) -> RepoResult<Account>;
    async fn create_account(&self, account: &Account) -> RepoResult<()>;
    async fn delete_account(&self, id: &str) -> RepoResult<()>;
    /// Persist a refreshed credential bag; bumps `updated_at`.
    async fn update_auth_data(&self, account_id: &str, auth: &AuthData) -> RepoResult<()>;
    /// Flip the active flag (auth-failure disable, operator re-enable).
    async fn set_account_active(&self, account_id: &str, active: bool) -> RepoResult<()>;

    // --- providers ---
    async fn list_providers(&self) -> RepoResult<Vec<Provider>>;
    async fn get_provider(&self, id: &str) -> RepoResult<Provider>;

    // --- proxies ---
    async fn list_proxies(&self) -> RepoResult<Vec<ProxyServer>>;
    async fn update_proxy(&self, proxy: &ProxyServer) -> RepoResult<()>;
    /// (proxy_id, bound account count) pairs for count recalculation.
    async fn count_accounts_per_proxy(&self) -> RepoResult<Vec<(String, i64)>>;

    // --- model mappings ---
    /// Highest-priority enabled mapping for the alias, if any.
    async fn find_mapping(&self, alias: &str) -> RepoResult<Option<ModelMapping>>;
    async fn upsert_mapping(&self, mapping: &ModelMapping) -> RepoResult<()>;
    async fn delete_mapping(&self, alias: &str) -> RepoResult<()>;

    // --- quota patterns ---
    async fn get_quota_pattern(&self, account_id: &str, model: &str)
        -> RepoResult<Option<QuotaPattern>>;
    async fn upsert_quota_pattern(&self, pattern: &QuotaPattern) -> RepoResult<()>;
    async fn list_quota_patterns(&self) -> RepoResult<Vec<QuotaPattern>>;

    // --- request log (append-only) ---
    async fn insert_request_log(&self, entry: &RequestLogEntry) -> RepoResult<()>;
}
