//! In-memory fleet state: the single owner of per-account block state.
//!
//! Every other component either takes snapshots (`snapshot_by_provider`) or
//! funnels writes through `mark_result`. Disagreements between nodes are
//! tolerated and self-correct via mark_result on live traffic; the shared
//! fast store stays authoritative for anything cross-process.

mod selector;
mod state;

pub use selector::{SelectError, Selector};
pub use state::{AccountState, BlockReason, ModelState, QuotaState};

use chrono::Utc;
use dashmap::DashMap;
use modelgate_types::error::RepoResult;
use modelgate_types::{Account, ParsedError};

use crate::repo::Repository;

pub struct AccountStateStore {
    states: DashMap<String, AccountState>,
    quota_base_secs: u64,
    quota_max_secs: u64,
}

impl AccountStateStore {
    pub fn new(quota_base_secs: u64, quota_max_secs: u64) -> Self {
        Self {
            states: DashMap::new(),
            quota_base_secs,
            quota_max_secs,
        }
    }

    /// Snapshot of every account for a provider. Cloned out so callers never
    /// hold map guards across await points.
    pub fn snapshot_by_provider(&self, provider_id: &str) -> Vec<AccountState> {
        self.states
            .iter()
            .filter(|entry| entry.account.provider_id == provider_id)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn get(&self, account_id: &str) -> Option<AccountState> {
        self.states.get(account_id).map(|entry| entry.value().clone())
    }

    /// Snapshot of the whole fleet, for the status API.
    pub fn snapshot_all(&self) -> Vec<AccountState> {
        self.states.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Apply one classified result. Writers are exclusive per entry.
    pub fn mark_result(&self, account_id: &str, model: &str, parsed: &ParsedError) {
        if let Some(mut entry) = self.states.get_mut(account_id) {
            entry.apply_result(model, parsed, Utc::now());
        } else {
            tracing::debug!("mark_result for unknown account {}", account_id);
        }
    }

    /// Hot-reload hook for external account creation.
    pub fn add_account(&self, account: Account) {
        let id = account.id.clone();
        self.states.insert(
            id,
            AccountState::new(account, self.quota_base_secs, self.quota_max_secs),
        );
    }

    /// Hot-reload hook for external account deletion.
    pub fn remove_account(&self, account_id: &str) {
        self.states.remove(account_id);
    }

    /// Refresh the account snapshots from persistence, keeping live block
    /// state for accounts that survive. New accounts appear, deleted ones
    /// drop out, changed rows replace only the `account` field.
    pub async fn sync_from_repo(&self, repo: &dyn Repository) -> RepoResult<usize> {
        let providers = repo.list_providers().await?;
        let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
        let mut count = 0;

        for provider in providers {
            let accounts = repo.list_active_accounts(&provider.id).await?;
            for account in accounts {
                seen.insert(account.id.clone());
                count += 1;
                match self.states.get_mut(&account.id) {
                    Some(mut entry) => {
                        entry.account = account;
                    }
                    None => self.add_account(account),
                }
            }
        }

        self.states.retain(|id, _| seen.contains(id));
        Ok(count)
    }

    /// Spawn the periodic account sync task so external CRUD is picked up.
    pub fn start_auto_sync(
        self: &std::sync::Arc<Self>,
        repo: std::sync::Arc<dyn Repository>,
        interval: std::time::Duration,
    ) -> tokio::task::JoinHandle<()> {
        let store = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // Accounts are loaded at startup; skip the immediate tick.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match store.sync_from_repo(&*repo).await {
                    Ok(count) => {
                        tracing::debug!("fleet auto-sync: {} account(s) refreshed", count);
                    }
                    Err(e) => {
                        tracing::warn!("fleet auto-sync failed: {}", e);
                    }
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests;
