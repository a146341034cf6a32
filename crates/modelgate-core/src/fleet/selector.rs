//! Health- and quota-aware account selection.
//!
//! Two independent block sources are both consulted so they cannot drift
//! silently: the in-memory per-model cooldown state and the quota tracker's
//! exhausted flag in the fast store. Rotation order comes from a monotonic
//! counter in the fast store, making fairness authoritative across processes
//! and restarts.

use chrono::{DateTime, Utc};
use modelgate_types::GatewayError;
use std::collections::HashSet;
use std::sync::Arc;

use super::{AccountState, AccountStateStore};
use crate::quota::QuotaTracker;
use crate::store::{FastStore, Keys};

#[derive(Debug)]
pub enum SelectError {
    /// Every account is blocked or exhausted; `retry_at` is the earliest
    /// moment one frees up.
    AllBlocked { retry_at: DateTime<Utc> },
}

impl From<SelectError> for GatewayError {
    fn from(err: SelectError) -> Self {
        match err {
            SelectError::AllBlocked { retry_at } => GatewayError::NoEligibleAccount { retry_at },
        }
    }
}

pub struct Selector {
    fleet: Arc<AccountStateStore>,
    quota: Arc<QuotaTracker>,
    store: Arc<dyn FastStore>,
}

impl Selector {
    pub fn new(
        fleet: Arc<AccountStateStore>,
        quota: Arc<QuotaTracker>,
        store: Arc<dyn FastStore>,
    ) -> Self {
        Self {
            fleet,
            quota,
            store,
        }
    }

    pub async fn select(&self, provider_id: &str, model: &str) -> Result<AccountState, SelectError> {
        self.select_excluding(provider_id, model, &HashSet::new())
            .await
    }

    /// Select with an exclusion set of already-attempted account ids, so a
    /// retry loop never lands back on the account that just failed even
    /// before its block state propagates.
    pub async fn select_excluding(
        &self,
        provider_id: &str,
        model: &str,
        exclude: &HashSet<String>,
    ) -> Result<AccountState, SelectError> {
        let now = Utc::now();
        let snapshot = self.fleet.snapshot_by_provider(provider_id);

        let mut eligible: Vec<AccountState> = Vec::new();
        for state in snapshot.iter() {
            if exclude.contains(&state.account.id) {
                continue;
            }
            if !state.account.is_active {
                continue;
            }
            if state.blocked_for(model, now).is_some() {
                continue;
            }
            if !self.quota.is_available(&state.account.id, model).await {
                continue;
            }
            eligible.push(state.clone());
        }

        if eligible.is_empty() {
            return Err(SelectError::AllBlocked {
                retry_at: self.earliest_retry(&snapshot, model).await,
            });
        }

        // Deterministic order so the shared counter yields strict cycling.
        eligible.sort_by(|a, b| a.account.id.cmp(&b.account.id));

        let index = match self.store.incr(&Keys::round_robin(provider_id, model)).await {
            Ok(counter) => ((counter - 1).rem_euclid(eligible.len() as i64)) as usize,
            Err(e) => {
                // Liveness over fairness when the store is out.
                tracing::warn!("round-robin counter unavailable, picking random: {}", e);
                rand::random::<usize>() % eligible.len()
            }
        };

        Ok(eligible.swap_remove(index))
    }

    /// Earliest of: any model-state retry time across the fleet, and the
    /// quota tracker's earliest window reset. Falls back to one minute out
    /// when nothing offers a hint.
    async fn earliest_retry(&self, snapshot: &[AccountState], model: &str) -> DateTime<Utc> {
        let state_hint = snapshot
            .iter()
            .filter_map(|state| state.retry_hint(model))
            .min();

        let account_ids: Vec<String> = snapshot
            .iter()
            .map(|state| state.account.id.clone())
            .collect();
        let quota_hint = self.quota.earliest_reset(&account_ids, model).await;

        [state_hint, quota_hint]
            .into_iter()
            .flatten()
            .min()
            .unwrap_or_else(|| Utc::now() + chrono::Duration::seconds(60))
    }
}
