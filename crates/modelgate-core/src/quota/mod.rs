//! Per-(account, model) usage tracking and learned-limit inference.
//!
//! Counters live in the fast store under a shared rolling window TTL; limits
//! are inferred from observed exhaustion events by the async learner. Reads
//! fail open: if the store is unreachable the fleet keeps serving and the
//! blast radius is bounded by provider-side limits.

pub mod learner;

use chrono::{DateTime, TimeZone, Utc};
use modelgate_types::QuotaUsage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::repo::Repository;
use crate::store::{FastStore, Keys, StoreOp};

/// Cap on concurrently running learner tasks.
const MAX_LEARNER_JOBS: usize = 16;

pub struct QuotaTracker {
    store: Arc<dyn FastStore>,
    repo: Arc<dyn Repository>,
    window_ttl: Duration,
    learner_permits: Arc<Semaphore>,
}

impl QuotaTracker {
    pub fn new(store: Arc<dyn FastStore>, repo: Arc<dyn Repository>, window_ttl: Duration) -> Self {
        Self {
            store,
            repo,
            window_ttl,
            learner_permits: Arc::new(Semaphore::new(MAX_LEARNER_JOBS)),
        }
    }

    /// Record one successful upstream call.
    ///
    /// One pipelined batch: INCR requests, EXPIRE, INCRBY tokens, EXPIRE,
    /// SETNX window start. All four keys carry the same window TTL and the
    /// batch lands atomically, so they expire together and a counter can
    /// never be left behind without its TTL. Failures are logged, never
    /// surfaced; accounting must not fail a request that already succeeded.
    pub async fn record_usage(&self, account_id: &str, model: &str, tokens: i64) {
        let requests_key = Keys::quota_requests(account_id, model);
        let tokens_key = Keys::quota_tokens(account_id, model);
        let window_key = Keys::quota_window_start(account_id, model);

        let ops = vec![
            StoreOp::Incr(requests_key.clone()),
            StoreOp::Expire(requests_key, self.window_ttl),
            StoreOp::IncrBy(tokens_key.clone(), tokens),
            StoreOp::Expire(tokens_key, self.window_ttl),
            StoreOp::SetNxEx(
                window_key,
                Utc::now().timestamp().to_string(),
                self.window_ttl,
            ),
        ];

        if let Err(e) = self.store.pipeline(ops).await {
            tracing::warn!("quota usage write failed for {}:{}: {}", account_id, model, e);
        }
    }

    /// Flag the pair exhausted for the rest of the window and hand the usage
    /// snapshot to a fire-and-forget learner job.
    pub async fn mark_exhausted(&self, account_id: &str, model: &str) {
        let usage = self.usage(account_id, model).await;

        let exhausted_key = Keys::quota_exhausted(account_id, model);
        if let Err(e) = self
            .store
            .set_ex(&exhausted_key, "true", self.window_ttl)
            .await
        {
            tracing::warn!(
                "quota exhausted flag write failed for {}:{}: {}",
                account_id,
                model,
                e
            );
        }

        let repo = Arc::clone(&self.repo);
        let permits = Arc::clone(&self.learner_permits);
        let account_id = account_id.to_string();
        let model = model.to_string();
        tokio::spawn(async move {
            // Bounds concurrent learner jobs; closed-semaphore means shutdown.
            let Ok(_permit) = permits.acquire().await else {
                return;
            };
            if let Err(e) =
                learner::learn_exhaustion(&*repo, &account_id, &model, usage.requests, usage.tokens)
                    .await
            {
                tracing::warn!("quota learner failed for {}:{}: {}", account_id, model, e);
            }
        });
    }

    /// Whether the pair has quota left in the current window.
    /// Missing flag means available; store errors fail open.
    pub async fn is_available(&self, account_id: &str, model: &str) -> bool {
        let key = Keys::quota_exhausted(account_id, model);
        match self.store.get(&key).await {
            Ok(Some(flag)) => !(flag == "true" || flag == "1"),
            Ok(None) => true,
            Err(e) => {
                tracing::warn!("quota availability read failed, failing open: {}", e);
                true
            }
        }
    }

    /// Earliest window expiry across the given accounts; used to surface a
    /// Retry-After when the whole fleet is exhausted.
    pub async fn earliest_reset(&self, account_ids: &[String], model: &str) -> Option<DateTime<Utc>> {
        let mut earliest: Option<DateTime<Utc>> = None;
        for account_id in account_ids {
            let key = Keys::quota_window_start(account_id, model);
            let Ok(Some(raw)) = self.store.get(&key).await else {
                continue;
            };
            let Ok(start) = raw.parse::<i64>() else {
                continue;
            };
            let Some(start) = Utc.timestamp_opt(start, 0).single() else {
                continue;
            };
            let reset = start + chrono::Duration::seconds(self.window_ttl.as_secs() as i64);
            earliest = Some(match earliest {
                Some(current) if current <= reset => current,
                _ => reset,
            });
        }
        earliest
    }

    /// Current window counters; zeros when the window is fresh.
    pub async fn usage(&self, account_id: &str, model: &str) -> QuotaUsage {
        let read_i64 = |key: String| {
            let store = Arc::clone(&self.store);
            async move {
                store
                    .get(&key)
                    .await
                    .ok()
                    .flatten()
                    .and_then(|v| v.parse::<i64>().ok())
            }
        };

        let requests = read_i64(Keys::quota_requests(account_id, model))
            .await
            .unwrap_or(0);
        let tokens = read_i64(Keys::quota_tokens(account_id, model))
            .await
            .unwrap_or(0);
        let window_start = read_i64(Keys::quota_window_start(account_id, model)).await;
        let exhausted = !self.is_available(account_id, model).await;

        QuotaUsage {
            requests,
            tokens,
            window_start,
            exhausted,
        }
    }

    pub fn window_ttl(&self) -> Duration {
        self.window_ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::MemoryRepository;
    use crate::store::{MemoryStore, StoreResult};
    use async_trait::async_trait;
    use modelgate_types::StoreError;

    fn tracker_with(store: Arc<dyn FastStore>) -> (QuotaTracker, Arc<MemoryRepository>) {
        let repo = Arc::new(MemoryRepository::new());
        (
            QuotaTracker::new(store, repo.clone(), Duration::from_secs(5 * 3600)),
            repo,
        )
    }

    #[tokio::test]
    async fn record_usage_accumulates_counters() {
        let store = Arc::new(MemoryStore::new());
        let (tracker, _repo) = tracker_with(store);

        tracker.record_usage("a1", "m1", 100).await;
        tracker.record_usage("a1", "m1", 150).await;

        let usage = tracker.usage("a1", "m1").await;
        assert_eq!(usage.requests, 2);
        assert_eq!(usage.tokens, 250);
        assert!(usage.window_start.is_some());
        assert!(!usage.exhausted);
    }

    #[tokio::test]
    async fn window_start_is_set_once() {
        let store = Arc::new(MemoryStore::new());
        let (tracker, _repo) = tracker_with(store.clone());

        tracker.record_usage("a1", "m1", 10).await;
        let first = tracker.usage("a1", "m1").await.window_start;
        tokio::time::sleep(Duration::from_millis(5)).await;
        tracker.record_usage("a1", "m1", 10).await;
        let second = tracker.usage("a1", "m1").await.window_start;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn exhausted_flag_blocks_until_window_expiry() {
        let store = Arc::new(MemoryStore::new());
        let (tracker, _repo) = tracker_with(store.clone());

        assert!(tracker.is_available("a1", "m1").await);
        tracker.mark_exhausted("a1", "m1").await;
        assert!(!tracker.is_available("a1", "m1").await);

        // Window TTL elapsing clears all quota keys together
        store.force_expire(&Keys::quota_exhausted("a1", "m1"));
        assert!(tracker.is_available("a1", "m1").await);
    }

    #[tokio::test]
    async fn earliest_reset_is_minimum_across_accounts() {
        let store = Arc::new(MemoryStore::new());
        let (tracker, _repo) = tracker_with(store.clone());
        let now = Utc::now().timestamp();

        store
            .set(&Keys::quota_window_start("a1", "m1"), &(now - 100).to_string())
            .await
            .unwrap();
        store
            .set(&Keys::quota_window_start("a2", "m1"), &(now - 2000).to_string())
            .await
            .unwrap();

        let reset = tracker
            .earliest_reset(&["a1".to_string(), "a2".to_string()], "m1")
            .await
            .unwrap();
        // a2's window opened earlier, so it resets first
        let expected = Utc.timestamp_opt(now - 2000, 0).single().unwrap()
            + chrono::Duration::seconds(5 * 3600);
        assert_eq!(reset, expected);
    }

    struct FailingStore;

    #[async_trait]
    impl FastStore for FailingStore {
        async fn get(&self, _key: &str) -> StoreResult<Option<String>> {
            Err(StoreError::Backend("connection refused".to_string()))
        }
        async fn set(&self, _key: &str, _value: &str) -> StoreResult<()> {
            Err(StoreError::Backend("connection refused".to_string()))
        }
        async fn set_ex(&self, _key: &str, _value: &str, _ttl: Duration) -> StoreResult<()> {
            Err(StoreError::Backend("connection refused".to_string()))
        }
        async fn set_nx_ex(&self, _key: &str, _value: &str, _ttl: Duration) -> StoreResult<bool> {
            Err(StoreError::Backend("connection refused".to_string()))
        }
        async fn incr(&self, _key: &str) -> StoreResult<i64> {
            Err(StoreError::Backend("connection refused".to_string()))
        }
        async fn incr_by(&self, _key: &str, _delta: i64) -> StoreResult<i64> {
            Err(StoreError::Backend("connection refused".to_string()))
        }
        async fn expire(&self, _key: &str, _ttl: Duration) -> StoreResult<()> {
            Err(StoreError::Backend("connection refused".to_string()))
        }
        async fn del(&self, _key: &str) -> StoreResult<()> {
            Err(StoreError::Backend("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn store_outage_fails_open() {
        let (tracker, _repo) = tracker_with(Arc::new(FailingStore));
        assert!(tracker.is_available("a1", "m1").await);
    }
}
