//! Asynchronous request audit log and per-proxy counters.
//!
//! Recording never blocks or fails the request path: entries go down an
//! unbounded channel to a writer task that persists the log row and bumps the
//! per-proxy day counters in the fast store. Write failures are logged and
//! dropped.

use modelgate_types::RequestLogEntry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::repo::Repository;
use crate::store::{FastStore, Keys};

const DAY_COUNTER_TTL: Duration = Duration::from_secs(24 * 3600);

#[derive(Clone)]
pub struct StatsWriter {
    tx: mpsc::UnboundedSender<RequestLogEntry>,
}

impl StatsWriter {
    /// Spawn the writer task. Dropping every `StatsWriter` clone drains and
    /// stops it; await the handle for a clean shutdown.
    pub fn spawn(
        repo: Arc<dyn Repository>,
        store: Arc<dyn FastStore>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<RequestLogEntry>();

        let task = tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                if let Err(e) = repo.insert_request_log(&entry).await {
                    tracing::warn!("request log write failed: {}", e);
                }

                if let Some(proxy_id) = &entry.proxy_id {
                    bump_counter(&*store, &Keys::proxy_requests_today(proxy_id)).await;
                    if entry.status_code >= 400 {
                        bump_counter(&*store, &Keys::proxy_errors_today(proxy_id)).await;
                    }
                }
            }
            tracing::debug!("stats writer drained");
        });

        (Self { tx }, task)
    }

    /// Fire-and-forget; a closed channel only means shutdown is in progress.
    pub fn record(&self, entry: RequestLogEntry) {
        if self.tx.send(entry).is_err() {
            tracing::debug!("stats writer closed; dropping log entry");
        }
    }
}

async fn bump_counter(store: &dyn FastStore, key: &str) {
    match store.incr(key).await {
        Ok(1) => {
            // First hit today starts the 24h window
            if let Err(e) = store.expire(key, DAY_COUNTER_TTL).await {
                tracing::warn!("stats counter TTL failed for {}: {}", key, e);
            }
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("stats counter incr failed for {}: {}", key, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::MemoryRepository;
    use crate::store::MemoryStore;
    use chrono::Utc;

    fn entry(proxy_id: Option<&str>, status: i32) -> RequestLogEntry {
        RequestLogEntry {
            account_id: Some("a1".to_string()),
            proxy_id: proxy_id.map(String::from),
            provider_id: Some("p1".to_string()),
            model: "m1".to_string(),
            status_code: status,
            latency_ms: 12,
            retry_count: 0,
            switched_from_account_id: None,
            error: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn entries_are_persisted_and_counters_bumped() {
        let repo = Arc::new(MemoryRepository::new());
        let store = Arc::new(MemoryStore::new());
        let (writer, task) = StatsWriter::spawn(repo.clone(), store.clone());

        writer.record(entry(Some("px"), 200));
        writer.record(entry(Some("px"), 502));
        writer.record(entry(None, 200));

        drop(writer);
        task.await.unwrap();

        assert_eq!(repo.request_logs().len(), 3);
        assert_eq!(
            store
                .get(&Keys::proxy_requests_today("px"))
                .await
                .unwrap()
                .as_deref(),
            Some("2")
        );
        assert_eq!(
            store
                .get(&Keys::proxy_errors_today("px"))
                .await
                .unwrap()
                .as_deref(),
            Some("1")
        );
    }
}
