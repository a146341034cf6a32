use super::{test_account, test_store};
use crate::fleet::Selector;
use crate::quota::QuotaTracker;
use crate::repo::MemoryRepository;
use crate::store::MemoryStore;
use crate::fleet::SelectError;
use chrono::Utc;
use modelgate_types::{ErrorKind, ParsedError};
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
    fleet: Arc<crate::fleet::AccountStateStore>,
    quota: Arc<QuotaTracker>,
    selector: Selector,
}

fn fixture(account_ids: &[&str]) -> Fixture {
    let fleet = Arc::new(test_store());
    for id in account_ids {
        fleet.add_account(test_account(id, "p1"));
    }
    let store = Arc::new(MemoryStore::new());
    let repo = Arc::new(MemoryRepository::new());
    let quota = Arc::new(QuotaTracker::new(
        store.clone(),
        repo,
        Duration::from_secs(5 * 3600),
    ));
    let selector = Selector::new(fleet.clone(), quota.clone(), store);
    Fixture {
        fleet,
        quota,
        selector,
    }
}

#[tokio::test]
async fn round_robin_cycles_strictly_and_fairly() {
    let f = fixture(&["a", "b", "c"]);

    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut order = Vec::new();
    for _ in 0..6 {
        let picked = f.selector.select("p1", "m1").await.unwrap();
        *counts.entry(picked.account.id.clone()).or_insert(0) += 1;
        order.push(picked.account.id);
    }

    // Equal frequency
    assert_eq!(counts["a"], 2);
    assert_eq!(counts["b"], 2);
    assert_eq!(counts["c"], 2);
    // Strict cycling: second half repeats the first
    assert_eq!(order[..3], order[3..]);
    assert_eq!(
        order[..3].iter().collect::<HashSet<_>>().len(),
        3,
        "first cycle visits each account once"
    );
}

#[tokio::test]
async fn rate_limited_account_is_skipped_until_cooldown_expires() {
    let f = fixture(&["a", "b"]);

    f.fleet.mark_result(
        "a",
        "m1",
        &ParsedError::new(ErrorKind::RateLimit, Some(Duration::from_millis(50)), "429"),
    );

    // While blocked, every selection lands on b
    for _ in 0..3 {
        let picked = f.selector.select("p1", "m1").await.unwrap();
        assert_eq!(picked.account.id, "b");
    }

    tokio::time::sleep(Duration::from_millis(60)).await;
    let mut seen = HashSet::new();
    for _ in 0..2 {
        seen.insert(f.selector.select("p1", "m1").await.unwrap().account.id);
    }
    assert!(seen.contains("a"), "account re-enters rotation after cooldown");
}

#[tokio::test]
async fn model_cooldown_does_not_affect_other_models() {
    let f = fixture(&["a"]);

    f.fleet.mark_result(
        "a",
        "m1",
        &ParsedError::new(ErrorKind::RateLimit, Some(Duration::from_secs(60)), "429"),
    );

    assert!(f.selector.select("p1", "m1").await.is_err());
    assert!(f.selector.select("p1", "m2").await.is_ok());
}

#[tokio::test]
async fn quota_exhausted_flag_excludes_account() {
    let f = fixture(&["a", "b"]);
    f.quota.mark_exhausted("a", "m1").await;

    for _ in 0..3 {
        let picked = f.selector.select("p1", "m1").await.unwrap();
        assert_eq!(picked.account.id, "b");
    }
}

#[tokio::test]
async fn all_blocked_returns_earliest_retry_time() {
    let f = fixture(&["a", "b"]);

    // a frees up in ~10s, b in ~60s
    f.fleet.mark_result(
        "a",
        "m1",
        &ParsedError::new(ErrorKind::RateLimit, Some(Duration::from_secs(10)), "429"),
    );
    f.fleet.mark_result(
        "b",
        "m1",
        &ParsedError::new(ErrorKind::RateLimit, Some(Duration::from_secs(60)), "429"),
    );

    let err = f.selector.select("p1", "m1").await.unwrap_err();
    let SelectError::AllBlocked { retry_at } = err;
    let wait = (retry_at - Utc::now()).num_seconds();
    assert!((8..=11).contains(&wait), "retry_at tracks the earlier cooldown, got {wait}s");
}

#[tokio::test]
async fn disabled_account_is_skipped_for_every_model() {
    let f = fixture(&["a", "b"]);

    f.fleet.mark_result(
        "a",
        "m1",
        &ParsedError::new(ErrorKind::AuthFailed, Some(Duration::from_secs(1800)), "401"),
    );

    for model in ["m1", "m2", "m3"] {
        let picked = f.selector.select("p1", model).await.unwrap();
        assert_eq!(picked.account.id, "b");
    }
}

#[tokio::test]
async fn exclusion_set_prevents_reselecting_failed_account() {
    let f = fixture(&["a", "b"]);

    let mut exclude = HashSet::new();
    exclude.insert("a".to_string());
    for _ in 0..3 {
        let picked = f
            .selector
            .select_excluding("p1", "m1", &exclude)
            .await
            .unwrap();
        assert_eq!(picked.account.id, "b");
    }

    exclude.insert("b".to_string());
    assert!(f
        .selector
        .select_excluding("p1", "m1", &exclude)
        .await
        .is_err());
}

#[tokio::test]
async fn counter_persists_across_selector_instances() {
    let fleet = Arc::new(test_store());
    fleet.add_account(test_account("a", "p1"));
    fleet.add_account(test_account("b", "p1"));
    let store = Arc::new(MemoryStore::new());
    let repo = Arc::new(MemoryRepository::new());
    let quota = Arc::new(QuotaTracker::new(
        store.clone(),
        repo.clone(),
        Duration::from_secs(5 * 3600),
    ));

    let first = Selector::new(fleet.clone(), quota.clone(), store.clone())
        .select("p1", "m1")
        .await
        .unwrap();

    // A fresh selector over the same store continues the rotation rather
    // than restarting it.
    let second = Selector::new(fleet, quota, store)
        .select("p1", "m1")
        .await
        .unwrap();
    assert_ne!(first.account.id, second.account.id);
}
