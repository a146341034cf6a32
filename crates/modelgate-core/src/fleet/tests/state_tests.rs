use super::{test_account, test_store};
use crate::fleet::BlockReason;
use chrono::Utc;
use modelgate_types::{ErrorKind, ParsedError};
use std::time::Duration;

#[test]
fn success_clears_block_and_resets_backoff() {
    let store = test_store();
    store.add_account(test_account("a1", "p1"));

    let quota_err = ParsedError::new(ErrorKind::QuotaExceeded, None, "quota");
    store.mark_result("a1", "m1", &quota_err);
    store.mark_result("a1", "m1", &quota_err);
    let state = store.get("a1").unwrap();
    assert_eq!(state.quota_state.backoff_multiplier, 4);
    assert!(state.blocked_for("m1", Utc::now()).is_some());

    store.mark_result("a1", "m1", &ParsedError::success());
    let state = store.get("a1").unwrap();
    assert_eq!(state.quota_state.backoff_multiplier, 1);
    assert!(state.blocked_for("m1", Utc::now()).is_none());
    assert_eq!(state.model_states["m1"].success_count, 1);
    assert_eq!(state.model_states["m1"].block_reason, BlockReason::None);
}

#[test]
fn rate_limit_cooldown_honors_parsed_duration() {
    let store = test_store();
    store.add_account(test_account("a1", "p1"));

    let parsed = ParsedError::new(
        ErrorKind::RateLimit,
        Some(Duration::from_secs(5)),
        "429 slow down",
    );
    let before = Utc::now();
    store.mark_result("a1", "m1", &parsed);

    let state = store.get("a1").unwrap();
    assert_eq!(state.blocked_for("m1", Utc::now()), Some(BlockReason::Cooldown));
    let retry_at = state.model_states["m1"].next_retry_after.unwrap();
    let delta = (retry_at - before).num_seconds();
    assert!((4..=6).contains(&delta), "cooldown ~5s, got {delta}");

    // After the cooldown elapses the account is eligible again
    assert!(state
        .blocked_for("m1", Utc::now() + chrono::Duration::seconds(6))
        .is_none());
}

#[test]
fn quota_backoff_doubles_and_clamps() {
    let store = test_store();
    store.add_account(test_account("a1", "p1"));
    let quota_err = ParsedError::new(ErrorKind::QuotaExceeded, None, "quota");

    // First hit blocks for the base backoff (60s), multiplier then doubles
    let before = Utc::now();
    store.mark_result("a1", "m1", &quota_err);
    let state = store.get("a1").unwrap();
    let first = (state.model_states["m1"].next_retry_after.unwrap() - before).num_seconds();
    assert!((59..=61).contains(&first));
    assert_eq!(state.quota_state.backoff_multiplier, 2);
    assert_eq!(state.blocked_for("m1", Utc::now()), Some(BlockReason::Quota));

    // Backoff never exceeds the configured max (3600s)
    for _ in 0..12 {
        store.mark_result("a1", "m1", &quota_err);
    }
    let state = store.get("a1").unwrap();
    let capped = state.quota_state.next_backoff();
    assert_eq!(capped.num_seconds(), 3600);
}

#[test]
fn auth_failure_disables_account_for_all_models() {
    let store = test_store();
    store.add_account(test_account("a1", "p1"));

    let parsed = ParsedError::new(
        ErrorKind::AuthFailed,
        Some(Duration::from_secs(30 * 60)),
        "401 unauthorized",
    );
    store.mark_result("a1", "m1", &parsed);

    let state = store.get("a1").unwrap();
    assert!(state.disabled);
    // Disabled blocks every model, not just the one that failed
    assert_eq!(state.blocked_for("m1", Utc::now()), Some(BlockReason::Disabled));
    assert_eq!(state.blocked_for("other-model", Utc::now()), Some(BlockReason::Disabled));
    let retry_at = state.model_states["m1"].next_retry_after.unwrap();
    assert!(retry_at > Utc::now() + chrono::Duration::minutes(29));
}

#[test]
fn invalid_request_never_blocks() {
    let store = test_store();
    store.add_account(test_account("a1", "p1"));

    let parsed = ParsedError::new(ErrorKind::InvalidRequest, None, "400 bad payload");
    store.mark_result("a1", "m1", &parsed);

    let state = store.get("a1").unwrap();
    assert!(state.blocked_for("m1", Utc::now()).is_none());
    assert!(state.model_states["m1"].next_retry_after.is_none());
    assert_eq!(state.model_states["m1"].failure_count, 1);
}

#[test]
fn transient_applies_one_minute_cooldown() {
    let store = test_store();
    store.add_account(test_account("a1", "p1"));

    let parsed = ParsedError::new(
        ErrorKind::Transient,
        Some(Duration::from_secs(60)),
        "503 overloaded",
    );
    let before = Utc::now();
    store.mark_result("a1", "m1", &parsed);

    let state = store.get("a1").unwrap();
    let retry_at = state.model_states["m1"].next_retry_after.unwrap();
    let delta = (retry_at - before).num_seconds();
    assert!((59..=61).contains(&delta));
}

#[tokio::test]
async fn sync_keeps_block_state_for_surviving_accounts() {
    use crate::repo::{MemoryRepository, Repository};
    use modelgate_types::{AuthType, Provider};
    use std::sync::Arc;

    let repo = Arc::new(MemoryRepository::new());
    repo.insert_provider(Provider {
        id: "p1".to_string(),
        name: "P1".to_string(),
        base_url: "https://p1.example".to_string(),
        supported_auth_types: vec![AuthType::ApiKey],
        supported_models: vec![],
        is_active: true,
        quota_window_secs: None,
    });
    repo.insert_account(test_account("a1", "p1"));
    repo.insert_account(test_account("a2", "p1"));

    let store = Arc::new(test_store());
    store.sync_from_repo(&*repo).await.unwrap();
    assert_eq!(store.len(), 2);

    // Block a1, then delete a2 externally and re-sync
    store.mark_result(
        "a1",
        "m1",
        &modelgate_types::ParsedError::new(ErrorKind::RateLimit, Some(Duration::from_secs(60)), ""),
    );
    repo.delete_account("a2").await.unwrap();
    store.sync_from_repo(&*repo).await.unwrap();

    assert_eq!(store.len(), 1);
    assert!(store.get("a2").is_none());
    // a1's cooldown survived the reload
    assert!(store
        .get("a1")
        .unwrap()
        .blocked_for("m1", Utc::now())
        .is_some());
}
