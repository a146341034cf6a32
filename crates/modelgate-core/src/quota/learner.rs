//! Learned quota limits.
//!
//! Each exhaustion event carries the usage snapshot at the moment the
//! provider said no. The first event seeds the estimates; later events fold
//! in via a confidence-weighted average, so noisy observations move the
//! estimate less as the sample count grows. Last writer wins across
//! concurrent learners, which the averaging tolerates.

use chrono::{DateTime, Duration, Utc};
use modelgate_types::error::RepoResult;
use modelgate_types::QuotaPattern;

use crate::repo::Repository;

/// Fold one exhaustion observation into the persistent pattern.
pub async fn learn_exhaustion(
    repo: &dyn Repository,
    account_id: &str,
    model: &str,
    observed_requests: i64,
    observed_tokens: i64,
) -> RepoResult<()> {
    let mut pattern = repo
        .get_quota_pattern(account_id, model)
        .await?
        .unwrap_or_else(|| QuotaPattern::empty(account_id, model));

    if pattern.sample_count == 0 || pattern.est_request_limit.is_none() {
        pattern.est_request_limit = Some(observed_requests);
        pattern.est_token_limit = Some(observed_tokens);
    } else {
        pattern.est_request_limit = Some(weighted_update(
            pattern.est_request_limit.unwrap_or(observed_requests),
            pattern.confidence,
            observed_requests,
        ));
        pattern.est_token_limit = Some(weighted_update(
            pattern.est_token_limit.unwrap_or(observed_tokens),
            pattern.confidence,
            observed_tokens,
        ));
    }

    pattern.confidence = (f64::from(pattern.sample_count + 1) / 10.0).min(1.0);
    pattern.sample_count += 1;
    pattern.last_exhausted_at = Some(Utc::now());

    repo.upsert_quota_pattern(&pattern).await?;
    tracing::debug!(
        account = account_id,
        model,
        est_requests = ?pattern.est_request_limit,
        est_tokens = ?pattern.est_token_limit,
        confidence = pattern.confidence,
        samples = pattern.sample_count,
        "quota pattern updated"
    );
    Ok(())
}

/// `(old · confidence + observed) / (confidence + 1)`, rounded.
fn weighted_update(old_est: i64, confidence: f64, observed: i64) -> i64 {
    ((old_est as f64 * confidence + observed as f64) / (confidence + 1.0)).round() as i64
}

/// Staleness decay for reporting: estimates older than a week halve per
/// additional week without an exhaustion event. Selection never consults this.
pub fn decayed_confidence(pattern: &QuotaPattern, now: DateTime<Utc>) -> f64 {
    let Some(last) = pattern.last_exhausted_at else {
        return pattern.confidence;
    };
    let age = now - last;
    if age <= Duration::days(7) {
        return pattern.confidence;
    }
    let extra_weeks = ((age - Duration::days(7)).num_days() / 7) + 1;
    pattern.confidence * 0.5_f64.powi(extra_weeks as i32)
}
