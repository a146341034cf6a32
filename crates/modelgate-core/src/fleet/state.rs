//! Per-account, per-model block state and the quota backoff ladder.

use chrono::{DateTime, Duration, Utc};
use modelgate_types::{Account, ErrorKind, ParsedError};
use serde::Serialize;
use std::collections::HashMap;

/// Why a (account, model) pair is currently out of rotation.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    None,
    Disabled,
    Cooldown,
    Quota,
    AuthFailed,
}

/// Mutable per-model state inside one account's fleet entry.
#[derive(Debug, Clone, Serialize)]
pub struct ModelState {
    pub block_reason: BlockReason,
    pub next_retry_after: Option<DateTime<Utc>>,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for ModelState {
    fn default() -> Self {
        Self {
            block_reason: BlockReason::None,
            next_retry_after: None,
            success_count: 0,
            failure_count: 0,
            last_used_at: None,
            last_error: None,
        }
    }
}

/// Exponential quota backoff: powers of two over a base, clamped to a max.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaState {
    pub backoff_multiplier: u32,
    base_backoff_secs: u64,
    max_backoff_secs: u64,
}

/// Multiplier clamp; beyond this the max backoff dominates anyway.
const MULTIPLIER_CAP: u32 = 1024;

impl QuotaState {
    pub fn new(base_backoff_secs: u64, max_backoff_secs: u64) -> Self {
        Self {
            backoff_multiplier: 1,
            base_backoff_secs,
            max_backoff_secs,
        }
    }

    /// `min(base * multiplier, max)`.
    pub fn next_backoff(&self) -> Duration {
        let secs = (self.base_backoff_secs)
            .saturating_mul(u64::from(self.backoff_multiplier))
            .min(self.max_backoff_secs);
        Duration::seconds(secs as i64)
    }

    pub fn escalate(&mut self) {
        self.backoff_multiplier = (self.backoff_multiplier.saturating_mul(2)).min(MULTIPLIER_CAP);
    }

    pub fn reset(&mut self) {
        self.backoff_multiplier = 1;
    }
}

/// In-memory fleet entry for one account: a lazily refreshed snapshot of the
/// persistent row plus the live block state.
#[derive(Debug, Clone, Serialize)]
pub struct AccountState {
    pub account: Account,
    /// Set by auth-failure classification; per-process, cleared on reload.
    pub disabled: bool,
    pub model_states: HashMap<String, ModelState>,
    pub quota_state: QuotaState,
}

impl AccountState {
    pub fn new(account: Account, base_backoff_secs: u64, max_backoff_secs: u64) -> Self {
        Self {
            account,
            disabled: false,
            model_states: HashMap::new(),
            quota_state: QuotaState::new(base_backoff_secs, max_backoff_secs),
        }
    }

    /// Block check for selection. A disabled account is blocked for every
    /// model; otherwise only an unexpired `next_retry_after` blocks.
    pub fn blocked_for(&self, model: &str, now: DateTime<Utc>) -> Option<BlockReason> {
        if self.disabled {
            return Some(BlockReason::Disabled);
        }
        let state = self.model_states.get(model)?;
        match state.next_retry_after {
            Some(retry_at) if retry_at > now => Some(state.block_reason),
            _ => None,
        }
    }

    /// Apply one classified result to this account's state for `model`.
    ///
    /// The full transition table:
    /// success clears the block and resets the quota ladder; rate limits and
    /// transients cool down; quota escalates the ladder; auth failures block
    /// for the configured cooldown AND disable the whole account; invalid
    /// requests never block (the next request from any client may be valid).
    pub fn apply_result(&mut self, model: &str, parsed: &ParsedError, now: DateTime<Utc>) {
        let quota_backoff = match parsed.kind {
            ErrorKind::QuotaExceeded => {
                let backoff = self.quota_state.next_backoff();
                self.quota_state.escalate();
                Some(backoff)
            }
            ErrorKind::Success => {
                self.quota_state.reset();
                None
            }
            _ => None,
        };

        let state = self.model_states.entry(model.to_string()).or_default();
        state.last_used_at = Some(now);

        match parsed.kind {
            ErrorKind::Success => {
                state.block_reason = BlockReason::None;
                state.next_retry_after = None;
                state.success_count += 1;
                state.last_error = None;
            }
            ErrorKind::RateLimit => {
                state.block_reason = BlockReason::Cooldown;
                let cooldown = parsed.cooldown.unwrap_or(std::time::Duration::from_secs(5));
                state.next_retry_after = Some(now + Duration::from_std(cooldown).unwrap_or(Duration::seconds(5)));
                state.failure_count += 1;
                state.last_error = Some(parsed.message.clone());
            }
            ErrorKind::QuotaExceeded => {
                state.block_reason = BlockReason::Quota;
                state.next_retry_after = quota_backoff.map(|b| now + b);
                state.failure_count += 1;
                state.last_error = Some(parsed.message.clone());
            }
            ErrorKind::AuthFailed => {
                state.block_reason = BlockReason::AuthFailed;
                let cooldown = parsed
                    .cooldown
                    .unwrap_or(std::time::Duration::from_secs(30 * 60));
                state.next_retry_after =
                    Some(now + Duration::from_std(cooldown).unwrap_or(Duration::minutes(30)));
                state.failure_count += 1;
                state.last_error = Some(parsed.message.clone());
                self.disabled = true;
            }
            ErrorKind::Transient => {
                state.block_reason = BlockReason::Cooldown;
                let cooldown = parsed.cooldown.unwrap_or(std::time::Duration::from_secs(60));
                state.next_retry_after =
                    Some(now + Duration::from_std(cooldown).unwrap_or(Duration::minutes(1)));
                state.failure_count += 1;
                state.last_error = Some(parsed.message.clone());
            }
            ErrorKind::InvalidRequest | ErrorKind::UpstreamError => {
                // No block: leave reason and retry time untouched.
                state.failure_count += 1;
                state.last_error = Some(parsed.message.clone());
            }
        }
    }

    /// Earliest time any model state for `model` frees up; used for the
    /// fleet-exhausted Retry-After.
    pub fn retry_hint(&self, model: &str) -> Option<DateTime<Utc>> {
        self.model_states
            .get(model)
            .and_then(|state| state.next_retry_after)
    }
}
