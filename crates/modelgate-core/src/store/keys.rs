//! Fast-store key layout.
//!
//! Keep every key format in one place so the layout stays greppable:
//!
//! - `auth:{provider}:{account}`       token JSON, TTL = expires_in - skew
//! - `rr:{provider}:{model}`           monotonic counter, no TTL
//! - `quota:{account}:{model}:{field}` window TTL
//! - `model:mapping:{alias}`           JSON, no TTL
//! - `oauth:session:{state}`           session JSON, 10 min TTL
//! - `stats:proxy:{id}:{field}:today`  counters, 24 h TTL

pub struct Keys;

impl Keys {
    pub fn auth(provider_id: &str, account_id: &str) -> String {
        format!("auth:{}:{}", provider_id, account_id)
    }

    pub fn round_robin(provider_id: &str, model: &str) -> String {
        format!("rr:{}:{}", provider_id, model)
    }

    pub fn quota_requests(account_id: &str, model: &str) -> String {
        format!("quota:{}:{}:requests", account_id, model)
    }

    pub fn quota_tokens(account_id: &str, model: &str) -> String {
        format!("quota:{}:{}:tokens", account_id, model)
    }

    pub fn quota_window_start(account_id: &str, model: &str) -> String {
        format!("quota:{}:{}:window_start", account_id, model)
    }

    pub fn quota_exhausted(account_id: &str, model: &str) -> String {
        format!("quota:{}:{}:exhausted", account_id, model)
    }

    pub fn model_mapping(alias: &str) -> String {
        format!("model:mapping:{}", alias)
    }

    pub fn oauth_session(state: &str) -> String {
        format!("oauth:session:{}", state)
    }

    pub fn proxy_requests_today(proxy_id: &str) -> String {
        format!("stats:proxy:{}:requests:today", proxy_id)
    }

    pub fn proxy_errors_today(proxy_id: &str) -> String {
        format!("stats:proxy:{}:errors:today", proxy_id)
    }
}
