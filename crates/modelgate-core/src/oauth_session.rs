//! Pending OAuth authorization sessions.
//!
//! The (external) OAuth handlers start a flow by storing the PKCE verifier
//! and redirect under a random state string, then consume it exactly once at
//! callback time. The core owns the storage contract: 10-minute TTL, one
//! consume.

use modelgate_types::{GatewayError, GatewayResult, OAuthSession};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::store::{self, FastStore, Keys};

const SESSION_TTL: Duration = Duration::from_secs(10 * 60);

pub struct OAuthSessionStore {
    store: Arc<dyn FastStore>,
}

impl OAuthSessionStore {
    pub fn new(store: Arc<dyn FastStore>) -> Self {
        Self { store }
    }

    /// Store a new pending session; returns the state string to weave into
    /// the authorization URL.
    pub async fn create(&self, session: &OAuthSession) -> GatewayResult<String> {
        let state = Uuid::new_v4().simple().to_string();
        let json = serde_json::to_string(session)
            .map_err(|e| GatewayError::Internal(format!("oauth session serialize: {}", e)))?;
        self.store
            .set_ex(&Keys::oauth_session(&state), &json, SESSION_TTL)
            .await?;
        Ok(state)
    }

    /// Consume the session for a callback. Returns `None` for unknown,
    /// expired, or already-consumed states.
    pub async fn consume(&self, state: &str) -> GatewayResult<Option<OAuthSession>> {
        let Some(json) = store::take(&*self.store, &Keys::oauth_session(state)).await? else {
            return Ok(None);
        };
        let session = serde_json::from_str(&json)
            .map_err(|e| GatewayError::Internal(format!("oauth session parse: {}", e)))?;
        Ok(Some(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Utc;

    fn session() -> OAuthSession {
        OAuthSession {
            provider: "antigravity".to_string(),
            project_id: None,
            flow_type: "pkce".to_string(),
            redirect_uri: "http://localhost:8790/oauth/callback".to_string(),
            code_verifier: "verifier-123".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn session_is_consumed_exactly_once() {
        let store = Arc::new(MemoryStore::new());
        let sessions = OAuthSessionStore::new(store);

        let state = sessions.create(&session()).await.unwrap();
        let consumed = sessions.consume(&state).await.unwrap().unwrap();
        assert_eq!(consumed.code_verifier, "verifier-123");

        // Replayed callbacks find nothing
        assert!(sessions.consume(&state).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_state_is_none() {
        let store = Arc::new(MemoryStore::new());
        let sessions = OAuthSessionStore::new(store);
        assert!(sessions.consume("bogus").await.unwrap().is_none());
    }
}
