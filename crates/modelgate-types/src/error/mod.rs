//! Unified error types for Modelgate.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Caller-facing error taxonomy for the request pipeline.
///
/// The four public variants are non-overlapping: a request either carried a
/// client mistake (`InvalidRequest`), found no usable credential
/// (`NoEligibleAccount`), exhausted retries against a failing upstream
/// (`Upstream`), or hit a gateway bug/unreachable dependency (`Internal`).
/// Infra variants exist so inner layers keep typed context until the edge.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    /// The client request cannot be served as-is (unknown model, bad payload).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Every account for the target provider/model is blocked or exhausted.
    #[error("No eligible account; retry at {retry_at}")]
    NoEligibleAccount { retry_at: DateTime<Utc> },

    /// Upstream failed after the retry budget; status and body are verbatim.
    #[error("Upstream error: status {status}")]
    Upstream { status: u16, body: bytes::Bytes },

    /// OAuth token acquisition or refresh failed.
    #[error("OAuth error: {0}")]
    OAuth(String),

    /// Shared fast-store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Persistent-store operation failed.
    #[error(transparent)]
    Repo(#[from] RepositoryError),

    /// Network-level failure talking to an upstream.
    #[error("Network error: {0}")]
    Network(String),

    /// Unexpected internal failure; indicates a bug.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// HTTP status the ingress layer should surface for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest(_) => 400,
            Self::NoEligibleAccount { .. } => 429,
            Self::Upstream { status, .. } => *status,
            Self::OAuth(_) => 502,
            Self::Store(_) | Self::Repo(_) | Self::Network(_) | Self::Internal(_) => 500,
        }
    }

    /// Seconds until the fleet is expected to have an eligible account again.
    pub fn retry_after_secs(&self) -> Option<i64> {
        match self {
            Self::NoEligibleAccount { retry_at } => {
                Some((*retry_at - Utc::now()).num_seconds().max(0))
            }
            _ => None,
        }
    }
}

impl Serialize for GatewayError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

/// Result type alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors from the shared fast store (Redis or the in-memory test engine).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(String),
    #[error("Store serialization error: {0}")]
    Serialization(String),
}

/// Errors from the persistent store.
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Already exists: {0}")]
    AlreadyExists(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for repository operations.
pub type RepoResult<T> = Result<T, RepositoryError>;
