//! Shared fast store: the cross-process arbiter for round-robin counters,
//! quota windows, token caches, and mapping caches.
//!
//! Two engines implement the same trait: `RedisStore` for deployment and
//! `MemoryStore` for unit tests. The gateway is horizontally scalable because
//! everything that must agree across processes lives behind this trait.

mod keys;
mod memory;
mod redis_store;

pub use keys::Keys;
pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;
use modelgate_types::StoreError;
use std::time::Duration;

pub type StoreResult<T> = Result<T, StoreError>;

/// One write in a batched `pipeline` call.
#[derive(Debug, Clone)]
pub enum StoreOp {
    Incr(String),
    IncrBy(String, i64),
    Expire(String, Duration),
    SetNxEx(String, String, Duration),
}

/// Minimal key-value surface the core needs from the fast store.
///
/// Semantics follow Redis: `incr` is atomic and authoritative, `set_nx_ex`
/// returns whether the key was newly set, TTLs are rolling from the moment
/// they are applied.
#[async_trait]
pub trait FastStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// SET without expiry.
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// SET with expiry.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// SETNX with expiry; returns true when the key was absent and is now set.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;

    /// Atomic INCR; creates the key at 0 first. No TTL is applied here.
    async fn incr(&self, key: &str) -> StoreResult<i64>;

    /// Atomic INCRBY.
    async fn incr_by(&self, key: &str, delta: i64) -> StoreResult<i64>;

    /// Apply/refresh a TTL on an existing key.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()>;

    async fn del(&self, key: &str) -> StoreResult<()>;

    /// Apply a batch of writes in one shot.
    ///
    /// Redis executes the whole batch as an atomic MULTI/EXEC pipeline, so a
    /// counter and its TTL can never be split by a crash between round-trips.
    /// The default falls back to one call per op for engines where every op
    /// is already in-process.
    async fn pipeline(&self, ops: Vec<StoreOp>) -> StoreResult<()> {
        for op in ops {
            match op {
                StoreOp::Incr(key) => {
                    self.incr(&key).await?;
                }
                StoreOp::IncrBy(key, delta) => {
                    self.incr_by(&key, delta).await?;
                }
                StoreOp::Expire(key, ttl) => self.expire(&key, ttl).await?,
                StoreOp::SetNxEx(key, value, ttl) => {
                    self.set_nx_ex(&key, &value, ttl).await?;
                }
            }
        }
        Ok(())
    }
}

/// GETDEL-style consume helper shared by both engines.
///
/// Not atomic across processes; acceptable for OAuth sessions where the state
/// string is unguessable and single-use by construction.
pub async fn take(store: &dyn FastStore, key: &str) -> StoreResult<Option<String>> {
    let value = store.get(key).await?;
    if value.is_some() {
        store.del(key).await?;
    }
    Ok(value)
}
