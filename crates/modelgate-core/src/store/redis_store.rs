//! Redis-backed fast store.

use async_trait::async_trait;
use modelgate_types::StoreError;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

use super::{FastStore, StoreOp, StoreResult};

#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::Backend(format!("redis client: {}", e)))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Backend(format!("redis connection: {}", e)))?;
        Ok(Self { manager })
    }
}

fn map_err(e: redis::RedisError) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn ttl_secs(ttl: Duration) -> i64 {
    // Sub-second TTLs round up so a key is never written pre-expired.
    ttl.as_secs().max(1) as i64
}

#[async_trait]
impl FastStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.manager.clone();
        conn.get(key).await.map_err(map_err)
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        conn.set(key, value).await.map_err(map_err)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        conn.set_ex(key, value, ttl_secs(ttl) as u64)
            .await
            .map_err(map_err)
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        // Single SET NX EX so the key can never exist without its TTL
        let mut conn = self.manager.clone();
        let set: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(set.is_some())
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        let mut conn = self.manager.clone();
        conn.incr(key, 1).await.map_err(map_err)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> StoreResult<i64> {
        let mut conn = self.manager.clone();
        conn.incr(key, delta).await.map_err(map_err)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        let _: bool = conn.expire(key, ttl_secs(ttl)).await.map_err(map_err)?;
        Ok(())
    }

    async fn del(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.del(key).await.map_err(map_err)?;
        Ok(())
    }

    async fn pipeline(&self, ops: Vec<StoreOp>) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in &ops {
            match op {
                StoreOp::Incr(key) => {
                    pipe.incr(key, 1).ignore();
                }
                StoreOp::IncrBy(key, delta) => {
                    pipe.incr(key, *delta).ignore();
                }
                StoreOp::Expire(key, ttl) => {
                    pipe.expire(key, ttl_secs(*ttl)).ignore();
                }
                StoreOp::SetNxEx(key, value, ttl) => {
                    pipe.cmd("SET")
                        .arg(key)
                        .arg(value)
                        .arg("NX")
                        .arg("EX")
                        .arg(ttl_secs(*ttl))
                        .ignore();
                }
            }
        }
        pipe.query_async::<_, ()>(&mut conn).await.map_err(map_err)
    }
}
