//! Ephemeral key-value store behind analysis leases and cancellation flags.
//!
//! Production uses Redis. Every entry carries a TTL so a crashed process can
//! never hold a job forever.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client as RedisClient;
use thiserror::Error;
use tokio::sync::OnceCell;

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Atomic primitives the Lock Service and cancellation flags are built on.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Stores `value` under `key` only if no live entry exists.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, LeaseError>;

    /// Deletes `key` only if it currently holds `value`.
    async fn compare_and_delete(&self, key: &str, value: &str) -> Result<bool, LeaseError>;

    /// Resets the TTL of `key` only if it currently holds `value`.
    async fn compare_and_expire(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, LeaseError>;

    /// Unconditional set with TTL.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), LeaseError>;

    async fn exists(&self, key: &str) -> Result<bool, LeaseError>;

    async fn delete(&self, key: &str) -> Result<(), LeaseError>;
}

const COMPARE_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

const COMPARE_AND_PEXPIRE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
    return 0
end
"#;

/// Redis-backed lease store. `SET NX PX` for acquisition, Lua scripts for
/// owner-checked release and renewal.
///
/// All calls share one reconnecting connection, opened on first use.
pub struct RedisLeaseStore {
    client: RedisClient,
    connection: OnceCell<ConnectionManager>,
    release_script: redis::Script,
    renew_script: redis::Script,
}

impl RedisLeaseStore {
    pub fn new(client: RedisClient) -> Self {
        Self {
            client,
            connection: OnceCell::new(),
            release_script: redis::Script::new(COMPARE_AND_DELETE),
            renew_script: redis::Script::new(COMPARE_AND_PEXPIRE),
        }
    }

    async fn connection(&self) -> Result<ConnectionManager, LeaseError> {
        let manager = self
            .connection
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await?;
        Ok(manager.clone())
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    // PX 0 is rejected by Redis
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl LeaseStore for RedisLeaseStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, LeaseError> {
        let mut conn = self.connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn compare_and_delete(&self, key: &str, value: &str) -> Result<bool, LeaseError> {
        let mut conn = self.connection().await?;
        let deleted: i64 = self
            .release_script
            .key(key)
            .arg(value)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    async fn compare_and_expire(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, LeaseError> {
        let mut conn = self.connection().await?;
        let renewed: i64 = self
            .renew_script
            .key(key)
            .arg(value)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(renewed == 1)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), LeaseError> {
        let mut conn = self.connection().await?;
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, LeaseError> {
        let mut conn = self.connection().await?;
        let exists: bool = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?;
        Ok(exists)
    }

    async fn delete(&self, key: &str) -> Result<(), LeaseError> {
        let mut conn = self.connection().await?;
        redis::cmd("DEL")
            .arg(key)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }
}
