//! Redis-backed expiry store using `bb8-redis` for connection pooling.
//!
//! Every port operation maps to a single atomic Redis command (or one Lua
//! script), so concurrent callers across processes cannot interleave a
//! check with a set. TTLs use millisecond precision (`PX`/`PEXPIRE`).

use std::time::Duration;

use async_trait::async_trait;
use bb8_redis::bb8::Pool;
use bb8_redis::redis::{AsyncCommands, RedisError, Script};
use bb8_redis::RedisConnectionManager;

use crate::domain::ports::{ExpiryStore, ExpiryStoreError};

/// Counter increment that binds the window expiry to the first increment,
/// all store-side.
const INCREMENT_WITH_WINDOW: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
";

/// Redis implementation of the [`ExpiryStore`] port.
#[derive(Clone)]
pub struct RedisExpiryStore {
    pool: Pool<RedisConnectionManager>,
    increment_script: Script,
}

impl RedisExpiryStore {
    /// Build a store over a connection pool for `redis_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ExpiryStoreError::Unavailable`] when the URL is invalid or
    /// the pool cannot be constructed.
    pub async fn connect(redis_url: &str) -> Result<Self, ExpiryStoreError> {
        let manager = RedisConnectionManager::new(redis_url)
            .map_err(|error| ExpiryStoreError::unavailable(error.to_string()))?;
        let pool = Pool::builder()
            .build(manager)
            .await
            .map_err(|error| ExpiryStoreError::unavailable(error.to_string()))?;
        Ok(Self::new(pool))
    }

    /// Build a store over an existing pool.
    #[must_use]
    pub fn new(pool: Pool<RedisConnectionManager>) -> Self {
        Self {
            pool,
            increment_script: Script::new(INCREMENT_WITH_WINDOW),
        }
    }

    async fn connection(
        &self,
    ) -> Result<bb8_redis::bb8::PooledConnection<'_, RedisConnectionManager>, ExpiryStoreError>
    {
        self.pool
            .get()
            .await
            .map_err(|error| ExpiryStoreError::unavailable(error.to_string()))
    }
}

fn ttl_millis(ttl: Duration) -> Result<i64, ExpiryStoreError> {
    i64::try_from(ttl.as_millis())
        .map_err(|_| ExpiryStoreError::operation("ttl exceeds i64 milliseconds"))
}

/// Map a Redis error to the port's failure categories.
///
/// Connectivity-shaped failures surface as `Unavailable` so callers can
/// apply their fail-open policies; everything else is an `Operation` error.
fn map_redis_error(error: &RedisError) -> ExpiryStoreError {
    if error.is_io_error()
        || error.is_timeout()
        || error.is_connection_refusal()
        || error.is_connection_dropped()
    {
        ExpiryStoreError::unavailable(error.to_string())
    } else {
        ExpiryStoreError::operation(error.to_string())
    }
}

#[async_trait]
impl ExpiryStore for RedisExpiryStore {
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, ExpiryStoreError> {
        let ttl_ms = ttl_millis(ttl)?;
        let mut conn = self.connection().await?;
        // SET NX PX: the existence test and the write are one command.
        let outcome: Option<String> = bb8_redis::redis::cmd("SET")
            .arg(key)
            .arg(1)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut *conn)
            .await
            .map_err(|error| map_redis_error(&error))?;
        Ok(outcome.is_some())
    }

    async fn refresh_expiry(&self, key: &str, ttl: Duration) -> Result<(), ExpiryStoreError> {
        let ttl_ms = ttl_millis(ttl)?;
        let mut conn = self.connection().await?;
        // PEXPIRE on an absent key is a no-op, matching the port contract.
        let _refreshed: bool = conn
            .pexpire(key, ttl_ms)
            .await
            .map_err(|error| map_redis_error(&error))?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), ExpiryStoreError> {
        let mut conn = self.connection().await?;
        let _removed: i64 = conn
            .del(key)
            .await
            .map_err(|error| map_redis_error(&error))?;
        Ok(())
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<i64, ExpiryStoreError> {
        let window_ms = ttl_millis(window)?;
        let mut conn = self.connection().await?;
        self.increment_script
            .key(key)
            .arg(window_ms)
            .invoke_async(&mut *conn)
            .await
            .map_err(|error| map_redis_error(&error))
    }

    async fn current_count(&self, key: &str) -> Result<Option<i64>, ExpiryStoreError> {
        let mut conn = self.connection().await?;
        conn.get(key)
            .await
            .map_err(|error| map_redis_error(&error))
    }
}
