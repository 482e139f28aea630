//! Redis-backed queue store.
//!
//! Regular commands share one `ConnectionManager` (multiplexed, reconnects
//! automatically). Blocking pops run on a second manager opened at connect
//! time: a BLPOP parked on the shared connection would stall every other
//! command queued behind it. Blocking pops issued concurrently through the
//! same store wait for each other.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, IntoConnectionInfo};
use tracing::debug;

use super::{QueueStore, StoreError};

/// Extra time granted to a BLPOP round trip beyond its server-side timeout
/// before the client gives up on the response.
const BLOCKING_GRACE: Duration = Duration::from_secs(5);

/// Batch size hint passed to SCAN.
const SCAN_COUNT: usize = 100;

/// Redis implementation of [`QueueStore`].
pub struct RedisStore {
    /// Connection reserved for blocking pops.
    blocking: ConnectionManager,
    /// Shared connection for everything else.
    redis: ConnectionManager,
    /// Prefix applied to all keys, without the trailing `:`.
    namespace: String,
}

impl RedisStore {
    /// Connects to Redis.
    ///
    /// # Arguments
    ///
    /// * `info` - Connection target, e.g. a `redis::ConnectionInfo` built from
    ///   configuration or a URL such as "redis://localhost:6379/1"
    /// * `namespace` - Prefix for every key written by this store
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ConnectionFailed` if either connection fails.
    pub async fn connect(
        info: impl IntoConnectionInfo,
        namespace: &str,
    ) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(info).map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;
        let blocking = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        debug!(namespace = %namespace, "Connected to Redis");

        Ok(Self {
            blocking,
            redis,
            namespace: namespace.to_string(),
        })
    }

    /// Returns the key namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn key(&self, key: &str) -> String {
        namespaced(&self.namespace, key)
    }

    fn strip<'a>(&self, key: &'a str) -> &'a str {
        strip_namespace(&self.namespace, key)
    }
}

fn namespaced(namespace: &str, key: &str) -> String {
    if namespace.is_empty() {
        key.to_string()
    } else {
        format!("{}:{}", namespace, key)
    }
}

/// Whole seconds sent to BLPOP: rounded up, and never 0, which BLPOP reads
/// as "block forever".
fn blpop_timeout_secs(timeout: Duration) -> u64 {
    (timeout.as_secs_f64().ceil() as u64).max(1)
}

fn strip_namespace<'a>(namespace: &str, key: &'a str) -> &'a str {
    if namespace.is_empty() {
        return key;
    }
    key.strip_prefix(namespace)
        .and_then(|rest| rest.strip_prefix(':'))
        .unwrap_or(key)
}

#[async_trait]
impl QueueStore for RedisStore {
    async fn push_back(&self, list: &str, value: String) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        conn.rpush::<_, _, ()>(self.key(list), value).await?;
        Ok(())
    }

    async fn blocking_pop_front(
        &self,
        list: &str,
        timeout: Duration,
    ) -> Result<Option<String>, StoreError> {
        let timeout_secs = blpop_timeout_secs(timeout);
        let mut conn = self.blocking.clone();

        let mut blpop = redis::cmd("BLPOP");
        blpop.arg(self.key(list)).arg(timeout_secs);

        let bound = Duration::from_secs(timeout_secs) + BLOCKING_GRACE;
        match tokio::time::timeout(bound, blpop.query_async::<_, Option<(String, String)>>(&mut conn))
            .await
        {
            Ok(result) => Ok(result?.map(|(_, value)| value)),
            Err(_) => Err(StoreError::Timeout(bound)),
        }
    }

    async fn list_len(&self, list: &str) -> Result<usize, StoreError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(self.key(list)).await?;
        Ok(len)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.redis.clone();
        let removed: usize = conn.del(self.key(key)).await?;
        Ok(removed > 0)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.redis.clone();
        let value: Option<String> = conn.get(self.key(key)).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        conn.set::<_, _, ()>(self.key(key), value).await?;
        Ok(())
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        redis::cmd("SETEX")
            .arg(self.key(key))
            .arg(ttl.as_secs().max(1))
            .arg(value)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn scan(&self, cursor: u64, pattern: &str) -> Result<(u64, Vec<String>), StoreError> {
        let mut conn = self.redis.clone();
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(self.key(pattern))
            .arg("COUNT")
            .arg(SCAN_COUNT)
            .query_async(&mut conn)
            .await?;

        let keys = keys.iter().map(|k| self.strip(k).to_string()).collect();
        Ok((next, keys))
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.redis.clone();
        let full_keys: Vec<String> = keys.iter().map(|k| self.key(k)).collect();
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(full_keys)
            .query_async(&mut conn)
            .await?;
        Ok(values)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }
}
