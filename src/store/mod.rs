//! Key-value and list store behind the job dispatcher.
//!
//! The dispatcher and orchestrator only talk to the narrow [`QueueStore`]
//! capability set:
//!
//! - **Lists**: FIFO push to the tail, blocking pop from the head, length
//! - **Keys**: get/set with optional TTL, delete, cursor-based scan, multi-get
//!
//! Two implementations are provided:
//!
//! - [`RedisStore`]: production backend on top of a Redis `ConnectionManager`
//! - [`MemoryStore`]: in-process backend with the same semantics, used by tests
//!
//! Keys passed to the store are relative; each implementation applies its own
//! namespace so callers never see the prefix.

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to connect to the store.
    #[error("Store connection failed: {0}")]
    ConnectionFailed(String),

    /// Redis operation failed.
    #[error("Redis operation failed: {0}")]
    Redis(#[from] ::redis::RedisError),

    /// The key holds a value of another type (list vs. string).
    #[error("Key '{0}' holds a value of the wrong type")]
    WrongType(String),

    /// A blocking operation did not return within its bound.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Capability set the job subsystem needs from its backing store.
///
/// All methods are safe to call concurrently. Scan cursors are plain values
/// owned by the caller and must not be shared between concurrent scans.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Appends a value to the tail of a list (RPUSH).
    async fn push_back(&self, list: &str, value: String) -> Result<(), StoreError>;

    /// Pops the head of a list, waiting up to `timeout` for a value (BLPOP).
    ///
    /// Returns `Ok(None)` when the timeout elapses with the list still empty.
    async fn blocking_pop_front(
        &self,
        list: &str,
        timeout: Duration,
    ) -> Result<Option<String>, StoreError>;

    /// Returns the length of a list; missing lists have length 0 (LLEN).
    async fn list_len(&self, list: &str) -> Result<usize, StoreError>;

    /// Deletes a key of any type. Returns whether something was removed (DEL).
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Reads a string value (GET).
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Writes a string value without expiry (SET).
    async fn set(&self, key: &str, value: String) -> Result<(), StoreError>;

    /// Writes a string value that expires after `ttl` (SETEX).
    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration)
        -> Result<(), StoreError>;

    /// Returns one batch of keys matching a glob `pattern`, starting at `cursor`.
    ///
    /// Start with cursor `0`; the scan is complete when the returned cursor is
    /// `0`. A batch may be empty while the scan is still in progress, and a key
    /// may be reported more than once (SCAN).
    async fn scan(&self, cursor: u64, pattern: &str) -> Result<(u64, Vec<String>), StoreError>;

    /// Reads many string values at once, `None` for missing keys (MGET).
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError>;

    /// Checks that the store is reachable (PING).
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Collects every key matching `pattern`, following the scan cursor until the
/// store reports completion. Duplicate keys are dropped.
pub async fn scan_all(store: &dyn QueueStore, pattern: &str) -> Result<Vec<String>, StoreError> {
    let mut cursor = 0;
    let mut keys: Vec<String> = Vec::new();

    loop {
        let (next, batch) = store.scan(cursor, pattern).await?;
        for key in batch {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        if next == 0 {
            break;
        }
        cursor = next;
    }

    Ok(keys)
}

/// Glob matching with `*` (any run) and `?` (any single character), the
/// subset of SCAN MATCH syntax the job subsystem relies on.
pub(crate) fn glob_match(pattern: &str, key: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let key: Vec<char> = key.chars().collect();

    let (mut p, mut k) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while k < key.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == key[k]) {
            p += 1;
            k += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, k));
            p += 1;
        } else if let Some((star_p, star_k)) = star {
            p = star_p + 1;
            k = star_k + 1;
            star = Some((star_p, star_k + 1));
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }

    p == pattern.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("worker_status:*", "worker_status:123"));
        assert!(glob_match("worker_status:*", "worker_status:"));
        assert!(!glob_match("worker_status:*", "job_status:123"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("job_?:x", "job_a:x"));
        assert!(!glob_match("job_?:x", "job_ab:x"));
        assert!(glob_match("a*b*c", "aXXbYYc"));
        assert!(!glob_match("a*b*c", "aXXbYY"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exactly"));
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::ConnectionFailed("refused".to_string());
        assert!(err.to_string().contains("refused"));

        let err = StoreError::WrongType("default".to_string());
        assert!(err.to_string().contains("default"));

        let err = StoreError::Timeout(Duration::from_secs(30));
        assert!(err.to_string().contains("30"));
    }

    #[tokio::test]
    async fn test_scan_all_follows_cursor() {
        let store = MemoryStore::new().with_scan_batch(2);
        for pid in 1..=7 {
            store
                .set(&format!("worker_status:{}", pid), "{}".to_string())
                .await
                .unwrap();
        }
        store.set("job_status:x", "{}".to_string()).await.unwrap();

        let mut keys = scan_all(&store, "worker_status:*").await.unwrap();
        keys.sort();
        assert_eq!(keys.len(), 7);
        assert!(keys.iter().all(|k| k.starts_with("worker_status:")));
    }
}
