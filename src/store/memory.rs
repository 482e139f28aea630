//! In-process queue store.
//!
//! Mirrors the Redis semantics the job subsystem depends on (FIFO lists,
//! blocking pop with timeout, TTL expiry, paged scans) so the dispatcher and
//! orchestrator can be exercised without a server.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{glob_match, QueueStore, StoreError};

/// Default number of keys returned per scan batch.
const DEFAULT_SCAN_BATCH: usize = 10;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    List(VecDeque<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory implementation of [`QueueStore`].
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    /// Wakes blocked pops whenever a list receives a value.
    pushed: Notify,
    scan_batch: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            pushed: Notify::new(),
            scan_batch: DEFAULT_SCAN_BATCH,
        }
    }

    /// Sets how many keys each scan call returns, to exercise callers that
    /// must resume a scan across several batches.
    pub fn with_scan_batch(mut self, batch: usize) -> Self {
        self.scan_batch = batch.max(1);
        self
    }

    /// Remaining time to live of a key, `None` if missing or persistent.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let entries = self.lock();
        let now = Instant::now();
        entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock().values().filter(|e| !e.is_expired(now)).count()
    }

    /// Returns whether the store holds no live keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        // A poisoned map is still structurally valid; keep serving it.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn try_pop(&self, list: &str) -> Result<Option<String>, StoreError> {
        let mut entries = self.lock();
        let now = Instant::now();

        if entries.get(list).is_some_and(|e| e.is_expired(now)) {
            entries.remove(list);
        }

        let popped = match entries.get_mut(list) {
            None => return Ok(None),
            Some(Entry {
                value: Value::List(items),
                ..
            }) => items.pop_front(),
            Some(_) => return Err(StoreError::WrongType(list.to_string())),
        };

        // Redis drops empty lists.
        if matches!(entries.get(list), Some(Entry { value: Value::List(items), .. }) if items.is_empty())
        {
            entries.remove(list);
        }

        Ok(popped)
    }

    fn write_string(&self, key: &str, value: String, ttl: Option<Duration>) {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.lock().insert(
            key.to_string(),
            Entry {
                value: Value::Str(value),
                expires_at,
            },
        );
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn push_back(&self, list: &str, value: String) -> Result<(), StoreError> {
        {
            let mut entries = self.lock();
            let now = Instant::now();
            if entries.get(list).is_some_and(|e| e.is_expired(now)) {
                entries.remove(list);
            }

            let entry = entries.entry(list.to_string()).or_insert_with(|| Entry {
                value: Value::List(VecDeque::new()),
                expires_at: None,
            });
            match &mut entry.value {
                Value::List(items) => items.push_back(value),
                Value::Str(_) => return Err(StoreError::WrongType(list.to_string())),
            }
        }

        self.pushed.notify_waiters();
        Ok(())
    }

    async fn blocking_pop_front(
        &self,
        list: &str,
        timeout: Duration,
    ) -> Result<Option<String>, StoreError> {
        let deadline = Instant::now() + timeout;

        loop {
            // Register interest before checking so a push between the check
            // and the wait is not missed.
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.try_pop(list)? {
                return Ok(Some(value));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn list_len(&self, list: &str) -> Result<usize, StoreError> {
        let entries = self.lock();
        let now = Instant::now();
        match entries.get(list).filter(|e| !e.is_expired(now)) {
            None => Ok(0),
            Some(Entry {
                value: Value::List(items),
                ..
            }) => Ok(items.len()),
            Some(_) => Err(StoreError::WrongType(list.to_string())),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        Ok(self
            .lock()
            .remove(key)
            .is_some_and(|e| !e.is_expired(now)))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.lock();
        let now = Instant::now();
        match entries.get(key).filter(|e| !e.is_expired(now)) {
            None => Ok(None),
            Some(Entry {
                value: Value::Str(value),
                ..
            }) => Ok(Some(value.clone())),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.write_string(key, value, None);
        Ok(())
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.write_string(key, value, Some(ttl));
        Ok(())
    }

    async fn scan(&self, cursor: u64, pattern: &str) -> Result<(u64, Vec<String>), StoreError> {
        let entries = self.lock();
        let now = Instant::now();

        let mut keys: Vec<&String> = entries
            .iter()
            .filter(|(key, entry)| !entry.is_expired(now) && glob_match(pattern, key))
            .map(|(key, _)| key)
            .collect();
        keys.sort();

        let start = (cursor as usize).min(keys.len());
        let end = (start + self.scan_batch).min(keys.len());
        let batch = keys[start..end].iter().map(|k| (*k).clone()).collect();
        let next = if end >= keys.len() { 0 } else { end as u64 };

        Ok((next, batch))
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        let entries = self.lock();
        let now = Instant::now();
        // MGET reports non-string values as nil rather than failing.
        Ok(keys
            .iter()
            .map(|key| match entries.get(key).filter(|e| !e.is_expired(now)) {
                Some(Entry {
                    value: Value::Str(value),
                    ..
                }) => Some(value.clone()),
                _ => None,
            })
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
