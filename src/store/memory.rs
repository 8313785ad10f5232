//! In-memory store backend.
//!
//! Backs tests and `memory://` endpoints. Expiry is enforced lazily: an
//! expired entry is dropped the next time it is read or scanned, which
//! matches how the orchestrator consumes TTLs (liveness is always checked
//! against `last_seen` before the record TTL matters).

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::store::StateStore;

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

#[derive(Debug, Default)]
struct Inner {
    kv: HashMap<String, Entry>,
    lists: HashMap<String, VecDeque<String>>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.kv.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut inner = self.inner.lock().await;
        let expired = inner.kv.get(key).is_some_and(Entry::expired);
        if expired {
            inner.kv.remove(key);
            return Ok(None);
        }
        Ok(inner.kv.get(key).map(|entry| entry.value.clone()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.kv.remove(key);
        inner.lists.remove(key);
        Ok(())
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>> {
        let mut inner = self.inner.lock().await;
        inner.kv.retain(|_, entry| !entry.expired());
        let mut keys: Vec<String> = inner
            .kv
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn list_push_tail(&self, key: &str, value: &str) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let list = inner.lists.entry(key.to_string()).or_default();
        list.push_back(value.to_string());
        Ok(list.len() as u64)
    }

    async fn list_pop_head(&self, key: &str) -> Result<Option<String>> {
        let mut inner = self.inner.lock().await;
        let (popped, now_empty) = match inner.lists.get_mut(key) {
            Some(list) => {
                let popped = list.pop_front();
                (popped, list.is_empty())
            }
            None => (None, false),
        };
        if now_empty {
            inner.lists.remove(key);
        }
        Ok(popped)
    }

    async fn list_len(&self, key: &str) -> Result<u64> {
        let inner = self.inner.lock().await;
        Ok(inner.lists.get(key).map(|l| l.len()).unwrap_or(0) as u64)
    }

    async fn list_snapshot(&self, key: &str) -> Result<Vec<String>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .lists
            .get(key)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
