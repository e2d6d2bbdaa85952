//! In-process registry store
//!
//! A single mutex-guarded map gives linearizable per-key operations. Expiry
//! uses the tokio clock, so TTL behaviour follows paused time in tests.
//! Versions come from one store-wide counter and are never reused, which keeps
//! `compare_and_set` free of ABA after an entry expires and is recreated.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::core::store::{RegistryStore, Versioned};
use crate::error::Result;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    version: u64,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// In-process registry store
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    next_version: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Number of live entries
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    /// Drop entries whose TTL has elapsed
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        before - entries.len()
    }
}

#[async_trait]
impl RegistryStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Versioned>> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        Ok(entries.get(key).filter(|e| e.is_live(now)).map(|e| Versioned {
            value: e.value.clone(),
            version: e.version,
        }))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<u64> {
        let mut entries = self.entries.lock().await;
        let version = self.bump();
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                version,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(version)
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<u64>,
        value: &str,
        ttl: Duration,
    ) -> Result<Option<u64>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let current = entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.version);

        if current != expected {
            return Ok(None);
        }

        let version = self.bump();
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                version,
                expires_at: now + ttl,
            },
        );
        Ok(Some(version))
    }

    async fn expire(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        Ok(entries.remove(key).is_some_and(|e| e.is_live(now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn test_compare_and_set() {
        let store = MemoryStore::new();

        let v1 = store.compare_and_set("k", None, "a", TTL).await.unwrap();
        assert!(v1.is_some());
        // Absent-only claim loses once the key exists
        assert_eq!(store.compare_and_set("k", None, "b", TTL).await.unwrap(), None);

        let v2 = store.compare_and_set("k", v1, "c", TTL).await.unwrap();
        assert!(v2 > v1);
        // Stale version loses
        assert_eq!(store.compare_and_set("k", v1, "d", TTL).await.unwrap(), None);

        assert_eq!(store.get("k").await.unwrap().unwrap().value, "c");
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let store = MemoryStore::new();
        store.set("k", "a", TTL).await.unwrap();
        assert_eq!(store.len().await, 1);

        tokio::time::advance(TTL + Duration::from_millis(1)).await;
        assert!(store.get("k").await.unwrap().is_none());
        assert!(!store.expire("k").await.unwrap());

        // Expired key can be claimed again with a fresh version
        let v = store.compare_and_set("k", None, "b", TTL).await.unwrap();
        assert!(v.is_some());
    }

    #[tokio::test]
    async fn test_versions_never_reused() {
        let store = MemoryStore::new();
        let v1 = store.set("k", "a", TTL).await.unwrap();
        assert!(store.expire("k").await.unwrap());
        let v2 = store.set("k", "a", TTL).await.unwrap();
        assert_ne!(v1, v2);
        assert_eq!(store.purge_expired().await, 0);
    }
}
