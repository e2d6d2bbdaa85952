//! Delivery ledger - duplicate result suppression
//!
//! At-least-once queues may hand the same result (or a second result for a
//! redelivered job) to several handlers. Once a job's result reaches a
//! terminal delivery state its id is recorded here, locally in a moka cache
//! and fleet-wide in the registry store, and later copies are dropped.

use std::sync::Arc;
use std::time::Duration;

use crate::core::store::RegistryStore;
use crate::core::JobId;
use crate::error::Result;
use crate::memory::FinishedJobCache;

/// Record of jobs whose result has been delivered or dropped
#[derive(Clone)]
pub struct DeliveryLedger {
    cache: FinishedJobCache,
    store: Arc<dyn RegistryStore>,
    prefix: String,
    ttl: Duration,
}

impl DeliveryLedger {
    pub fn new(
        store: Arc<dyn RegistryStore>,
        prefix: impl Into<String>,
        ttl: Duration,
        cache_capacity: u64,
    ) -> Self {
        DeliveryLedger {
            cache: FinishedJobCache::new(cache_capacity, ttl),
            store,
            prefix: prefix.into(),
            ttl,
        }
    }

    fn key(&self, job: &JobId) -> String {
        format!("{}:delivered:{}", self.prefix, job)
    }

    /// Whether a result for `job` already reached a terminal state
    pub async fn is_finished(&self, job: &JobId) -> Result<bool> {
        if self.cache.contains(job).await {
            return Ok(true);
        }
        let found = self.store.get(&self.key(job)).await?.is_some();
        if found {
            self.cache.insert(*job).await;
        }
        Ok(found)
    }

    /// Mark `job` finished
    pub async fn mark_finished(&self, job: &JobId) -> Result<()> {
        self.cache.insert(*job).await;
        self.store.set(&self.key(job), "1", self.ttl).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[tokio::test]
    async fn test_ledger_is_shared_through_store() {
        let store: Arc<dyn RegistryStore> = Arc::new(MemoryStore::new());
        let a = DeliveryLedger::new(store.clone(), "t", Duration::from_secs(60), 100);
        let b = DeliveryLedger::new(store, "t", Duration::from_secs(60), 100);
        let job = JobId::new();

        assert!(!a.is_finished(&job).await.unwrap());
        a.mark_finished(&job).await.unwrap();
        assert!(a.is_finished(&job).await.unwrap());
        // Another node sees it through the store
        assert!(b.is_finished(&job).await.unwrap());
    }
}
