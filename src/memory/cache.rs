//! In-process cache of finished job ids
//!
//! Uses moka async cache (Send + Sync, TTL-based eviction). Sits in front of
//! the fleet-wide delivery ledger so repeated duplicates of a job are dropped
//! without a store round-trip.

use moka::future::Cache;
use std::time::Duration;

use crate::core::JobId;

/// Local cache of job ids whose result reached a terminal delivery state
#[derive(Clone)]
pub struct FinishedJobCache {
    finished: Cache<JobId, ()>,
}

impl FinishedJobCache {
    /// Create a cache holding up to `capacity` ids for `ttl`
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        FinishedJobCache {
            finished: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Whether the job is known to be finished
    pub async fn contains(&self, job_id: &JobId) -> bool {
        self.finished.get(job_id).await.is_some()
    }

    /// Record a finished job
    pub async fn insert(&self, job_id: JobId) {
        self.finished.insert(job_id, ()).await;
    }
}

impl Default for FinishedJobCache {
    fn default() -> Self {
        Self::new(100_000, Duration::from_secs(10 * 60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_finished_job_cache() {
        let cache = FinishedJobCache::default();
        let job = JobId::new();

        assert!(!cache.contains(&job).await);
        cache.insert(job).await;
        assert!(cache.contains(&job).await);
        assert!(!cache.contains(&JobId::new()).await);
    }
}
