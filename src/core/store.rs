//! Registry store trait - shared key/value store with TTL and CAS
//!
//! Every gateway and result-handler process reaches the same store. Writes
//! on a key are linearizable; `compare_and_set` is the only primitive used
//! to change ownership so two nodes can never both win a claim.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// A stored value with its version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub value: String,
    /// Monotonic per key; bumped on every successful write
    pub version: u64,
}

/// Shared, replicated key/value store
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Store name for logs
    fn name(&self) -> &str;

    /// Read a live (non-expired) entry
    async fn get(&self, key: &str) -> Result<Option<Versioned>>;

    /// Unconditional write; returns the new version
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<u64>;

    /// Write only if the current version matches `expected`
    /// (`None` = key absent or expired). Returns the new version on success.
    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<u64>,
        value: &str,
        ttl: Duration,
    ) -> Result<Option<u64>>;

    /// Remove an entry; returns whether a live entry existed
    async fn expire(&self, key: &str) -> Result<bool>;

    /// Cheap reachability check
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
