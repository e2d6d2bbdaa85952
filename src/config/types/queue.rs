//! Queue, worker and delivery configuration types

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Queue provider selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackendType {
    /// In-process (single node only)
    #[default]
    Memory,
    /// PostgreSQL table with leased delivery
    Postgres,
}

impl std::str::FromStr for QueueBackendType {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "inmemory" => Ok(QueueBackendType::Memory),
            "postgres" | "postgresql" | "pg" => Ok(QueueBackendType::Postgres),
            _ => Err(crate::error::Error::Config(format!(
                "Invalid queue backend: {}. Valid options: memory, postgres",
                s
            ))),
        }
    }
}

/// Queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Provider
    #[serde(default)]
    pub backend: QueueBackendType,
    /// Job queue name
    #[serde(default = "default_request_queue")]
    pub request_queue: String,
    /// Result queue name
    #[serde(default = "default_result_queue")]
    pub result_queue: String,
    /// Prefix for node-addressed forward queues (`<prefix>.<node id>`)
    #[serde(default = "default_node_queue_prefix")]
    pub node_queue_prefix: String,
    /// Poll interval for providers without push delivery
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Lease on a delivered message before it becomes visible again
    #[serde(default = "default_visibility_timeout", with = "humantime_serde")]
    pub visibility_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            backend: QueueBackendType::default(),
            request_queue: default_request_queue(),
            result_queue: default_result_queue(),
            node_queue_prefix: default_node_queue_prefix(),
            poll_interval: default_poll_interval(),
            visibility_timeout: default_visibility_timeout(),
        }
    }
}

fn default_request_queue() -> String {
    "translation_requests".to_string()
}

fn default_result_queue() -> String {
    "translation_results".to_string()
}

fn default_node_queue_prefix() -> String {
    "translation_results.node".to_string()
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(250)
}

fn default_visibility_timeout() -> Duration {
    Duration::from_secs(120)
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Concurrent request handlers per process
    #[serde(default = "default_request_workers")]
    pub request_workers: usize,
    /// Concurrent result handlers per process
    #[serde(default = "default_result_workers")]
    pub result_workers: usize,
    /// Retry ceiling for transient backend failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First backoff delay
    #[serde(default = "default_initial_backoff", with = "humantime_serde")]
    pub initial_backoff: Duration,
    /// Backoff cap
    #[serde(default = "default_max_backoff", with = "humantime_serde")]
    pub max_backoff: Duration,
    /// Backoff growth factor
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Random jitter factor in [0, 1)
    #[serde(default = "default_backoff_jitter")]
    pub backoff_jitter: f64,
    /// Upper bound on one backend call
    #[serde(default = "default_backend_timeout", with = "humantime_serde")]
    pub backend_timeout: Duration,
    /// Redelivery delay after a queue/registry failure
    #[serde(default = "default_infra_retry_delay", with = "humantime_serde")]
    pub infra_retry_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            request_workers: default_request_workers(),
            result_workers: default_result_workers(),
            max_retries: default_max_retries(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
            backoff_jitter: default_backoff_jitter(),
            backend_timeout: default_backend_timeout(),
            infra_retry_delay: default_infra_retry_delay(),
        }
    }
}

fn default_request_workers() -> usize {
    4
}

fn default_result_workers() -> usize {
    2
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff() -> Duration {
    Duration::from_secs(1)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_backoff_jitter() -> f64 {
    0.1
}

fn default_backend_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_infra_retry_delay() -> Duration {
    Duration::from_secs(5)
}

/// Result delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// How long a result with no live owner is held for a reconnect
    #[serde(default = "default_hold_ttl", with = "humantime_serde")]
    pub hold_ttl: Duration,
    /// Maximum results held per process
    #[serde(default = "default_hold_capacity")]
    pub hold_capacity: usize,
    /// How often held results are re-resolved and expired
    #[serde(default = "default_hold_sweep", with = "humantime_serde")]
    pub sweep_interval: Duration,
    /// How long finished job ids are remembered for duplicate suppression
    #[serde(default = "default_dedupe_ttl", with = "humantime_serde")]
    pub dedupe_ttl: Duration,
    /// Local finished-job cache size
    #[serde(default = "default_dedupe_capacity")]
    pub dedupe_cache_capacity: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        DeliveryConfig {
            hold_ttl: default_hold_ttl(),
            hold_capacity: default_hold_capacity(),
            sweep_interval: default_hold_sweep(),
            dedupe_ttl: default_dedupe_ttl(),
            dedupe_cache_capacity: default_dedupe_capacity(),
        }
    }
}

fn default_hold_ttl() -> Duration {
    Duration::from_secs(60)
}

fn default_hold_capacity() -> usize {
    10_000
}

fn default_hold_sweep() -> Duration {
    Duration::from_secs(1)
}

fn default_dedupe_ttl() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_dedupe_capacity() -> u64 {
    100_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_backend_parsing() {
        assert_eq!("pg".parse::<QueueBackendType>().unwrap(), QueueBackendType::Postgres);
        assert_eq!("memory".parse::<QueueBackendType>().unwrap(), QueueBackendType::Memory);
        assert!("rabbit".parse::<QueueBackendType>().is_err());
    }

    #[test]
    fn test_durations_deserialize_from_humantime() {
        let cfg: DeliveryConfig = toml::from_str("hold_ttl = \"90s\"\nhold_capacity = 5").unwrap();
        assert_eq!(cfg.hold_ttl, Duration::from_secs(90));
        assert_eq!(cfg.hold_capacity, 5);
        assert_eq!(cfg.sweep_interval, Duration::from_secs(1));
    }
}
