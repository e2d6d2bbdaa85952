//! Retry delay policy for transient backend failures
//!
//! The retry counter travels in the job payload, so the delay is computed
//! from the counter alone instead of from an in-memory backoff session.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::time::Duration;

use crate::config::WorkerConfig;

/// Exponential backoff keyed by attempt number
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
}

impl RetryPolicy {
    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        RetryPolicy {
            initial,
            max,
            multiplier: multiplier.max(1.0),
            jitter: jitter.clamp(0.0, 0.99),
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(
            config.initial_backoff,
            config.max_backoff,
            config.backoff_multiplier,
            config.backoff_jitter,
        )
    }

    /// Delay before redelivering a job that has failed `attempt + 1` times
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let mut backoff = ExponentialBackoff {
            current_interval: self.initial,
            initial_interval: self.initial,
            randomization_factor: self.jitter,
            multiplier: self.multiplier,
            max_interval: self.max,
            max_elapsed_time: None,
            ..Default::default()
        };

        let mut delay = self.initial;
        for _ in 0..=attempt {
            delay = backoff.next_backoff().unwrap_or(self.max);
        }
        delay.min(self.max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&WorkerConfig::default())
    }
}
