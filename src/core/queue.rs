//! Queue trait - Abstract interface for the durable work queue
//!
//! The broker assumes an externally provided queue with at-least-once
//! delivery and per-message acknowledgment. Implementations live in
//! `memory` (in-process) and `database` (PostgreSQL).
//!
//! A consumer receives a [`Delivery`] and must settle it exactly once:
//! - `ack`: side effects are complete, remove the message
//! - `requeue`: negative acknowledgment, redeliver (possibly with an updated
//!   body and a delay)
//! - `reject`: poison message, drop without redelivery
//!
//! A delivery dropped without being settled is redelivered by the provider.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// A message to publish
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Optional routing key (session id for results)
    pub route_key: Option<String>,
    /// Serialized payload
    pub body: Vec<u8>,
}

impl OutboundMessage {
    pub fn new(body: Vec<u8>) -> Self {
        OutboundMessage {
            route_key: None,
            body,
        }
    }

    pub fn with_route_key(mut self, key: impl Into<String>) -> Self {
        self.route_key = Some(key.into());
        self
    }
}

/// Provider-specific settlement of one delivered message
#[async_trait]
pub trait Acker: Send + Sync {
    /// Positive acknowledgment
    async fn ack(self: Box<Self>) -> Result<()>;

    /// Negative acknowledgment with redelivery of `body` after `delay`
    async fn requeue(self: Box<Self>, body: Vec<u8>, delay: Duration) -> Result<()>;

    /// Drop the message without redelivery
    async fn reject(self: Box<Self>) -> Result<()>;
}

/// A message handed to a consumer, together with its ack handle
pub struct Delivery {
    /// Serialized payload
    pub body: Vec<u8>,
    /// Routing key the message was published with
    pub route_key: Option<String>,
    /// How many times this message has been delivered (1 on first delivery)
    pub delivery_count: u32,
    acker: Box<dyn Acker>,
}

impl Delivery {
    pub fn new(
        body: Vec<u8>,
        route_key: Option<String>,
        delivery_count: u32,
        acker: Box<dyn Acker>,
    ) -> Self {
        Delivery {
            body,
            route_key,
            delivery_count,
            acker,
        }
    }

    /// Whether the provider has delivered this message before
    pub fn redelivered(&self) -> bool {
        self.delivery_count > 1
    }

    pub async fn ack(self) -> Result<()> {
        self.acker.ack().await
    }

    /// Redeliver the original body after `delay`
    pub async fn nack(self, delay: Duration) -> Result<()> {
        let body = self.body;
        self.acker.requeue(body, delay).await
    }

    /// Redeliver a replacement body after `delay`
    pub async fn requeue_with(self, body: Vec<u8>, delay: Duration) -> Result<()> {
        self.acker.requeue(body, delay).await
    }

    pub async fn reject(self) -> Result<()> {
        self.acker.reject().await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("bytes", &self.body.len())
            .field("route_key", &self.route_key)
            .field("delivery_count", &self.delivery_count)
            .finish()
    }
}

/// A competing consumer on one queue
#[async_trait]
pub trait Consumer: Send {
    /// Wait for the next message. `None` means the queue was closed.
    async fn next(&mut self) -> Result<Option<Delivery>>;
}

/// Durable queue provider
#[async_trait]
pub trait QueueProvider: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &str;

    /// Enqueue a message; returns only once the message is persisted
    async fn publish(&self, queue: &str, message: OutboundMessage) -> Result<()>;

    /// Open a new competing consumer on `queue`
    async fn consume(&self, queue: &str) -> Result<Box<dyn Consumer>>;

    /// Cheap reachability check
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
