//! Typed queue adapters
//!
//! Wrap a [`QueueProvider`] with JSON (de)serialization for the three message
//! shapes the broker moves around:
//! - [`RequestQueue`]: translation jobs, routed by session id
//! - [`ResultQueue`]: translation results, routed by session id
//! - [`ForwardQueue`]: results re-addressed to the node that owns the session
//! - [`RoomRelayQueue`]: room operations for sessions connected to another node
//!
//! Undecodable payloads are surfaced as `Err` in [`Inbound::message`] so the
//! caller can reject them instead of redelivering a poison message forever.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::config::QueueConfig;
use crate::core::queue::{Consumer, Delivery, OutboundMessage, QueueProvider};
use crate::core::{NodeId, SessionId, TranslationJob, TranslationResult};
use crate::error::Result;

/// A queue carrying JSON-encoded `T`
pub struct TypedQueue<T> {
    provider: Arc<dyn QueueProvider>,
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for TypedQueue<T> {
    fn clone(&self) -> Self {
        TypedQueue {
            provider: self.provider.clone(),
            name: self.name.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for TypedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedQueue")
            .field("provider", &self.provider.name())
            .field("name", &self.name)
            .finish()
    }
}

impl<T> TypedQueue<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    pub fn new(provider: Arc<dyn QueueProvider>, name: impl Into<String>) -> Self {
        TypedQueue {
            provider,
            name: name.into(),
            _marker: PhantomData,
        }
    }

    /// Queue name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Serialize and publish; resolves once the provider has persisted it
    pub async fn publish(&self, route_key: Option<&str>, message: &T) -> Result<()> {
        let body = serde_json::to_vec(message)?;
        let mut outbound = OutboundMessage::new(body);
        if let Some(key) = route_key {
            outbound = outbound.with_route_key(key);
        }
        self.provider.publish(&self.name, outbound).await
    }

    /// Open a competing consumer
    pub async fn consumer(&self) -> Result<TypedConsumer<T>> {
        Ok(TypedConsumer {
            inner: self.provider.consume(&self.name).await?,
            queue: self.name.clone(),
            _marker: PhantomData,
        })
    }
}

/// Consumer half of a [`TypedQueue`]
pub struct TypedConsumer<T> {
    inner: Box<dyn Consumer>,
    queue: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> TypedConsumer<T> {
    /// Next message, decoded. `None` once the queue is closed.
    pub async fn next(&mut self) -> Result<Option<Inbound<T>>> {
        let Some(delivery) = self.inner.next().await? else {
            return Ok(None);
        };
        let message = serde_json::from_slice(&delivery.body).map_err(|e| e.to_string());
        Ok(Some(Inbound { message, delivery }))
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }
}

/// A decoded message plus its settlement handle
#[derive(Debug)]
pub struct Inbound<T> {
    /// Decoded payload, or the decode error for a poison message
    pub message: std::result::Result<T, String>,
    pub delivery: Delivery,
}

impl<T: Serialize> Inbound<T> {
    /// Times the provider has handed out this message (1 on first delivery)
    pub fn delivery_count(&self) -> u32 {
        self.delivery.delivery_count
    }

    pub async fn ack(self) -> Result<()> {
        self.delivery.ack().await
    }

    /// Redeliver the original payload after `delay`
    pub async fn nack(self, delay: Duration) -> Result<()> {
        self.delivery.nack(delay).await
    }

    /// Redeliver an updated payload after `delay`
    pub async fn requeue(self, updated: &T, delay: Duration) -> Result<()> {
        let body = serde_json::to_vec(updated)?;
        self.delivery.requeue_with(body, delay).await
    }

    /// Drop without redelivery
    pub async fn reject(self) -> Result<()> {
        self.delivery.reject().await
    }
}

/// A result re-addressed to the node holding the session's connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardedResult {
    pub from_node: NodeId,
    /// Forwards so far; bounded to stop ping-pong between stale owners
    pub hops: u32,
    pub result: TranslationResult,
}

/// Room operation addressed to the node holding a session's connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RoomRelay {
    /// Write `message` to the occupant of `room_id`
    #[serde(rename_all = "camelCase")]
    Send {
        room_id: String,
        session_id: SessionId,
        message: serde_json::Value,
    },
    /// Remove `session_id` from its room
    #[serde(rename_all = "camelCase")]
    Kick { session_id: SessionId },
}

pub type RequestQueue = TypedQueue<TranslationJob>;
pub type ResultQueue = TypedQueue<TranslationResult>;
pub type ForwardQueue = TypedQueue<ForwardedResult>;
pub type RoomRelayQueue = TypedQueue<RoomRelay>;

impl TypedQueue<TranslationJob> {
    /// Enqueue a job keyed by its session
    pub async fn enqueue(&self, job: &TranslationJob) -> Result<()> {
        self.publish(Some(job.session_id.as_str()), job).await
    }
}

impl TypedQueue<TranslationResult> {
    /// Publish a result keyed by its session
    pub async fn emit(&self, result: &TranslationResult) -> Result<()> {
        self.publish(Some(result.session_id.as_str()), result).await
    }
}

/// Name of the forward queue owned by `node`
pub fn node_queue_name(prefix: &str, node: &NodeId) -> String {
    format!("{}.{}", prefix, node)
}

/// The broker's queues over one provider
#[derive(Clone)]
pub struct Queues {
    provider: Arc<dyn QueueProvider>,
    pub requests: RequestQueue,
    pub results: ResultQueue,
    node_prefix: String,
}

impl Queues {
    pub fn new(provider: Arc<dyn QueueProvider>, config: &QueueConfig) -> Self {
        Queues {
            requests: RequestQueue::new(provider.clone(), &config.request_queue),
            results: ResultQueue::new(provider.clone(), &config.result_queue),
            node_prefix: config.node_queue_prefix.clone(),
            provider,
        }
    }

    /// Forward queue consumed by `node`'s result handlers
    pub fn forward_queue(&self, node: &NodeId) -> ForwardQueue {
        ForwardQueue::new(self.provider.clone(), node_queue_name(&self.node_prefix, node))
    }

    /// Room relay queue consumed by `node`'s session router
    pub fn room_relay_queue(&self, node: &NodeId) -> RoomRelayQueue {
        RoomRelayQueue::new(
            self.provider.clone(),
            format!("{}.rooms", node_queue_name(&self.node_prefix, node)),
        )
    }

    pub fn provider(&self) -> &Arc<dyn QueueProvider> {
        &self.provider
    }
}
