//! In-process durable-queue stand-in
//!
//! Competing consumers share one unbounded channel per queue. Settlement
//! follows broker semantics: an unsettled delivery that is dropped goes back
//! on the queue, and a delayed requeue is scheduled on the tokio timer so
//! paused-time tests can drive backoff deterministically.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::core::queue::{Acker, Consumer, Delivery, OutboundMessage, QueueProvider};
use crate::error::Result;

struct Envelope {
    body: Vec<u8>,
    route_key: Option<String>,
    deliveries: u32,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    acked: AtomicU64,
    requeued: AtomicU64,
    rejected: AtomicU64,
    redelivered: AtomicU64,
}

struct QueueState {
    name: String,
    tx: mpsc::UnboundedSender<Envelope>,
    rx: Mutex<mpsc::UnboundedReceiver<Envelope>>,
    counters: Counters,
}

impl QueueState {
    fn new(name: &str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        QueueState {
            name: name.to_string(),
            tx,
            rx: Mutex::new(rx),
            counters: Counters::default(),
        }
    }

    fn enqueue(&self, envelope: Envelope) {
        // The receiver lives as long as the state, so send cannot fail.
        let _ = self.tx.send(envelope);
    }
}

/// Snapshot of a queue's settlement counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub published: u64,
    pub acked: u64,
    pub requeued: u64,
    pub rejected: u64,
    /// Deliveries dropped unsettled and handed out again
    pub redelivered: u64,
}

/// In-process queue provider
#[derive(Default)]
pub struct MemoryQueue {
    queues: Mutex<HashMap<String, Arc<QueueState>>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    async fn state(&self, queue: &str) -> Arc<QueueState> {
        let mut queues = self.queues.lock().await;
        queues
            .entry(queue.to_string())
            .or_insert_with(|| Arc::new(QueueState::new(queue)))
            .clone()
    }

    /// Counters for one queue (zeroes if it was never used)
    pub async fn stats(&self, queue: &str) -> QueueStats {
        let queues = self.queues.lock().await;
        match queues.get(queue) {
            Some(state) => {
                let c = &state.counters;
                QueueStats {
                    published: c.published.load(Ordering::Relaxed),
                    acked: c.acked.load(Ordering::Relaxed),
                    requeued: c.requeued.load(Ordering::Relaxed),
                    rejected: c.rejected.load(Ordering::Relaxed),
                    redelivered: c.redelivered.load(Ordering::Relaxed),
                }
            }
            None => QueueStats::default(),
        }
    }
}

#[async_trait]
impl QueueProvider for MemoryQueue {
    fn name(&self) -> &str {
        "memory"
    }

    async fn publish(&self, queue: &str, message: OutboundMessage) -> Result<()> {
        let state = self.state(queue).await;
        state.counters.published.fetch_add(1, Ordering::Relaxed);
        state.enqueue(Envelope {
            body: message.body,
            route_key: message.route_key,
            deliveries: 0,
        });
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<Box<dyn Consumer>> {
        Ok(Box::new(MemoryConsumer {
            state: self.state(queue).await,
        }))
    }
}

struct MemoryConsumer {
    state: Arc<QueueState>,
}

#[async_trait]
impl Consumer for MemoryConsumer {
    async fn next(&mut self) -> Result<Option<Delivery>> {
        let received = {
            let mut rx = self.state.rx.lock().await;
            rx.recv().await
        };

        Ok(received.map(|mut envelope| {
            envelope.deliveries += 1;
            debug!(
                queue = %self.state.name,
                deliveries = envelope.deliveries,
                "memory queue delivery"
            );
            Delivery::new(
                envelope.body.clone(),
                envelope.route_key.clone(),
                envelope.deliveries,
                Box::new(MemoryAcker {
                    state: self.state.clone(),
                    envelope: Some(envelope),
                }),
            )
        }))
    }
}

struct MemoryAcker {
    state: Arc<QueueState>,
    envelope: Option<Envelope>,
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(mut self: Box<Self>) -> Result<()> {
        self.envelope.take();
        self.state.counters.acked.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn requeue(mut self: Box<Self>, body: Vec<u8>, delay: Duration) -> Result<()> {
        let Some(previous) = self.envelope.take() else {
            return Ok(());
        };
        self.state.counters.requeued.fetch_add(1, Ordering::Relaxed);

        let envelope = Envelope {
            body,
            route_key: previous.route_key,
            deliveries: previous.deliveries,
        };

        if delay.is_zero() {
            self.state.enqueue(envelope);
        } else {
            let state = self.state.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                state.enqueue(envelope);
            });
        }
        Ok(())
    }

    async fn reject(mut self: Box<Self>) -> Result<()> {
        self.envelope.take();
        self.state.counters.rejected.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl Drop for MemoryAcker {
    fn drop(&mut self) {
        if let Some(envelope) = self.envelope.take() {
            self.state.counters.redelivered.fetch_add(1, Ordering::Relaxed);
            self.state.enqueue(envelope);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_consume_ack() {
        let queue = MemoryQueue::new();
        queue
            .publish("jobs", OutboundMessage::new(b"one".to_vec()).with_route_key("S1"))
            .await
            .unwrap();

        let mut consumer = queue.consume("jobs").await.unwrap();
        let delivery = consumer.next().await.unwrap().unwrap();
        assert_eq!(delivery.body, b"one");
        assert_eq!(delivery.route_key.as_deref(), Some("S1"));
        assert!(!delivery.redelivered());
        delivery.ack().await.unwrap();

        let stats = queue.stats("jobs").await;
        assert_eq!(stats.published, 1);
        assert_eq!(stats.acked, 1);
    }

    #[tokio::test]
    async fn test_unsettled_delivery_is_redelivered() {
        let queue = MemoryQueue::new();
        queue.publish("jobs", OutboundMessage::new(b"x".to_vec())).await.unwrap();

        let mut consumer = queue.consume("jobs").await.unwrap();
        drop(consumer.next().await.unwrap());

        let again = consumer.next().await.unwrap().unwrap();
        assert_eq!(again.delivery_count, 2);
        assert!(again.redelivered());
        again.reject().await.unwrap();

        let stats = queue.stats("jobs").await;
        assert_eq!(stats.redelivered, 1);
        assert_eq!(stats.rejected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_requeue() {
        let queue = MemoryQueue::new();
        queue.publish("jobs", OutboundMessage::new(b"v1".to_vec())).await.unwrap();

        let mut consumer = queue.consume("jobs").await.unwrap();
        let delivery = consumer.next().await.unwrap().unwrap();
        delivery
            .requeue_with(b"v2".to_vec(), Duration::from_secs(5))
            .await
            .unwrap();

        let started = tokio::time::Instant::now();
        let again = consumer.next().await.unwrap().unwrap();
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(again.body, b"v2");
        assert_eq!(again.delivery_count, 2);
    }

    #[tokio::test]
    async fn test_consumer_waits_for_publish() {
        let queue = MemoryQueue::new();
        let mut consumer = queue.consume("jobs").await.unwrap();

        let mut next = tokio_test::task::spawn(consumer.next());
        tokio_test::assert_pending!(next.poll());

        queue.publish("jobs", OutboundMessage::new(b"late".to_vec())).await.unwrap();
        assert!(next.is_woken());
        let delivery = tokio_test::assert_ready_ok!(next.poll()).unwrap();
        assert_eq!(delivery.body, b"late");
    }
}
