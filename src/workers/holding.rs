//! Holding area for results with no live owner
//!
//! A result whose session has no live connection is held, still unacked,
//! for a short TTL in case the client reconnects with the same session id.
//! The area is bounded; when full, new arrivals are refused and the caller
//! drops them.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::time::Instant;

use crate::core::queue::Delivery;
use crate::core::{SessionId, TranslationResult};

/// A result waiting for its session to come back
#[derive(Debug)]
pub struct Held {
    pub result: TranslationResult,
    /// Queue message to settle once the result is delivered or dropped
    pub delivery: Delivery,
    /// Forward hops the result has made so far
    pub hops: u32,
    pub deadline: Instant,
}

/// Bounded, TTL-based buffer of undeliverable results
pub struct HoldingArea {
    held: Mutex<HashMap<SessionId, VecDeque<Held>>>,
    count: AtomicUsize,
    capacity: usize,
    ttl: Duration,
    resumed: broadcast::Sender<SessionId>,
}

impl HoldingArea {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let (resumed, _) = broadcast::channel(1024);
        HoldingArea {
            held: Mutex::new(HashMap::new()),
            count: AtomicUsize::new(0),
            capacity,
            ttl,
            resumed,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Deadline for a result held now
    pub fn deadline_from_now(&self) -> Instant {
        Instant::now() + self.ttl
    }

    /// Hold a result; hands it back when the area is full
    pub async fn hold(&self, item: Held) -> Option<Held> {
        let mut held = self.held.lock().await;
        if self.count.load(Ordering::SeqCst) >= self.capacity {
            return Some(item);
        }
        held.entry(item.result.session_id.clone())
            .or_default()
            .push_back(item);
        self.count.fetch_add(1, Ordering::SeqCst);
        None
    }

    /// Remove everything held for `session`, oldest first
    pub async fn take(&self, session: &SessionId) -> Vec<Held> {
        let mut held = self.held.lock().await;
        let items: Vec<Held> = held.remove(session).map(Vec::from).unwrap_or_default();
        self.count.fetch_sub(items.len(), Ordering::SeqCst);
        items
    }

    /// Remove every result whose deadline has passed
    pub async fn take_expired(&self, now: Instant) -> Vec<Held> {
        let mut held = self.held.lock().await;
        let mut expired = Vec::new();
        held.retain(|_, queue| {
            let (gone, keep): (VecDeque<Held>, VecDeque<Held>) =
                queue.drain(..).partition(|h| h.deadline <= now);
            expired.extend(gone);
            *queue = keep;
            !queue.is_empty()
        });
        self.count.fetch_sub(expired.len(), Ordering::SeqCst);
        expired
    }

    /// Sessions with at least one held result
    pub async fn sessions(&self) -> Vec<SessionId> {
        self.held.lock().await.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Announce that `session` reconnected on this node
    pub fn session_resumed(&self, session: &SessionId) {
        // No subscribers simply means no result handlers in this process
        let _ = self.resumed.send(session.clone());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionId> {
        self.resumed.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::queue::{OutboundMessage, QueueProvider};
    use crate::core::{JobSubmission, TranslationJob};
    use crate::memory::MemoryQueue;

    async fn held(queue: &MemoryQueue, session: &str, deadline: Instant) -> Held {
        queue.publish("r", OutboundMessage::new(b"{}".to_vec())).await.unwrap();
        let mut consumer = queue.consume("r").await.unwrap();
        let delivery = consumer.next().await.unwrap().unwrap();
        let job = TranslationJob::from_submission(JobSubmission {
            text: "hello".into(),
            translator_backend: "yandex".into(),
            target_lang: "ru".into(),
            source_lang: None,
            session_id: SessionId::from(session),
        });
        Held {
            result: TranslationResult::success(&job, "привет", None),
            delivery,
            hops: 0,
            deadline,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_take_and_expire() {
        let queue = MemoryQueue::new();
        let area = HoldingArea::new(10, Duration::from_secs(60));

        assert!(area.hold(held(&queue, "S1", area.deadline_from_now()).await).await.is_none());
        assert!(area.hold(held(&queue, "S2", area.deadline_from_now()).await).await.is_none());
        assert_eq!(area.len(), 2);

        let s1 = area.take(&SessionId::from("S1")).await;
        assert_eq!(s1.len(), 1);
        assert_eq!(area.len(), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        let expired = area.take_expired(Instant::now()).await;
        assert_eq!(expired.len(), 1);
        assert!(area.is_empty());
        assert!(area.sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_capacity_bound() {
        let queue = MemoryQueue::new();
        let area = HoldingArea::new(1, Duration::from_secs(60));

        assert!(area.hold(held(&queue, "S1", area.deadline_from_now()).await).await.is_none());
        let refused = area.hold(held(&queue, "S2", area.deadline_from_now()).await).await;
        assert!(refused.is_some());
        assert_eq!(area.len(), 1);
    }
}
