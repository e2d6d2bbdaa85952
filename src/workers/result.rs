//! Result handler pool
//!
//! Consumes results and routes each one to the live connection of the
//! session that submitted the job:
//! - owner is this node → deliver through the local [`SessionSink`]
//! - owner is another node → forward over that node's queue
//! - no live owner → hold for a reconnect, drop after the hold TTL
//!
//! Every result reaches a terminal state (delivered, or dropped as a delivery
//! miss) exactly once per job id; later copies are suppressed by the
//! [`DeliveryLedger`].

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{DeliveryLedger, Held, HoldingArea};
use crate::core::queue::Delivery;
use crate::core::{DeliveryOutcome, ErrorKind, NodeId, SessionId, SessionSink, TranslationResult};
use crate::error::Result;
use crate::queue::{ForwardQueue, ForwardedResult, Inbound, Queues, ResultQueue};
use crate::registry::SessionRegistry;

/// Forwards allowed before a result is held locally instead
pub const MAX_FORWARD_HOPS: u32 = 2;

/// Where one result ended up
#[derive(Debug, Clone, PartialEq)]
pub enum ResultOutcome {
    Delivered,
    Forwarded { to: NodeId },
    Held,
    /// Hold TTL elapsed or holding area full
    Dropped,
    /// A copy for this job was already finished
    Duplicate,
    /// Registry or queue unavailable; message redelivered later
    Deferred,
    /// Undecodable payload rejected
    Rejected,
}

/// A result in flight through the router
struct Pending {
    result: TranslationResult,
    delivery: Delivery,
    hops: u32,
    /// Set once the result has been held, so re-holding keeps the deadline
    deadline: Option<Instant>,
}

/// Routes single results
pub struct ResultHandler {
    node: NodeId,
    registry: SessionRegistry,
    sink: Arc<dyn SessionSink>,
    queues: Queues,
    holding: Arc<HoldingArea>,
    ledger: DeliveryLedger,
    infra_retry_delay: Duration,
}

impl ResultHandler {
    pub fn new(
        node: NodeId,
        registry: SessionRegistry,
        sink: Arc<dyn SessionSink>,
        queues: Queues,
        holding: Arc<HoldingArea>,
        ledger: DeliveryLedger,
        infra_retry_delay: Duration,
    ) -> Self {
        ResultHandler {
            node,
            registry,
            sink,
            queues,
            holding,
            ledger,
            infra_retry_delay,
        }
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }

    pub fn holding(&self) -> &Arc<HoldingArea> {
        &self.holding
    }

    /// Handle a result from the shared result queue
    pub async fn handle(&self, inbound: Inbound<TranslationResult>) -> ResultOutcome {
        let Inbound { message, delivery } = inbound;
        match message {
            Ok(result) => {
                self.accept(Pending {
                    result,
                    delivery,
                    hops: 0,
                    deadline: None,
                })
                .await
            }
            Err(e) => {
                warn!(error = %e, "rejecting undecodable result");
                settle(delivery.reject().await);
                ResultOutcome::Rejected
            }
        }
    }

    /// Handle a result forwarded to this node
    pub async fn handle_forwarded(&self, inbound: Inbound<ForwardedResult>) -> ResultOutcome {
        let Inbound { message, delivery } = inbound;
        match message {
            Ok(forwarded) => {
                debug!(
                    job_id = %forwarded.result.job_id,
                    from = %forwarded.from_node,
                    hops = forwarded.hops,
                    "forwarded result received"
                );
                self.accept(Pending {
                    result: forwarded.result,
                    delivery,
                    hops: forwarded.hops,
                    deadline: None,
                })
                .await
            }
            Err(e) => {
                warn!(error = %e, "rejecting undecodable forwarded result");
                settle(delivery.reject().await);
                ResultOutcome::Rejected
            }
        }
    }

    async fn accept(&self, pending: Pending) -> ResultOutcome {
        match self.ledger.is_finished(&pending.result.job_id).await {
            Ok(true) => {
                debug!(job_id = %pending.result.job_id, "dropping duplicate result");
                settle(pending.delivery.ack().await);
                ResultOutcome::Duplicate
            }
            Ok(false) => self.route(pending).await,
            Err(e) => {
                warn!(job_id = %pending.result.job_id, error = %e, "ledger unavailable, deferring result");
                settle(pending.delivery.nack(self.infra_retry_delay).await);
                ResultOutcome::Deferred
            }
        }
    }

    async fn route(&self, pending: Pending) -> ResultOutcome {
        let session = pending.result.session_id.clone();

        let owner = match self.registry.lookup(&session).await {
            Ok(owner) => owner,
            Err(e) => {
                // Fail closed: keep the message, try again later
                warn!(session_id = %session, error = %e, "registry lookup failed, deferring result");
                return self.defer(pending).await;
            }
        };

        match owner {
            Some(node) if node == self.node => self.deliver_local(pending).await,
            Some(node) if pending.hops < MAX_FORWARD_HOPS => self.forward(pending, node).await,
            Some(node) => {
                debug!(session_id = %session, owner = %node, hops = pending.hops, "hop limit reached, holding");
                self.hold(pending).await
            }
            None => self.hold(pending).await,
        }
    }

    async fn deliver_local(&self, pending: Pending) -> ResultOutcome {
        match self.sink.deliver(&pending.result).await {
            DeliveryOutcome::Delivered => {
                info!(
                    job_id = %pending.result.job_id,
                    session_id = %pending.result.session_id,
                    node_id = %self.node,
                    retries = pending.result.retries,
                    "result delivered"
                );
                self.finish(&pending.result).await;
                settle(pending.delivery.ack().await);
                if let Err(e) = self.registry.touch(&pending.result.session_id, &self.node).await {
                    debug!(session_id = %pending.result.session_id, error = %e, "touch after delivery failed");
                }
                ResultOutcome::Delivered
            }
            DeliveryOutcome::ConnectionGone => {
                debug!(session_id = %pending.result.session_id, "connection gone, holding result");
                self.hold(pending).await
            }
        }
    }

    async fn forward(&self, pending: Pending, to: NodeId) -> ResultOutcome {
        let forwarded = ForwardedResult {
            from_node: self.node.clone(),
            hops: pending.hops + 1,
            result: pending.result.clone(),
        };
        let queue: ForwardQueue = self.queues.forward_queue(&to);

        match queue
            .publish(Some(pending.result.session_id.as_str()), &forwarded)
            .await
        {
            Ok(()) => {
                debug!(job_id = %pending.result.job_id, to = %to, "result forwarded");
                settle(pending.delivery.ack().await);
                ResultOutcome::Forwarded { to }
            }
            Err(e) => {
                warn!(job_id = %pending.result.job_id, to = %to, error = %e, "forward failed, deferring");
                self.defer(pending).await
            }
        }
    }

    async fn hold(&self, pending: Pending) -> ResultOutcome {
        let item = Held {
            deadline: pending
                .deadline
                .unwrap_or_else(|| self.holding.deadline_from_now()),
            result: pending.result,
            delivery: pending.delivery,
            hops: pending.hops,
        };
        if item.deadline <= Instant::now() {
            self.drop_miss(item, "hold TTL elapsed").await;
            return ResultOutcome::Dropped;
        }

        match self.holding.hold(item).await {
            None => ResultOutcome::Held,
            Some(refused) => {
                self.drop_miss(refused, "holding area full").await;
                ResultOutcome::Dropped
            }
        }
    }

    async fn defer(&self, pending: Pending) -> ResultOutcome {
        settle(pending.delivery.nack(self.infra_retry_delay).await);
        ResultOutcome::Deferred
    }

    async fn drop_miss(&self, held: Held, reason: &str) {
        info!(
            job_id = %held.result.job_id,
            session_id = %held.result.session_id,
            kind = %ErrorKind::DeliveryMiss,
            reason,
            "dropping undeliverable result"
        );
        self.finish(&held.result).await;
        settle(held.delivery.ack().await);
    }

    async fn finish(&self, result: &TranslationResult) {
        if let Err(e) = self.ledger.mark_finished(&result.job_id).await {
            warn!(job_id = %result.job_id, error = %e, "failed to record finished job");
        }
    }

    /// Re-route everything held for `session`
    pub async fn release(&self, session: &SessionId) -> Vec<ResultOutcome> {
        let mut outcomes = Vec::new();
        for held in self.holding.take(session).await {
            outcomes.push(self.reroute(held).await);
        }
        outcomes
    }

    async fn reroute(&self, held: Held) -> ResultOutcome {
        // Another copy of the job may have finished while this one was held
        self.accept(Pending {
            result: held.result,
            delivery: held.delivery,
            hops: held.hops,
            deadline: Some(held.deadline),
        })
        .await
    }

    /// Drop expired held results, then retry sessions that have an owner again
    pub async fn sweep(&self) -> usize {
        let expired = self.holding.take_expired(Instant::now()).await;
        let dropped = expired.len();
        for held in expired {
            self.drop_miss(held, "hold TTL elapsed").await;
        }

        for session in self.holding.sessions().await {
            match self.registry.lookup(&session).await {
                Ok(Some(owner)) if owner != self.node || self.sink.is_live(&session).await => {
                    self.release(&session).await;
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(session_id = %session, error = %e, "registry lookup failed during sweep");
                }
            }
        }
        dropped
    }
}

fn settle(result: Result<()>) {
    if let Err(e) = result {
        error!(error = %e, "failed to settle queue message");
    }
}

/// Result workers plus the forward-queue consumer and the holding sweeper
pub struct ResultHandlerPool {
    tasks: Vec<JoinHandle<()>>,
}

impl ResultHandlerPool {
    pub async fn start(
        handler: Arc<ResultHandler>,
        results: ResultQueue,
        forwards: ForwardQueue,
        workers: usize,
        sweep_interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self> {
        let mut tasks = Vec::with_capacity(workers + 3);

        for i in 0..workers {
            let mut consumer = results.consumer().await?;
            let handler = handler.clone();
            let mut shutdown = shutdown.clone();
            tasks.push(tokio::spawn(async move {
                info!(worker = i, queue = consumer.queue(), "result worker started");
                loop {
                    if *shutdown.borrow() {
                        break;
                    }
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        next = consumer.next() => match next {
                            Ok(Some(inbound)) => {
                                handler.handle(inbound).await;
                            }
                            Ok(None) => break,
                            Err(e) => {
                                error!(worker = i, error = %e, "result queue consume failed");
                                tokio::time::sleep(handler.infra_retry_delay).await;
                            }
                        },
                    }
                }
                info!(worker = i, "result worker stopped");
            }));
        }

        // Results addressed to this node
        {
            let mut consumer = forwards.consumer().await?;
            let handler = handler.clone();
            let mut shutdown = shutdown.clone();
            tasks.push(tokio::spawn(async move {
                info!(queue = consumer.queue(), "forward consumer started");
                loop {
                    if *shutdown.borrow() {
                        break;
                    }
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        next = consumer.next() => match next {
                            Ok(Some(inbound)) => {
                                handler.handle_forwarded(inbound).await;
                            }
                            Ok(None) => break,
                            Err(e) => {
                                error!(error = %e, "forward queue consume failed");
                                tokio::time::sleep(handler.infra_retry_delay).await;
                            }
                        },
                    }
                }
            }));
        }

        // Prompt delivery on reconnect
        {
            let mut resumed = handler.holding().subscribe();
            let handler = handler.clone();
            let mut shutdown = shutdown.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        session = resumed.recv() => match session {
                            Ok(session) => {
                                handler.release(&session).await;
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                debug!(skipped = n, "resume notifications lagged, sweep will catch up");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        },
                    }
                }
            }));
        }

        // Hold TTL and owner re-resolution
        {
            let handler = handler.clone();
            let mut shutdown = shutdown.clone();
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(sweep_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = ticker.tick() => {
                            handler.sweep().await;
                        }
                    }
                }
            }));
        }

        Ok(ResultHandlerPool { tasks })
    }

    /// Wait for every task to stop
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "result task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::core::store::RegistryStore;
    use crate::core::{JobSubmission, TranslationJob};
    use crate::memory::{MemoryQueue, MemoryStore};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use tokio::sync::Mutex;

    /// Sink with a configurable set of live sessions
    #[derive(Default)]
    struct RecordingSink {
        live: Mutex<HashSet<SessionId>>,
        delivered: Mutex<Vec<TranslationResult>>,
    }

    #[async_trait]
    impl SessionSink for RecordingSink {
        async fn is_live(&self, session: &SessionId) -> bool {
            self.live.lock().await.contains(session)
        }

        async fn deliver(&self, result: &TranslationResult) -> DeliveryOutcome {
            if self.live.lock().await.contains(&result.session_id) {
                self.delivered.lock().await.push(result.clone());
                DeliveryOutcome::Delivered
            } else {
                DeliveryOutcome::ConnectionGone
            }
        }
    }

    struct Fixture {
        provider: Arc<MemoryQueue>,
        queues: Queues,
        registry: SessionRegistry,
        sink: Arc<RecordingSink>,
        handler: ResultHandler,
    }

    fn fixture() -> Fixture {
        let provider = Arc::new(MemoryQueue::new());
        let store: Arc<dyn RegistryStore> = Arc::new(MemoryStore::new());
        let queues = Queues::new(provider.clone(), &QueueConfig::default());
        let registry = SessionRegistry::new(store.clone(), "t", Duration::from_secs(3600));
        let sink = Arc::new(RecordingSink::default());
        let handler = ResultHandler::new(
            NodeId::from("A"),
            registry.clone(),
            sink.clone(),
            queues.clone(),
            Arc::new(HoldingArea::new(100, Duration::from_secs(60))),
            DeliveryLedger::new(store, "t", Duration::from_secs(600), 1000),
            Duration::from_millis(10),
        );
        Fixture {
            provider,
            queues,
            registry,
            sink,
            handler,
        }
    }

    fn result_for(session: &str) -> TranslationResult {
        let job = TranslationJob::from_submission(JobSubmission {
            text: "hello".into(),
            translator_backend: "yandex".into(),
            target_lang: "ru".into(),
            source_lang: None,
            session_id: SessionId::from(session),
        });
        TranslationResult::success(&job, "привет", None)
    }

    async fn next(f: &Fixture) -> Inbound<TranslationResult> {
        let mut consumer = f.queues.results.consumer().await.unwrap();
        consumer.next().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_local_delivery() {
        let f = fixture();
        let s1 = SessionId::from("S1");
        f.registry.register(&s1, &NodeId::from("A")).await.unwrap();
        f.sink.live.lock().await.insert(s1.clone());

        f.queues.results.emit(&result_for("S1")).await.unwrap();
        assert_eq!(f.handler.handle(next(&f).await).await, ResultOutcome::Delivered);
        assert_eq!(f.sink.delivered.lock().await.len(), 1);
        assert_eq!(f.provider.stats("translation_results").await.acked, 1);
    }

    #[tokio::test]
    async fn test_duplicate_dropped_after_delivery() {
        let f = fixture();
        let s1 = SessionId::from("S1");
        f.registry.register(&s1, &NodeId::from("A")).await.unwrap();
        f.sink.live.lock().await.insert(s1);

        let result = result_for("S1");
        f.queues.results.emit(&result).await.unwrap();
        f.queues.results.emit(&result).await.unwrap();

        assert_eq!(f.handler.handle(next(&f).await).await, ResultOutcome::Delivered);
        assert_eq!(f.handler.handle(next(&f).await).await, ResultOutcome::Duplicate);
        assert_eq!(f.sink.delivered.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_forward_to_owner_node() {
        let f = fixture();
        let s1 = SessionId::from("S1");
        let b = NodeId::from("B");
        f.registry.register(&s1, &b).await.unwrap();

        f.queues.results.emit(&result_for("S1")).await.unwrap();
        assert_eq!(
            f.handler.handle(next(&f).await).await,
            ResultOutcome::Forwarded { to: b.clone() }
        );

        let mut consumer = f.queues.forward_queue(&b).consumer().await.unwrap();
        let forwarded = consumer.next().await.unwrap().unwrap().message.unwrap();
        assert_eq!(forwarded.hops, 1);
        assert_eq!(forwarded.from_node, NodeId::from("A"));
    }

    #[tokio::test]
    async fn test_hop_limit_holds_instead_of_forwarding() {
        let f = fixture();
        let s1 = SessionId::from("S1");
        f.registry.register(&s1, &NodeId::from("B")).await.unwrap();

        let forwarded = ForwardedResult {
            from_node: NodeId::from("B"),
            hops: MAX_FORWARD_HOPS,
            result: result_for("S1"),
        };
        let queue = f.queues.forward_queue(&NodeId::from("A"));
        queue.publish(Some("S1"), &forwarded).await.unwrap();
        let inbound = queue.consumer().await.unwrap().next().await.unwrap().unwrap();

        assert_eq!(f.handler.handle_forwarded(inbound).await, ResultOutcome::Held);
        assert_eq!(f.handler.holding().len(), 1);
    }

    #[tokio::test]
    async fn test_disconnected_session_is_held_then_delivered_on_resume() {
        let f = fixture();
        let s1 = SessionId::from("S1");
        let a = NodeId::from("A");
        f.registry.register(&s1, &a).await.unwrap();
        f.registry.mark_disconnected(&s1, &a).await.unwrap();

        f.queues.results.emit(&result_for("S1")).await.unwrap();
        assert_eq!(f.handler.handle(next(&f).await).await, ResultOutcome::Held);

        // Reconnect
        f.registry.claim_existing(&s1, &a).await.unwrap();
        f.sink.live.lock().await.insert(s1.clone());

        assert_eq!(f.handler.release(&s1).await, vec![ResultOutcome::Delivered]);
        assert_eq!(f.sink.delivered.lock().await.len(), 1);
        assert!(f.handler.holding().is_empty());
    }

    #[tokio::test]
    async fn test_held_copies_of_one_job_delivered_once() {
        let f = fixture();
        let s1 = SessionId::from("S1");
        let a = NodeId::from("A");
        f.registry.register(&s1, &a).await.unwrap();
        f.registry.mark_disconnected(&s1, &a).await.unwrap();

        let result = result_for("S1");
        f.queues.results.emit(&result).await.unwrap();
        f.queues.results.emit(&result).await.unwrap();
        assert_eq!(f.handler.handle(next(&f).await).await, ResultOutcome::Held);
        assert_eq!(f.handler.handle(next(&f).await).await, ResultOutcome::Held);

        f.registry.claim_existing(&s1, &a).await.unwrap();
        f.sink.live.lock().await.insert(s1.clone());

        assert_eq!(
            f.handler.release(&s1).await,
            vec![ResultOutcome::Delivered, ResultOutcome::Duplicate]
        );
        assert_eq!(f.sink.delivered.lock().await.len(), 1);
        assert_eq!(f.provider.stats("translation_results").await.acked, 2);
        assert!(f.handler.holding().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_leaves_held_result_until_owner_is_live() {
        let f = fixture();
        let s1 = SessionId::from("S1");
        let a = NodeId::from("A");
        f.registry.register(&s1, &a).await.unwrap();

        // Registered here but no connection attached yet
        f.queues.results.emit(&result_for("S1")).await.unwrap();
        assert_eq!(f.handler.handle(next(&f).await).await, ResultOutcome::Held);
        assert_eq!(f.handler.sweep().await, 0);
        assert_eq!(f.handler.holding().len(), 1);

        f.sink.live.lock().await.insert(s1);
        f.handler.sweep().await;
        assert!(f.handler.holding().is_empty());
        assert_eq!(f.sink.delivered.lock().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_held_result_dropped_after_ttl() {
        let f = fixture();
        f.queues.results.emit(&result_for("S9")).await.unwrap();
        assert_eq!(f.handler.handle(next(&f).await).await, ResultOutcome::Held);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(f.handler.sweep().await, 0);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(f.handler.sweep().await, 1);
        assert!(f.handler.holding().is_empty());
        assert_eq!(f.provider.stats("translation_results").await.acked, 1);
        assert!(f.sink.delivered.lock().await.is_empty());
    }
}
