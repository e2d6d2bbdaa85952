//! Gateway session router
//!
//! Owns the live connections of this process. The local table is a cache of
//! the shared registry: every claim goes through the registry first, and the
//! periodic sweep reconciles local entries against it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::connection::ConnectionHandle;
use super::protocol::{
    error_codes, ConnectionEstablished, HealthResponse, KickResponse, RoomCheckResponse,
    RoomEvent, RoomMessage, RoomSendResponse, ServerMessage,
};
use crate::config::Config;
use crate::core::{
    DeliveryOutcome, JobId, JobSubmission, NodeId, SessionId, SessionSink, SessionState,
    TranslationJob, TranslationResult,
};
use crate::error::{Error, Result};
use crate::queue::{Inbound, Queues, RoomRelay};
use crate::registry::{Registration, RoomClaim, RoomDirectory, SessionRegistry};
use crate::workers::HoldingArea;

/// Fresh ids tried before giving up on registration
const MAX_REGISTER_ATTEMPTS: usize = 3;

/// Pause after a failed read from the room relay queue
const RELAY_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Router limits and submission policy
#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub max_connections: usize,
    pub max_text_chars: usize,
    /// Backend selectors accepted at submission (case-insensitive)
    pub allowed_translators: Vec<String>,
    /// Grace period a disconnected session keeps its id
    pub session_ttl: Duration,
}

impl RouterSettings {
    pub fn from_config(config: &Config) -> Self {
        RouterSettings {
            max_connections: config.gateway.max_connections,
            max_text_chars: config.gateway.max_text_chars,
            allowed_translators: config.translators.allowed.clone(),
            session_ttl: config.session.ttl,
        }
    }

    fn is_allowed(&self, backend: &str) -> bool {
        self.allowed_translators
            .iter()
            .any(|b| b.eq_ignore_ascii_case(backend))
    }
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

struct LocalSession {
    conn: Option<ConnectionHandle>,
    room: Option<String>,
    state: SessionState,
    disconnected_at: Option<Instant>,
}

impl LocalSession {
    fn new() -> Self {
        LocalSession {
            conn: None,
            room: None,
            state: SessionState::Connecting,
            disconnected_at: None,
        }
    }
}

/// Result of accepting a live connection
#[derive(Debug, Clone, PartialEq)]
pub struct Connected {
    pub session_id: SessionId,
    pub resumed: bool,
    pub room_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomAssignment {
    pub room_id: String,
    pub session_id: SessionId,
}

/// Snapshot of the local connection table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterStats {
    pub node_id: String,
    pub local_sessions: usize,
    pub live_connections: usize,
    pub disconnected_sessions: usize,
    pub max_connections: usize,
    pub held_results: usize,
    pub rooms: Vec<RoomAssignment>,
}

pub struct SessionRouter {
    node: NodeId,
    registry: SessionRegistry,
    rooms: RoomDirectory,
    queues: Queues,
    holding: Arc<HoldingArea>,
    settings: RouterSettings,
    sessions: RwLock<HashMap<SessionId, LocalSession>>,
    live: AtomicUsize,
}

impl SessionRouter {
    pub fn new(
        node: NodeId,
        registry: SessionRegistry,
        rooms: RoomDirectory,
        queues: Queues,
        holding: Arc<HoldingArea>,
        settings: RouterSettings,
    ) -> Self {
        SessionRouter {
            node,
            registry,
            rooms,
            queues,
            holding,
            settings,
            sessions: RwLock::new(HashMap::new()),
            live: AtomicUsize::new(0),
        }
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }

    pub fn settings(&self) -> &RouterSettings {
        &self.settings
    }

    /// Live connections currently attached to this node
    pub fn live_connections(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    fn reserve_slot(&self) -> Result<()> {
        let max = self.settings.max_connections;
        self.live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
            .map(|_| ())
            .map_err(|n| Error::Capacity(format!("{} of {} connections in use", n, max)))
    }

    fn release_slot(&self) {
        let _ = self
            .live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    /// Accept a live connection, optionally resuming an earlier session
    ///
    /// An unknown or expired `resume` id is never revived; a fresh id is
    /// issued instead. `connection_established` is sent down `conn` before
    /// this returns, and any results held for a resumed session are released
    /// afterwards.
    pub async fn connect(
        &self,
        conn: ConnectionHandle,
        resume: Option<SessionId>,
    ) -> Result<Connected> {
        self.reserve_slot()?;
        match self.establish(conn, resume).await {
            Ok(connected) => Ok(connected),
            Err(e) => {
                self.release_slot();
                Err(e)
            }
        }
    }

    async fn establish(
        &self,
        conn: ConnectionHandle,
        resume: Option<SessionId>,
    ) -> Result<Connected> {
        let reclaimed = match resume.filter(|id| !id.as_str().is_empty()) {
            Some(id) => match self
                .registry
                .claim_existing(&id, &self.node)
                .await
                .map_err(Error::fail_closed)?
            {
                Some(registration) => {
                    info!(session_id = %id, node_id = %self.node, ?registration, "session resumed");
                    Some(id)
                }
                None => {
                    debug!(session_id = %id, "unknown or expired session id, issuing a new one");
                    None
                }
            },
            None => None,
        };

        let (session_id, resumed) = match reclaimed {
            Some(id) => (id, true),
            None => (self.register_new().await?, false),
        };

        let (room_id, replaced) = {
            let mut sessions = self.sessions.write().await;
            let entry = sessions
                .entry(session_id.clone())
                .or_insert_with(LocalSession::new);
            let replaced = entry.conn.replace(conn.clone());
            entry.state = SessionState::Active;
            entry.disconnected_at = None;
            (entry.room.clone(), replaced)
        };
        if replaced.is_some() {
            // The older socket closes once its handle is dropped
            self.release_slot();
            debug!(session_id = %session_id, "replaced older connection for session");
        }

        let established = ServerMessage::ConnectionEstablished(ConnectionEstablished {
            session_id: session_id.clone(),
            room_id: room_id.clone(),
            resumed,
            node_id: self.node.to_string(),
        });
        if conn.send(established).await.is_err() {
            debug!(session_id = %session_id, "connection closed before it was established");
        }

        if resumed {
            self.holding.session_resumed(&session_id);
        } else {
            info!(session_id = %session_id, node_id = %self.node, "session created");
        }

        Ok(Connected {
            session_id,
            resumed,
            room_id,
        })
    }

    async fn register_new(&self) -> Result<SessionId> {
        for _ in 0..MAX_REGISTER_ATTEMPTS {
            let id = SessionId::generate();
            match self.registry.register(&id, &self.node).await {
                Ok(Registration::Created) => return Ok(id),
                Ok(other) => {
                    warn!(?other, "generated session id collided with a live entry");
                }
                Err(Error::SessionConflict { .. }) => {}
                Err(e) => return Err(e.fail_closed()),
            }
        }
        Err(Error::Internal("could not allocate a session id".into()))
    }

    /// Detach `conn` from its session
    ///
    /// The registry entry is kept (marked disconnected) so the client can
    /// resume within the session TTL. A stale handle that was already
    /// replaced by a newer connection is ignored.
    pub async fn disconnect(&self, session: &SessionId, conn_id: Uuid) {
        let room = {
            let mut sessions = self.sessions.write().await;
            match sessions.get_mut(session) {
                Some(entry) if entry.conn.as_ref().map(|c| c.id()) == Some(conn_id) => {
                    entry.conn = None;
                    entry.state = SessionState::Disconnected;
                    entry.disconnected_at = Some(Instant::now());
                    entry.room.take()
                }
                _ => return,
            }
        };
        self.release_slot();

        if let Some(room) = room {
            self.release_room(&room, session).await;
        }
        if let Err(e) = self.registry.mark_disconnected(session, &self.node).await {
            warn!(session_id = %session, error = %e, "failed to mark session disconnected");
        }
        info!(session_id = %session, node_id = %self.node, "session disconnected");
    }

    /// Inbound activity from the client
    pub async fn touch(&self, session: &SessionId) {
        if let Err(e) = self.registry.touch(session, &self.node).await {
            debug!(session_id = %session, error = %e, "registry touch failed");
        }
    }

    // ------------------------------------------------------------------
    // Job submission
    // ------------------------------------------------------------------

    /// Validate a submission and publish it to the request queue
    ///
    /// Rejected submissions never reach the queue. Registry and queue
    /// failures surface as `Unavailable`.
    pub async fn submit(&self, submission: JobSubmission) -> Result<JobId> {
        let job = TranslationJob::from_submission(submission);
        job.validate()?;

        let chars = job.text.chars().count();
        if chars > self.settings.max_text_chars {
            return Err(Error::Validation(format!(
                "text is {} characters, limit is {}",
                chars, self.settings.max_text_chars
            )));
        }
        if !self.settings.is_allowed(&job.backend) {
            return Err(Error::Validation(format!(
                "translator backend '{}' is not allowed",
                job.backend
            )));
        }
        if !self.session_known(&job.session_id).await? {
            return Err(Error::SessionNotFound(job.session_id.to_string()));
        }

        self.queues.requests.enqueue(&job).await.map_err(Error::fail_closed)?;
        info!(
            job_id = %job.id,
            session_id = %job.session_id,
            backend = %job.backend,
            target_lang = %job.target_lang,
            "job accepted"
        );

        self.touch(&job.session_id).await;
        Ok(job.id)
    }

    async fn session_known(&self, session: &SessionId) -> Result<bool> {
        let local = self
            .sessions
            .read()
            .await
            .get(session)
            .is_some_and(|entry| entry.state != SessionState::Expired);
        if local {
            return Ok(true);
        }
        self.registry.exists(session).await.map_err(Error::fail_closed)
    }

    // ------------------------------------------------------------------
    // Rooms
    // ------------------------------------------------------------------

    /// Join `room_id`, leaving the current room once the new one is held
    pub async fn join_room(&self, session: &SessionId, room_id: &str) -> Result<Vec<ServerMessage>> {
        let room_id = room_id.trim();
        if room_id.is_empty() {
            return Err(Error::Validation("roomId must not be empty".into()));
        }

        let current = match self.sessions.read().await.get(session) {
            Some(entry) => entry.room.clone(),
            None => return Err(Error::SessionNotFound(session.to_string())),
        };

        if current.as_deref() == Some(room_id) {
            if let Err(e) = self.rooms.refresh(room_id, session).await {
                debug!(room_id, error = %e, "room refresh failed");
            }
            return Ok(vec![ServerMessage::RoomJoined(RoomEvent::joined(room_id))]);
        }

        match self
            .rooms
            .claim(room_id, session, &self.node)
            .await
            .map_err(Error::fail_closed)?
        {
            RoomClaim::Occupied { by } => {
                debug!(room_id, session_id = %session, occupant = %by, "room occupied");
                Ok(vec![ServerMessage::RoomOccupied(RoomEvent::occupied(room_id))])
            }
            RoomClaim::Joined | RoomClaim::AlreadyHeld => {
                let attached = {
                    let mut sessions = self.sessions.write().await;
                    match sessions.get_mut(session) {
                        Some(entry) => {
                            entry.room = Some(room_id.to_string());
                            true
                        }
                        None => false,
                    }
                };
                if !attached {
                    // Session went away while the claim was in flight
                    self.release_room(room_id, session).await;
                    return Err(Error::SessionNotFound(session.to_string()));
                }

                let mut replies = Vec::with_capacity(2);
                if let Some(previous) = current {
                    self.release_room(&previous, session).await;
                    replies.push(ServerMessage::RoomLeft(RoomEvent::left(&previous)));
                }
                info!(room_id, session_id = %session, "room joined");
                replies.push(ServerMessage::RoomJoined(RoomEvent::joined(room_id)));
                Ok(replies)
            }
        }
    }

    /// Release a room on a path that cannot report failure
    ///
    /// A release lost to a store outage is harmless: the room becomes
    /// reclaimable once its session expires.
    async fn release_room(&self, room: &str, session: &SessionId) {
        if let Err(e) = self.rooms.release(room, session).await {
            warn!(session_id = %session, room_id = %room, error = %e, "failed to release room");
        }
    }

    pub async fn leave_room(&self, session: &SessionId) -> Result<ServerMessage> {
        let room = match self.sessions.write().await.get_mut(session) {
            Some(entry) => entry.room.take(),
            None => return Err(Error::SessionNotFound(session.to_string())),
        };
        let Some(room) = room else {
            return Ok(ServerMessage::error(
                error_codes::NOT_IN_ROOM,
                "Session is not in a room",
            ));
        };
        self.rooms
            .release(&room, session)
            .await
            .map_err(Error::fail_closed)?;
        info!(room_id = %room, session_id = %session, "room left");
        Ok(ServerMessage::RoomLeft(RoomEvent::left(&room)))
    }

    /// Write an arbitrary payload to the occupant of `room_id`
    ///
    /// An occupant connected to another node is reached through that node's
    /// room relay queue.
    pub async fn send_to_room(
        &self,
        room_id: &str,
        message: serde_json::Value,
    ) -> Result<RoomSendResponse> {
        let occupant = self
            .rooms
            .occupant(room_id)
            .await
            .map_err(Error::fail_closed)?
            .ok_or_else(|| Error::RoomEmpty(room_id.to_string()))?;

        let relayed = occupant.node_id != self.node;
        if relayed {
            let relay = RoomRelay::Send {
                room_id: room_id.to_string(),
                session_id: occupant.session_id.clone(),
                message,
            };
            self.queues
                .room_relay_queue(&occupant.node_id)
                .publish(Some(occupant.session_id.as_str()), &relay)
                .await
                .map_err(Error::fail_closed)?;
            debug!(room_id, to = %occupant.node_id, "room message relayed");
        } else {
            self.write_room_message(room_id, &occupant.session_id, message)
                .await?;
        }

        Ok(RoomSendResponse {
            success: true,
            room_id: room_id.to_string(),
            session_id: occupant.session_id,
            node_id: occupant.node_id.to_string(),
            relayed,
        })
    }

    async fn write_room_message(
        &self,
        room_id: &str,
        session: &SessionId,
        message: serde_json::Value,
    ) -> Result<()> {
        let conn = self
            .sessions
            .read()
            .await
            .get(session)
            .filter(|e| e.room.as_deref() == Some(room_id))
            .and_then(|e| e.conn.clone())
            .ok_or_else(|| Error::RoomEmpty(room_id.to_string()))?;
        conn.send(ServerMessage::RoomMessage(RoomMessage {
            room_id: room_id.to_string(),
            message,
        }))
        .await
        .map_err(|_| Error::RoomEmpty(room_id.to_string()))
    }

    /// Force `session` out of its room, wherever it is connected
    pub async fn kick(&self, session: &SessionId) -> Result<KickResponse> {
        let local = self.sessions.read().await.contains_key(session);
        if local {
            let room = self.kick_local(session).await?;
            return Ok(KickResponse {
                success: true,
                session_id: session.clone(),
                room_id: Some(room),
                node_id: self.node.to_string(),
                relayed: false,
            });
        }

        let owner = self
            .registry
            .lookup(session)
            .await
            .map_err(Error::fail_closed)?
            .filter(|owner| owner != &self.node)
            .ok_or_else(|| Error::SessionNotFound(session.to_string()))?;
        self.queues
            .room_relay_queue(&owner)
            .publish(
                Some(session.as_str()),
                &RoomRelay::Kick {
                    session_id: session.clone(),
                },
            )
            .await
            .map_err(Error::fail_closed)?;
        debug!(session_id = %session, to = %owner, "kick relayed");
        Ok(KickResponse {
            success: true,
            session_id: session.clone(),
            room_id: None,
            node_id: owner.to_string(),
            relayed: true,
        })
    }

    async fn kick_local(&self, session: &SessionId) -> Result<String> {
        match self.leave_room(session).await? {
            ServerMessage::RoomLeft(event) => {
                let room = event.room_id.clone();
                self.notify(session, ServerMessage::RoomLeft(event)).await;
                info!(room_id = %room, session_id = %session, "session kicked from room");
                Ok(room)
            }
            _ => Err(Error::NotInRoom(session.to_string())),
        }
    }

    async fn notify(&self, session: &SessionId, msg: ServerMessage) {
        let conn = self
            .sessions
            .read()
            .await
            .get(session)
            .and_then(|e| e.conn.clone());
        if let Some(conn) = conn {
            if conn.send(msg).await.is_err() {
                debug!(session_id = %session, "notification dropped, connection closed");
            }
        }
    }

    /// Apply a room operation relayed from another node
    pub async fn apply_relay(&self, relay: RoomRelay) {
        match relay {
            RoomRelay::Send {
                room_id,
                session_id,
                message,
            } => {
                if let Err(e) = self.write_room_message(&room_id, &session_id, message).await {
                    debug!(room_id = %room_id, session_id = %session_id, error = %e, "relayed room message not written");
                }
            }
            RoomRelay::Kick { session_id } => {
                if let Err(e) = self.kick_local(&session_id).await {
                    debug!(session_id = %session_id, error = %e, "relayed kick not applied");
                }
            }
        }
    }

    /// Consume this node's room relay queue until shutdown
    ///
    /// Room operations are best effort: each is acknowledged once applied,
    /// whether or not the session was still here.
    pub async fn spawn_room_relay(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<JoinHandle<()>> {
        let mut consumer = self.queues.room_relay_queue(&self.node).consumer().await?;
        Ok(tokio::spawn(async move {
            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = shutdown.changed() => break,
                    next = consumer.next() => match next {
                        Ok(Some(Inbound { message, delivery })) => {
                            let settled = match message {
                                Ok(relay) => {
                                    self.apply_relay(relay).await;
                                    delivery.ack().await
                                }
                                Err(e) => {
                                    warn!(error = %e, "rejecting undecodable room relay");
                                    delivery.reject().await
                                }
                            };
                            if let Err(e) = settled {
                                warn!(error = %e, "failed to settle room relay");
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!(error = %e, "room relay consume failed");
                            tokio::time::sleep(RELAY_RETRY_DELAY).await;
                        }
                    },
                }
            }
        }))
    }

    pub async fn room_check(&self, room_id: &str) -> Result<RoomCheckResponse> {
        let occupant = self
            .rooms
            .occupant(room_id)
            .await
            .map_err(Error::fail_closed)?;
        Ok(RoomCheckResponse {
            room_id: room_id.to_string(),
            occupied: occupant.is_some(),
            session_id: occupant.as_ref().map(|o| o.session_id.clone()),
            node_id: occupant.map(|o| o.node_id.to_string()),
        })
    }

    // ------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------

    /// Refresh live sessions in the registry and evict stale local entries
    ///
    /// Returns the number of local entries removed.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let snapshot: Vec<(SessionId, SessionState, Option<Uuid>, Option<String>, Option<Instant>)> =
            self.sessions
                .read()
                .await
                .iter()
                .map(|(id, e)| {
                    (
                        id.clone(),
                        e.state,
                        e.conn.as_ref().map(|c| c.id()),
                        e.room.clone(),
                        e.disconnected_at,
                    )
                })
                .collect();

        let mut evicted = 0;
        for (session, state, conn_id, room, disconnected_at) in snapshot {
            match state {
                SessionState::Active => match self.registry.touch(&session, &self.node).await {
                    Ok(true) => {
                        if let Some(room) = room {
                            if let Err(e) = self.rooms.refresh(&room, &session).await {
                                debug!(room_id = %room, error = %e, "room refresh failed");
                            }
                        }
                    }
                    Ok(false) => {
                        if self.evict(&session, |e| e.conn.as_ref().map(|c| c.id()) == conn_id).await {
                            warn!(session_id = %session, "session no longer owned by this node, closing connection");
                            evicted += 1;
                        }
                    }
                    Err(e) => debug!(session_id = %session, error = %e, "registry touch failed during sweep"),
                },
                SessionState::Disconnected => {
                    let lapsed = disconnected_at
                        .is_some_and(|at| now.duration_since(at) >= self.settings.session_ttl);
                    let owned_here = match self.registry.resolve(&session).await {
                        Ok(Some(record)) => record.node_id == self.node,
                        Ok(None) => false,
                        Err(e) => {
                            debug!(session_id = %session, error = %e, "registry resolve failed during sweep");
                            continue;
                        }
                    };
                    if !lapsed && owned_here {
                        continue;
                    }
                    if !self.evict(&session, |e| e.state == SessionState::Disconnected).await {
                        continue;
                    }
                    if lapsed && owned_here {
                        if let Err(e) = self.registry.expire(&session).await {
                            warn!(session_id = %session, error = %e, "failed to expire session");
                        }
                    }
                    info!(session_id = %session, "session evicted");
                    evicted += 1;
                }
                SessionState::Connecting | SessionState::Expired => {}
            }
        }
        evicted
    }

    async fn evict<F>(&self, session: &SessionId, still: F) -> bool
    where
        F: Fn(&LocalSession) -> bool,
    {
        let removed = {
            let mut sessions = self.sessions.write().await;
            match sessions.get(session) {
                Some(entry) if still(entry) => sessions.remove(session),
                _ => None,
            }
        };
        match removed {
            Some(entry) => {
                if entry.conn.is_some() {
                    self.release_slot();
                }
                true
            }
            None => false,
        }
    }

    /// Periodic [`sweep`](Self::sweep) until shutdown
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        let evicted = self.sweep().await;
                        if evicted > 0 {
                            debug!(evicted, "session sweep");
                        }
                    }
                }
            }
        })
    }

    /// Close every live connection, leaving sessions resumable elsewhere
    pub async fn close_all(&self) {
        let closing: Vec<(SessionId, Uuid)> = self
            .sessions
            .read()
            .await
            .iter()
            .filter_map(|(id, e)| e.conn.as_ref().map(|c| (id.clone(), c.id())))
            .collect();
        let count = closing.len();
        for (session, conn_id) in closing {
            self.disconnect(&session, conn_id).await;
        }
        info!(count, "closed live connections");
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub async fn stats(&self) -> RouterStats {
        let sessions = self.sessions.read().await;
        let disconnected_sessions = sessions
            .values()
            .filter(|e| e.state == SessionState::Disconnected)
            .count();
        let mut rooms: Vec<RoomAssignment> = sessions
            .iter()
            .filter_map(|(id, e)| {
                e.room.as_ref().map(|room| RoomAssignment {
                    room_id: room.clone(),
                    session_id: id.clone(),
                })
            })
            .collect();
        rooms.sort_by(|a, b| a.room_id.cmp(&b.room_id));

        RouterStats {
            node_id: self.node.to_string(),
            local_sessions: sessions.len(),
            live_connections: self.live_connections(),
            disconnected_sessions,
            max_connections: self.settings.max_connections,
            held_results: self.holding.len(),
            rooms,
        }
    }

    pub async fn health(&self) -> HealthResponse {
        let registry_reachable = match self.registry.health_check().await {
            Ok(ok) => ok,
            Err(e) => {
                warn!(error = %e, "registry health check failed");
                false
            }
        };
        let queue_reachable = match self.queues.provider().health_check().await {
            Ok(ok) => ok,
            Err(e) => {
                warn!(error = %e, "queue health check failed");
                false
            }
        };
        let healthy = registry_reachable && queue_reachable;
        HealthResponse {
            status: (if healthy { "ok" } else { "degraded" }).to_string(),
            version: crate::VERSION.to_string(),
            node_id: self.node.to_string(),
            local_sessions: self.sessions.read().await.len(),
            live_connections: self.live_connections(),
            held_results: self.holding.len(),
            registry_reachable,
            queue_reachable,
        }
    }
}

#[async_trait::async_trait]
impl SessionSink for SessionRouter {
    async fn is_live(&self, session: &SessionId) -> bool {
        self.sessions
            .read()
            .await
            .get(session)
            .and_then(|e| e.conn.as_ref())
            .is_some_and(|c| !c.is_closed())
    }

    async fn deliver(&self, result: &TranslationResult) -> DeliveryOutcome {
        let conn = self
            .sessions
            .read()
            .await
            .get(&result.session_id)
            .and_then(|e| e.conn.clone());
        let Some(conn) = conn else {
            return DeliveryOutcome::ConnectionGone;
        };

        match conn
            .send_confirmed(ServerMessage::TranslationResult(result.clone()))
            .await
        {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(_) => DeliveryOutcome::ConnectionGone,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::core::store::RegistryStore;
    use crate::gateway::connection::FrameReceiver;
    use crate::memory::{MemoryQueue, MemoryStore};
    use crate::queue::Queues;

    struct Fixture {
        provider: Arc<MemoryQueue>,
        queues: Queues,
        registry: SessionRegistry,
        router: SessionRouter,
    }

    fn fixture_with(settings: RouterSettings) -> Fixture {
        let provider = Arc::new(MemoryQueue::new());
        let store: Arc<dyn RegistryStore> = Arc::new(MemoryStore::new());
        let queues = Queues::new(provider.clone(), &QueueConfig::default());
        let registry = SessionRegistry::new(store, "t", settings.session_ttl);
        let rooms = RoomDirectory::new(registry.clone(), "t");
        let router = SessionRouter::new(
            NodeId::from("A"),
            registry.clone(),
            rooms,
            queues.clone(),
            Arc::new(HoldingArea::new(100, Duration::from_secs(60))),
            settings,
        );
        Fixture {
            provider,
            queues,
            registry,
            router,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(RouterSettings::default())
    }

    async fn open(
        f: &Fixture,
        resume: Option<SessionId>,
    ) -> (Connected, ConnectionHandle, FrameReceiver) {
        let (conn, mut rx) = ConnectionHandle::channel(16);
        let connected = f.router.connect(conn.clone(), resume).await.unwrap();
        match rx.recv().await.unwrap() {
            ServerMessage::ConnectionEstablished(est) => {
                assert_eq!(est.session_id, connected.session_id);
                assert_eq!(est.resumed, connected.resumed);
            }
            other => panic!("expected connection_established, got {:?}", other),
        }
        (connected, conn, rx)
    }

    fn submission(session: &SessionId) -> JobSubmission {
        JobSubmission {
            text: "hello".into(),
            translator_backend: "yandex".into(),
            target_lang: "ru".into(),
            source_lang: None,
            session_id: session.clone(),
        }
    }

    #[tokio::test]
    async fn test_connect_registers_session() {
        let f = fixture();
        let (connected, _conn, _rx) = open(&f, None).await;
        assert!(!connected.resumed);
        assert_eq!(
            f.registry.lookup(&connected.session_id).await.unwrap(),
            Some(NodeId::from("A"))
        );
        assert_eq!(f.router.live_connections(), 1);
        assert!(f.router.is_live(&connected.session_id).await);
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let f = fixture_with(RouterSettings {
            max_connections: 1,
            ..RouterSettings::default()
        });
        let (_c, _conn, _rx) = open(&f, None).await;

        let (second, _rx2) = ConnectionHandle::channel(4);
        let err = f.router.connect(second, None).await.unwrap_err();
        assert!(matches!(err, Error::Capacity(_)));
        assert_eq!(f.router.live_connections(), 1);
    }

    #[tokio::test]
    async fn test_submit_enqueues_job() {
        let f = fixture();
        let (connected, _conn, _rx) = open(&f, None).await;

        let job_id = f.router.submit(submission(&connected.session_id)).await.unwrap();

        let mut consumer = f.queues.requests.consumer().await.unwrap();
        let inbound = consumer.next().await.unwrap().unwrap();
        let job = inbound.message.as_ref().unwrap();
        assert_eq!(job.id, job_id);
        assert_eq!(job.session_id, connected.session_id);
        assert_eq!(job.retries, 0);
    }

    #[tokio::test]
    async fn test_submit_unknown_session_enqueues_nothing() {
        let f = fixture();
        let err = f
            .router
            .submit(submission(&SessionId::from("S2")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(_)));
        let stats = f.provider.stats(f.queues.requests.name()).await;
        assert_eq!(stats.published, 0);
    }

    #[tokio::test]
    async fn test_submit_validation() {
        let f = fixture_with(RouterSettings {
            max_text_chars: 5,
            ..RouterSettings::default()
        });
        let (connected, _conn, _rx) = open(&f, None).await;

        let mut sub = submission(&connected.session_id);
        sub.translator_backend = "babelfish".into();
        assert!(matches!(f.router.submit(sub).await, Err(Error::Validation(_))));

        let mut sub = submission(&connected.session_id);
        sub.text = "hello world".into();
        assert!(matches!(f.router.submit(sub).await, Err(Error::Validation(_))));

        let mut sub = submission(&connected.session_id);
        sub.target_lang = " ".into();
        assert!(matches!(f.router.submit(sub).await, Err(Error::Validation(_))));

        let mut sub = submission(&connected.session_id);
        sub.translator_backend = "YANDEX".into();
        assert!(f.router.submit(sub).await.is_ok());
    }

    #[tokio::test]
    async fn test_submit_accepts_session_owned_elsewhere() {
        let f = fixture();
        let remote = SessionId::from("remote-session");
        f.registry.register(&remote, &NodeId::from("B")).await.unwrap();
        assert!(f.router.submit(submission(&remote)).await.is_ok());
    }

    #[tokio::test]
    async fn test_deliver_to_live_connection() {
        let f = fixture();
        let (connected, _conn, mut rx) = open(&f, None).await;
        let job = TranslationJob::from_submission(submission(&connected.session_id));
        let result = TranslationResult::success(&job, "привет", None);

        let (outcome, frame) = tokio::join!(f.router.deliver(&result), rx.recv());
        assert_eq!(outcome, DeliveryOutcome::Delivered);
        match frame.unwrap() {
            ServerMessage::TranslationResult(r) => assert_eq!(r.translated_text.as_deref(), Some("привет")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disconnect_keeps_registry_entry() {
        let f = fixture();
        let (connected, conn, _rx) = open(&f, None).await;
        f.router.disconnect(&connected.session_id, conn.id()).await;

        assert_eq!(f.router.live_connections(), 0);
        let record = f.registry.resolve(&connected.session_id).await.unwrap().unwrap();
        assert_eq!(record.state, SessionState::Disconnected);
        assert_eq!(f.registry.lookup(&connected.session_id).await.unwrap(), None);

        let job = TranslationJob::from_submission(submission(&connected.session_id));
        let result = TranslationResult::success(&job, "привет", None);
        assert_eq!(f.router.deliver(&result).await, DeliveryOutcome::ConnectionGone);
    }

    #[tokio::test]
    async fn test_resume_reuses_session_id() {
        let f = fixture();
        let (first, conn, _rx) = open(&f, None).await;
        f.router.disconnect(&first.session_id, conn.id()).await;

        let (second, _conn2, _rx2) = open(&f, Some(first.session_id.clone())).await;
        assert!(second.resumed);
        assert_eq!(second.session_id, first.session_id);
        assert_eq!(
            f.registry.lookup(&first.session_id).await.unwrap(),
            Some(NodeId::from("A"))
        );
    }

    #[tokio::test]
    async fn test_resume_of_unknown_id_issues_new_one() {
        let f = fixture();
        let stale = SessionId::from("long-gone");
        let (connected, _conn, _rx) = open(&f, Some(stale.clone())).await;
        assert!(!connected.resumed);
        assert_ne!(connected.session_id, stale);
        assert!(!f.registry.exists(&stale).await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_disconnect_is_ignored_after_replacement() {
        let f = fixture();
        let (first, old_conn, _rx) = open(&f, None).await;
        let (_second, _new_conn, _rx2) = open(&f, Some(first.session_id.clone())).await;
        assert_eq!(f.router.live_connections(), 1);

        f.router.disconnect(&first.session_id, old_conn.id()).await;
        assert!(f.router.is_live(&first.session_id).await);
        assert_eq!(f.router.live_connections(), 1);
    }

    #[tokio::test]
    async fn test_rooms_join_switch_and_leave() {
        let f = fixture();
        let (a, _ca, _ra) = open(&f, None).await;
        let (b, _cb, _rb) = open(&f, None).await;

        let replies = f.router.join_room(&a.session_id, "r1").await.unwrap();
        assert_eq!(replies, vec![ServerMessage::RoomJoined(RoomEvent::joined("r1"))]);

        let replies = f.router.join_room(&b.session_id, "r1").await.unwrap();
        assert_eq!(replies, vec![ServerMessage::RoomOccupied(RoomEvent::occupied("r1"))]);

        let replies = f.router.join_room(&a.session_id, "r2").await.unwrap();
        assert_eq!(
            replies,
            vec![
                ServerMessage::RoomLeft(RoomEvent::left("r1")),
                ServerMessage::RoomJoined(RoomEvent::joined("r2")),
            ]
        );

        let replies = f.router.join_room(&b.session_id, "r1").await.unwrap();
        assert_eq!(replies, vec![ServerMessage::RoomJoined(RoomEvent::joined("r1"))]);

        assert_eq!(
            f.router.leave_room(&a.session_id).await.unwrap(),
            ServerMessage::RoomLeft(RoomEvent::left("r2"))
        );
        match f.router.leave_room(&a.session_id).await.unwrap() {
            ServerMessage::Error(e) => assert_eq!(e.error_code, error_codes::NOT_IN_ROOM),
            other => panic!("unexpected {:?}", other),
        }

        let check = f.router.room_check("r1").await.unwrap();
        assert!(check.occupied);
        assert_eq!(check.session_id, Some(b.session_id.clone()));
        assert!(!f.router.room_check("r2").await.unwrap().occupied);
    }

    #[tokio::test]
    async fn test_disconnect_releases_room() {
        let f = fixture();
        let (a, conn, _ra) = open(&f, None).await;
        f.router.join_room(&a.session_id, "r1").await.unwrap();
        f.router.disconnect(&a.session_id, conn.id()).await;
        assert!(!f.router.room_check("r1").await.unwrap().occupied);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_after_ttl() {
        let f = fixture_with(RouterSettings {
            session_ttl: Duration::from_secs(10),
            ..RouterSettings::default()
        });
        let (connected, conn, _rx) = open(&f, None).await;
        f.router.disconnect(&connected.session_id, conn.id()).await;

        assert_eq!(f.router.sweep().await, 0);
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(f.router.sweep().await, 1);
        assert!(!f.registry.exists(&connected.session_id).await.unwrap());
        assert_eq!(f.router.stats().await.local_sessions, 0);
    }

    #[tokio::test]
    async fn test_sweep_evicts_session_taken_over_elsewhere() {
        let f = fixture();
        let (connected, _conn, _rx) = open(&f, None).await;
        f.registry
            .claim_existing(&connected.session_id, &NodeId::from("B"))
            .await
            .unwrap();

        assert_eq!(f.router.sweep().await, 1);
        assert!(!f.router.is_live(&connected.session_id).await);
        assert_eq!(f.router.live_connections(), 0);
    }

    #[tokio::test]
    async fn test_stats_and_health() {
        let f = fixture();
        let (a, _ca, _ra) = open(&f, None).await;
        f.router.join_room(&a.session_id, "r1").await.unwrap();

        let stats = f.router.stats().await;
        assert_eq!(stats.local_sessions, 1);
        assert_eq!(stats.live_connections, 1);
        assert_eq!(stats.rooms.len(), 1);
        assert_eq!(stats.rooms[0].room_id, "r1");

        let health = f.router.health().await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.node_id, "A");
        assert!(health.registry_reachable);
        assert!(health.queue_reachable);
    }

    #[tokio::test]
    async fn test_send_to_local_room() {
        let f = fixture();
        let (a, _ca, mut ra) = open(&f, None).await;
        let err = f
            .router
            .send_to_room("r1", serde_json::json!({"text": "hi"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RoomEmpty(_)));

        f.router.join_room(&a.session_id, "r1").await.unwrap();
        let sent = f
            .router
            .send_to_room("r1", serde_json::json!({"text": "hi"}))
            .await
            .unwrap();
        assert!(!sent.relayed);
        assert_eq!(sent.session_id, a.session_id);
        match ra.recv().await.unwrap() {
            ServerMessage::RoomMessage(msg) => {
                assert_eq!(msg.room_id, "r1");
                assert_eq!(msg.message["text"], "hi");
            }
            other => panic!("expected room_message, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_kick_local_session() {
        let f = fixture();
        let (a, _ca, mut ra) = open(&f, None).await;
        f.router.join_room(&a.session_id, "r1").await.unwrap();

        let kicked = f.router.kick(&a.session_id).await.unwrap();
        assert_eq!(kicked.room_id.as_deref(), Some("r1"));
        assert!(!kicked.relayed);
        assert_eq!(
            ra.recv().await.unwrap(),
            ServerMessage::RoomLeft(RoomEvent::left("r1"))
        );
        assert!(!f.router.room_check("r1").await.unwrap().occupied);

        let err = f.router.kick(&a.session_id).await.unwrap_err();
        assert!(matches!(err, Error::NotInRoom(_)));
        let err = f.router.kick(&SessionId::from("nobody")).await.unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_kick_of_remote_session_is_relayed() {
        let f = fixture();
        let session = SessionId::from("S-remote");
        let b = NodeId::from("B");
        f.registry.register(&session, &b).await.unwrap();

        let kicked = f.router.kick(&session).await.unwrap();
        assert!(kicked.relayed);
        assert_eq!(kicked.node_id, "B");

        let mut consumer = f.queues.room_relay_queue(&b).consumer().await.unwrap();
        let inbound = consumer.next().await.unwrap().unwrap();
        match inbound.message.as_ref().unwrap() {
            RoomRelay::Kick { session_id } => assert_eq!(session_id, &session),
            other => panic!("expected kick, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_relayed_room_message_is_written() {
        let f = fixture();
        let (a, _ca, mut ra) = open(&f, None).await;
        f.router.join_room(&a.session_id, "r1").await.unwrap();

        f.router
            .apply_relay(RoomRelay::Send {
                room_id: "r1".into(),
                session_id: a.session_id.clone(),
                message: serde_json::json!("hello"),
            })
            .await;
        assert!(matches!(ra.recv().await.unwrap(), ServerMessage::RoomMessage(_)));

        // Stale relay for a room the session has left is dropped
        f.router.leave_room(&a.session_id).await.unwrap();
        f.router
            .apply_relay(RoomRelay::Send {
                room_id: "r1".into(),
                session_id: a.session_id.clone(),
                message: serde_json::json!("late"),
            })
            .await;
        assert!(tokio::time::timeout(Duration::from_millis(50), ra.recv())
            .await
            .is_err());
    }
}
