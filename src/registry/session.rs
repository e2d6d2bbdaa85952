//! Session → owning node mapping

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::store::RegistryStore;
use crate::core::{NodeId, SessionId, SessionState};
use crate::error::{Error, Result};

/// Attempts at a read-modify-write before giving up on a contended key
const MAX_CAS_ATTEMPTS: usize = 3;

/// Registry entry for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub node_id: NodeId,
    /// Distinguishes this incarnation from any earlier entry with the same id
    pub epoch: Uuid,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl SessionRecord {
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }
}

/// How a successful `register` changed ownership
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// New entry
    Created,
    /// Same node reclaimed its own session (reconnect)
    Resumed,
    /// Ownership moved from another node (failover or reconnect elsewhere)
    TakenOver { previous: NodeId },
}

/// Shared session → node registry with TTL and CAS claims
#[derive(Clone)]
pub struct SessionRegistry {
    store: Arc<dyn RegistryStore>,
    prefix: String,
    ttl: Duration,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn RegistryStore>, prefix: impl Into<String>, ttl: Duration) -> Self {
        SessionRegistry {
            store,
            prefix: prefix.into(),
            ttl,
        }
    }

    /// Inactivity TTL applied on every write
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn store(&self) -> &Arc<dyn RegistryStore> {
        &self.store
    }

    fn key(&self, session: &SessionId) -> String {
        format!("{}:session:{}", self.prefix, session)
    }

    async fn read(&self, session: &SessionId) -> Result<Option<(SessionRecord, u64)>> {
        let Some(entry) = self.store.get(&self.key(session)).await? else {
            return Ok(None);
        };
        let record: SessionRecord = serde_json::from_str(&entry.value).map_err(|e| {
            Error::Registry(format!("corrupt session record for {}: {}", session, e))
        })?;
        Ok(Some((record, entry.version)))
    }

    async fn write(
        &self,
        record: &SessionRecord,
        expected: Option<u64>,
    ) -> Result<Option<u64>> {
        let value = serde_json::to_string(record)?;
        self.store
            .compare_and_set(&self.key(&record.session_id), expected, &value, self.ttl)
            .await
    }

    /// Claim `session` for `node`, creating the entry if it does not exist
    ///
    /// An active entry owned by another node is never taken; that and losing
    /// a concurrent claim both yield `SessionConflict` naming the owner.
    /// Disconnected entries may be taken over.
    pub async fn register(&self, session: &SessionId, node: &NodeId) -> Result<Registration> {
        let current = self.read(session).await?;
        if let Some((record, _)) = &current {
            if record.is_active() && &record.node_id != node {
                warn!(session_id = %session, node_id = %node, owner = %record.node_id, "session owned elsewhere");
                return Err(Error::SessionConflict {
                    session: session.to_string(),
                    owner: record.node_id.to_string(),
                });
            }
        }
        self.claim(session, node, current).await
    }

    /// Claim a session only if its entry is still live
    ///
    /// Returns `Ok(None)` for unknown or expired ids; such ids are retired and
    /// the caller must issue a fresh one.
    pub async fn claim_existing(
        &self,
        session: &SessionId,
        node: &NodeId,
    ) -> Result<Option<Registration>> {
        match self.read(session).await? {
            Some(current) => self.claim(session, node, Some(current)).await.map(Some),
            None => Ok(None),
        }
    }

    async fn claim(
        &self,
        session: &SessionId,
        node: &NodeId,
        current: Option<(SessionRecord, u64)>,
    ) -> Result<Registration> {
        let now = Utc::now();

        let (record, expected, registration) = match current {
            None => (
                SessionRecord {
                    session_id: session.clone(),
                    node_id: node.clone(),
                    epoch: Uuid::new_v4(),
                    state: SessionState::Active,
                    created_at: now,
                    last_activity: now,
                },
                None,
                Registration::Created,
            ),
            Some((previous, version)) => {
                let registration = if &previous.node_id == node {
                    Registration::Resumed
                } else {
                    Registration::TakenOver {
                        previous: previous.node_id.clone(),
                    }
                };
                (
                    SessionRecord {
                        node_id: node.clone(),
                        state: SessionState::Active,
                        last_activity: now,
                        ..previous
                    },
                    Some(version),
                    registration,
                )
            }
        };

        if self.write(&record, expected).await?.is_some() {
            debug!(session_id = %session, node_id = %node, ?registration, "session registered");
            return Ok(registration);
        }

        // Lost the race: report whoever holds it now
        let owner = self
            .read(session)
            .await?
            .map(|(r, _)| r.node_id.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        warn!(session_id = %session, node_id = %node, owner = %owner, "lost session claim");
        Err(Error::SessionConflict {
            session: session.to_string(),
            owner,
        })
    }

    /// Owning node of an active session; a miss means "no live owner"
    pub async fn lookup(&self, session: &SessionId) -> Result<Option<NodeId>> {
        Ok(self
            .read(session)
            .await?
            .filter(|(record, _)| record.is_active())
            .map(|(record, _)| record.node_id))
    }

    /// Full record, including disconnected sessions still within their TTL
    pub async fn resolve(&self, session: &SessionId) -> Result<Option<SessionRecord>> {
        Ok(self.read(session).await?.map(|(record, _)| record))
    }

    /// Whether the id is known to the fleet (in any non-expired state)
    pub async fn exists(&self, session: &SessionId) -> Result<bool> {
        Ok(self.store.get(&self.key(session)).await?.is_some())
    }

    /// Refresh activity time and TTL; only the owning node may touch
    pub async fn touch(&self, session: &SessionId, node: &NodeId) -> Result<bool> {
        self.update_owned(session, node, |record, now| {
            record.last_activity = now;
        })
        .await
    }

    /// Record a disconnect without evicting, leaving a reconnect grace period
    pub async fn mark_disconnected(&self, session: &SessionId, node: &NodeId) -> Result<bool> {
        self.update_owned(session, node, |record, _| {
            record.state = SessionState::Disconnected;
        })
        .await
    }

    async fn update_owned<F>(&self, session: &SessionId, node: &NodeId, apply: F) -> Result<bool>
    where
        F: Fn(&mut SessionRecord, DateTime<Utc>),
    {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let Some((mut record, version)) = self.read(session).await? else {
                return Ok(false);
            };
            if &record.node_id != node {
                return Ok(false);
            }
            apply(&mut record, Utc::now());
            if self.write(&record, Some(version)).await?.is_some() {
                return Ok(true);
            }
        }
        warn!(session_id = %session, node_id = %node, "session update contended, giving up");
        Ok(false)
    }

    /// Evict the entry; the id is retired
    pub async fn expire(&self, session: &SessionId) -> Result<bool> {
        let removed = self.store.expire(&self.key(session)).await?;
        if removed {
            debug!(session_id = %session, "session expired");
        }
        Ok(removed)
    }

    pub async fn health_check(&self) -> Result<bool> {
        self.store.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Arc::new(MemoryStore::new()), "test", Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = registry();
        let s = SessionId::from("S1");
        let a = NodeId::from("A");

        assert_eq!(registry.register(&s, &a).await.unwrap(), Registration::Created);
        assert_eq!(registry.lookup(&s).await.unwrap(), Some(a.clone()));
        assert_eq!(registry.register(&s, &a).await.unwrap(), Registration::Resumed);
        assert_eq!(registry.lookup(&SessionId::from("nope")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_takeover_keeps_epoch() {
        let registry = registry();
        let s = SessionId::from("S1");
        registry.register(&s, &NodeId::from("A")).await.unwrap();
        let before = registry.resolve(&s).await.unwrap().unwrap();

        let outcome = registry
            .claim_existing(&s, &NodeId::from("B"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            outcome,
            Registration::TakenOver {
                previous: NodeId::from("A")
            }
        );
        let after = registry.resolve(&s).await.unwrap().unwrap();
        assert_eq!(after.node_id, NodeId::from("B"));
        assert_eq!(after.epoch, before.epoch);
    }

    #[tokio::test]
    async fn test_concurrent_register_has_one_winner() {
        let registry = registry();
        let s = SessionId::from("S1");
        let a = NodeId::from("A");
        let b = NodeId::from("B");

        let (ra, rb) = tokio::join!(registry.register(&s, &a), registry.register(&s, &b));

        let winners = [&ra, &rb].iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        let owner = registry.lookup(&s).await.unwrap().unwrap();
        for (outcome, node) in [(ra, &a), (rb, &b)] {
            match outcome {
                Ok(registration) => {
                    assert_eq!(registration, Registration::Created);
                    assert_eq!(&owner, node);
                }
                Err(Error::SessionConflict { owner: winner, .. }) => {
                    assert_ne!(&winner, &node.to_string());
                    assert_eq!(winner, owner.to_string());
                }
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
    }

    #[tokio::test]
    async fn test_register_refuses_active_session_of_other_node() {
        let registry = registry();
        let s = SessionId::from("S1");
        let a = NodeId::from("A");
        let b = NodeId::from("B");
        registry.register(&s, &a).await.unwrap();

        match registry.register(&s, &b).await {
            Err(Error::SessionConflict { owner, .. }) => assert_eq!(owner, "A"),
            other => panic!("expected conflict, got {other:?}"),
        }
        assert_eq!(registry.lookup(&s).await.unwrap(), Some(a.clone()));

        // A disconnected entry can be taken over
        registry.mark_disconnected(&s, &a).await.unwrap();
        assert_eq!(
            registry.register(&s, &b).await.unwrap(),
            Registration::TakenOver { previous: a }
        );
        assert_eq!(registry.lookup(&s).await.unwrap(), Some(b));
    }

    #[tokio::test]
    async fn test_racing_claims_from_same_snapshot() {
        let registry = registry();
        let s = SessionId::from("S1");

        // Both nodes observed "absent" before either wrote
        let a = registry.claim(&s, &NodeId::from("A"), None).await;
        let b = registry.claim(&s, &NodeId::from("B"), None).await;

        assert_eq!(a.unwrap(), Registration::Created);
        match b {
            Err(Error::SessionConflict { owner, .. }) => assert_eq!(owner, "A"),
            other => panic!("expected conflict, got {other:?}"),
        }
        assert_eq!(registry.lookup(&s).await.unwrap(), Some(NodeId::from("A")));
    }

    #[tokio::test]
    async fn test_disconnect_hides_from_lookup_but_resolves() {
        let registry = registry();
        let s = SessionId::from("S1");
        let a = NodeId::from("A");
        registry.register(&s, &a).await.unwrap();

        assert!(registry.mark_disconnected(&s, &a).await.unwrap());
        assert_eq!(registry.lookup(&s).await.unwrap(), None);
        let record = registry.resolve(&s).await.unwrap().unwrap();
        assert_eq!(record.state, SessionState::Disconnected);

        // Reconnect on the same node revives it
        assert_eq!(
            registry.claim_existing(&s, &a).await.unwrap(),
            Some(Registration::Resumed)
        );
        assert_eq!(registry.lookup(&s).await.unwrap(), Some(a));
    }

    #[tokio::test]
    async fn test_touch_only_by_owner() {
        let registry = registry();
        let s = SessionId::from("S1");
        registry.register(&s, &NodeId::from("A")).await.unwrap();

        assert!(registry.touch(&s, &NodeId::from("A")).await.unwrap());
        assert!(!registry.touch(&s, &NodeId::from("B")).await.unwrap());
        assert!(!registry.touch(&SessionId::from("S9"), &NodeId::from("A")).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_id_is_never_revived() {
        let registry = registry();
        let s = SessionId::from("S1");
        let a = NodeId::from("A");
        registry.register(&s, &a).await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;

        assert_eq!(registry.lookup(&s).await.unwrap(), None);
        assert_eq!(registry.claim_existing(&s, &a).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reregistered_id_gets_new_epoch() {
        let registry = registry();
        let s = SessionId::from("S1");
        let a = NodeId::from("A");
        registry.register(&s, &a).await.unwrap();
        let first = registry.resolve(&s).await.unwrap().unwrap().epoch;

        registry.expire(&s).await.unwrap();
        assert_eq!(registry.register(&s, &a).await.unwrap(), Registration::Created);
        let second = registry.resolve(&s).await.unwrap().unwrap().epoch;
        assert_ne!(first, second);
    }
}
