//! Room → session mapping
//!
//! A room holds at most one session fleet-wide. Occupancy lives in the shared
//! store; a room whose owning session has expired can be reclaimed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use super::SessionRegistry;
use crate::core::store::RegistryStore;
use crate::core::{NodeId, SessionId};
use crate::error::Result;

/// Current occupant of a room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomOccupant {
    pub session_id: SessionId,
    pub node_id: NodeId,
    pub joined_at: DateTime<Utc>,
}

/// Outcome of a join attempt
#[derive(Debug, Clone, PartialEq)]
pub enum RoomClaim {
    Joined,
    /// The session already holds the room
    AlreadyHeld,
    Occupied { by: SessionId },
}

/// Fleet-wide room occupancy
#[derive(Clone)]
pub struct RoomDirectory {
    store: Arc<dyn RegistryStore>,
    sessions: SessionRegistry,
    prefix: String,
}

impl RoomDirectory {
    pub fn new(sessions: SessionRegistry, prefix: impl Into<String>) -> Self {
        RoomDirectory {
            store: sessions.store().clone(),
            sessions,
            prefix: prefix.into(),
        }
    }

    fn key(&self, room: &str) -> String {
        format!("{}:room:{}", self.prefix, room)
    }

    async fn read(&self, room: &str) -> Result<Option<(RoomOccupant, u64)>> {
        let Some(entry) = self.store.get(&self.key(room)).await? else {
            return Ok(None);
        };
        // An undecodable entry is treated as vacant and overwritten
        Ok(serde_json::from_str(&entry.value)
            .ok()
            .map(|occupant| (occupant, entry.version)))
    }

    /// Current occupant, if any
    pub async fn occupant(&self, room: &str) -> Result<Option<RoomOccupant>> {
        Ok(self.read(room).await?.map(|(o, _)| o))
    }

    /// Try to claim `room` for `session`
    pub async fn claim(&self, room: &str, session: &SessionId, node: &NodeId) -> Result<RoomClaim> {
        let key = self.key(room);
        let raw = self.store.get(&key).await?;

        let expected = match raw {
            None => None,
            Some(entry) => match serde_json::from_str::<RoomOccupant>(&entry.value) {
                Ok(current) if &current.session_id == session => return Ok(RoomClaim::AlreadyHeld),
                Ok(current) => {
                    if self.sessions.exists(&current.session_id).await? {
                        return Ok(RoomClaim::Occupied {
                            by: current.session_id,
                        });
                    }
                    info!(room_id = room, stale = %current.session_id, "reclaiming room from expired session");
                    Some(entry.version)
                }
                Err(_) => Some(entry.version),
            },
        };

        let occupant = RoomOccupant {
            session_id: session.clone(),
            node_id: node.clone(),
            joined_at: Utc::now(),
        };
        let value = serde_json::to_string(&occupant)?;

        match self
            .store
            .compare_and_set(&key, expected, &value, self.sessions.ttl())
            .await?
        {
            Some(_) => {
                debug!(room_id = room, session_id = %session, "room joined");
                Ok(RoomClaim::Joined)
            }
            None => {
                let by = self
                    .occupant(room)
                    .await?
                    .map(|o| o.session_id)
                    .unwrap_or_else(|| SessionId::from(""));
                Ok(RoomClaim::Occupied { by })
            }
        }
    }

    /// Extend the room's TTL while its session is alive
    pub async fn refresh(&self, room: &str, session: &SessionId) -> Result<bool> {
        let Some((occupant, version)) = self.read(room).await? else {
            return Ok(false);
        };
        if &occupant.session_id != session {
            return Ok(false);
        }
        let value = serde_json::to_string(&occupant)?;
        Ok(self
            .store
            .compare_and_set(&self.key(room), Some(version), &value, self.sessions.ttl())
            .await?
            .is_some())
    }

    /// Release `room` if `session` holds it
    pub async fn release(&self, room: &str, session: &SessionId) -> Result<bool> {
        match self.read(room).await? {
            Some((occupant, _)) if &occupant.session_id == session => {
                let removed = self.store.expire(&self.key(room)).await?;
                debug!(room_id = room, session_id = %session, "room released");
                Ok(removed)
            }
            _ => Ok(false),
        }
    }
}
