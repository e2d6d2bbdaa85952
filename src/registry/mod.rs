//! Session registry - fleet-wide session ownership
//!
//! The registry is the single source of truth for which node owns a session
//! and which session holds a room. Gateway-local connection tables are caches
//! reconciled against it. All ownership changes go through compare-and-set
//! on the shared store, so concurrent claims resolve to exactly one winner.

mod rooms;
mod session;

pub use rooms::{RoomClaim, RoomDirectory, RoomOccupant};
pub use session::{Registration, SessionRecord, SessionRegistry};
