//! Gateway protocol - JSON frames over the live connection
//!
//! ## Message Types
//!
//! Server → client:
//! - `connection_established`: session id (fresh or resumed) and held room
//! - `room_joined` / `room_left` / `room_occupied`: room membership changes
//! - `room_message`: payload posted to the session's room over HTTP
//! - `job_accepted`: a `translate` frame was queued
//! - `translation_result`: a finished job, success or failure descriptor
//! - `error`: stable error code plus human-readable message
//! - `pong`
//!
//! Client → server: `join_room`, `leave_room`, `translate`, `ping`.

pub mod schema;
pub mod types;

pub use schema::{
    error_codes, parse_client_message, protocol_version, ClientMessage, ServerMessage,
    PROTOCOL_VERSION,
};
pub use types::*;
