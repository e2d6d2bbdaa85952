//! Gateway module - live connections and job ingress
//!
//! ## Architecture
//!
//! ```text
//!   client ──ws──▶ server ──▶ SessionRouter ──▶ request queue
//!                    ▲             │
//!                    │             ├─▶ SessionRegistry / RoomDirectory
//!                    │             │
//!   result handlers ─┴─ SessionSink┘
//! ```
//!
//! The router is the only owner of live connections in a process; result
//! handlers reach them through the [`SessionSink`](crate::core::SessionSink)
//! implementation.

pub mod connection;
pub mod protocol;
pub mod router;
pub mod server;

pub use connection::{ConnectionClosed, ConnectionHandle, Frame, FrameReceiver};
pub use protocol::{
    error_codes, parse_client_message, ClientMessage, ServerMessage, PROTOCOL_VERSION,
};
pub use router::{Connected, RouterSettings, RouterStats, SessionRouter};
pub use server::{app, serve, AppState};
