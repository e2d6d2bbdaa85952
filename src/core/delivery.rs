//! Delivery seam between the result handlers and the gateway
//!
//! The Result Handler Pool pushes results into whatever owns live
//! connections in this process through [`SessionSink`]. The gateway's
//! session router is the production implementation.

use async_trait::async_trait;

use crate::core::types::{SessionId, TranslationResult};

/// Outcome of a local send attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Payload was written to the live connection
    Delivered,
    /// No live connection for this session in this process (closed, never
    /// held, or closed between registry lookup and write)
    ConnectionGone,
}

/// Local send path for results
#[async_trait]
pub trait SessionSink: Send + Sync {
    /// Whether this process currently holds a live connection for `session`
    async fn is_live(&self, session: &SessionId) -> bool;

    /// Write a result down the session's live connection
    async fn deliver(&self, result: &TranslationResult) -> DeliveryOutcome;
}
