//! Core module - Fundamental traits and types for Translink
//!
//! This module defines the domain records and the collaborator seams:
//! - Queue traits for the durable work queue
//! - Registry store trait for the shared session store
//! - Translator trait for translation backends
//! - Session sink trait for local delivery to live connections
//!
//! In-process and PostgreSQL implementations of the collaborators live in
//! `memory` and `database`.

pub mod delivery;
pub mod queue;
pub mod store;
pub mod translator;
pub mod types;

pub use delivery::{DeliveryOutcome, SessionSink};
pub use queue::{Acker, Consumer, Delivery, OutboundMessage, QueueProvider};
pub use store::{RegistryStore, Versioned};
pub use translator::{BackendError, Translation, TranslationRequest, Translator};
pub use types::*;
