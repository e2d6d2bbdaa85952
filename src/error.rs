//! Error types for Translink

use thiserror::Error;

use crate::core::ErrorKind;

/// Result type alias using Translink's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Translink
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed job or request
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown or expired session
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Lost a concurrent claim on a session
    #[error("Session {session} is owned by node {owner}")]
    SessionConflict { session: String, owner: String },

    /// Room already held by another session
    #[error("Room occupied: {0}")]
    RoomOccupied(String),

    /// No session holds the room
    #[error("Room empty: {0}")]
    RoomEmpty(String),

    /// Session holds no room
    #[error("Not in a room: {0}")]
    NotInRoom(String),

    /// Translator backend failure
    #[error("Backend error ({kind}): {detail}")]
    Backend { kind: ErrorKind, detail: String },

    /// Queue provider failure
    #[error("Queue error: {0}")]
    Queue(String),

    /// Registry store failure
    #[error("Registry error: {0}")]
    Registry(String),

    /// Infrastructure unavailable, new work is rejected
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Connection limit reached
    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(_)
            | Error::Database(_)
            | Error::Queue(_)
            | Error::Registry(_)
            | Error::Unavailable(_)
            | Error::Timeout(_) => true,
            Error::Backend { kind, .. } => *kind == ErrorKind::BackendTransient,
            _ => false,
        }
    }

    /// Check if error is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::Validation(_)
                | Error::SessionNotFound(_)
                | Error::RoomOccupied(_)
                | Error::RoomEmpty(_)
                | Error::NotInRoom(_)
                | Error::Capacity(_)
        )
    }

    /// Check if error comes from the queue, registry or database layer
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Error::Database(_) | Error::Queue(_) | Error::Registry(_) | Error::Unavailable(_)
        )
    }

    /// Map onto the broker's business error taxonomy
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::Validation(_) => Some(ErrorKind::ValidationError),
            Error::SessionNotFound(_) => Some(ErrorKind::SessionNotFound),
            Error::Backend { kind, .. } => Some(*kind),
            Error::Timeout(_) => Some(ErrorKind::BackendTransient),
            _ => None,
        }
    }

    /// Stable error code sent to clients
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Error::SessionConflict { .. } => "SESSION_CONFLICT",
            Error::RoomOccupied(_) => "ROOM_OCCUPIED",
            Error::RoomEmpty(_) => "ROOM_EMPTY",
            Error::NotInRoom(_) => "NOT_IN_ROOM",
            Error::Backend { kind, .. } => kind.code(),
            Error::Capacity(_) => "CONNECTION_LIMIT",
            Error::Timeout(_) => "TIMEOUT",
            Error::Database(_) | Error::Queue(_) | Error::Registry(_) | Error::Unavailable(_) => {
                "UNAVAILABLE"
            }
            _ => "INTERNAL_ERROR",
        }
    }

    /// Fold infrastructure failures into `Unavailable` so callers fail closed
    pub fn fail_closed(self) -> Self {
        if self.is_infrastructure() {
            Error::Unavailable(self.to_string())
        } else {
            self
        }
    }
}
