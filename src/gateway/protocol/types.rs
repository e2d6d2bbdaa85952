//! Protocol payload types

use serde::{Deserialize, Serialize};

use crate::core::{JobId, JobSubmission, SessionId};
use crate::error::Error;

// ============================================================================
// Server → client payloads
// ============================================================================

/// Sent once per connection, before anything else
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionEstablished {
    pub session_id: SessionId,
    /// Room still held by a resumed session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    /// Whether an existing session id was reclaimed
    pub resumed: bool,
    pub node_id: String,
}

/// Body of `room_joined`, `room_left` and `room_occupied`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomEvent {
    pub room_id: String,
    pub message: String,
}

impl RoomEvent {
    pub fn joined(room_id: &str) -> Self {
        RoomEvent {
            room_id: room_id.to_string(),
            message: format!("Joined room {}", room_id),
        }
    }

    pub fn left(room_id: &str) -> Self {
        RoomEvent {
            room_id: room_id.to_string(),
            message: format!("Left room {}", room_id),
        }
    }

    pub fn occupied(room_id: &str) -> Self {
        RoomEvent {
            room_id: room_id.to_string(),
            message: format!("Room {} is occupied by another session", room_id),
        }
    }
}

/// Body of `room_message`: an arbitrary JSON payload sent to a room's occupant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMessage {
    pub room_id: String,
    pub message: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobAccepted {
    pub job_id: JobId,
}

/// Body of `error` frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    pub error_code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorMessage {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        ErrorMessage {
            error_code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<&Error> for ErrorMessage {
    fn from(err: &Error) -> Self {
        // Store and queue internals stay in the logs
        let message = match err {
            Error::Database(_) | Error::Queue(_) | Error::Registry(_) | Error::Unavailable(_) => {
                "Service temporarily unavailable".to_string()
            }
            Error::Internal(_) | Error::Io(_) | Error::Json(_) | Error::Http(_) => {
                "Internal error".to_string()
            }
            other => other.to_string(),
        };
        ErrorMessage::new(err.code(), message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pong {
    /// Server time, milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl Pong {
    pub fn now() -> Self {
        Pong {
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

// ============================================================================
// Client → server payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomRequest {
    #[serde(alias = "room_id")]
    pub room_id: String,
}

/// Submission over the live connection; the session is the connection's own
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslateRequest {
    pub text: String,
    #[serde(alias = "translator_code", alias = "translator_backend")]
    pub translator_backend: String,
    #[serde(alias = "target_lang")]
    pub target_lang: String,
    #[serde(default, alias = "source_lang")]
    pub source_lang: Option<String>,
}

impl TranslateRequest {
    pub fn into_submission(self, session: SessionId) -> JobSubmission {
        JobSubmission {
            text: self.text,
            translator_backend: self.translator_backend,
            target_lang: self.target_lang,
            source_lang: self.source_lang,
            session_id: session,
        }
    }
}

// ============================================================================
// HTTP bodies
// ============================================================================

/// 202 body for `POST /api/v1/translate`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub status: String,
    pub job_id: JobId,
}

impl SubmitResponse {
    pub fn accepted(job_id: JobId) -> Self {
        SubmitResponse {
            status: "accepted".to_string(),
            job_id,
        }
    }
}

/// Error body for HTTP endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub status: String,
    #[serde(flatten)]
    pub error: ErrorMessage,
}

impl From<ErrorMessage> for ErrorResponse {
    fn from(error: ErrorMessage) -> Self {
        ErrorResponse {
            status: "error".to_string(),
            error,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `ok` or `degraded`
    pub status: String,
    pub version: String,
    pub node_id: String,
    pub local_sessions: usize,
    pub live_connections: usize,
    pub held_results: usize,
    pub registry_reachable: bool,
    pub queue_reachable: bool,
}

/// Body of `GET /health/live`; answered whenever the process is serving
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LivenessResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl LivenessResponse {
    pub fn alive() -> Self {
        LivenessResponse {
            status: "alive".to_string(),
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Body of `POST /rooms/send/{room_id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSendResponse {
    pub success: bool,
    pub room_id: String,
    pub session_id: SessionId,
    /// Node holding the occupant's connection
    pub node_id: String,
    /// Handed to another node rather than written here
    pub relayed: bool,
}

/// Body of `DELETE /rooms/kick/{session_id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KickResponse {
    pub success: bool,
    pub session_id: SessionId,
    /// Room left, when the session was on this node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    pub node_id: String,
    pub relayed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomCheckResponse {
    pub room_id: String,
    pub occupied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infrastructure_errors_are_masked() {
        let msg = ErrorMessage::from(&Error::Registry("connection refused to 10.0.0.4".into()));
        assert_eq!(msg.error_code, "UNAVAILABLE");
        assert!(!msg.message.contains("10.0.0.4"));

        let msg = ErrorMessage::from(&Error::SessionNotFound("S2".into()));
        assert_eq!(msg.error_code, "SESSION_NOT_FOUND");
        assert!(msg.message.contains("S2"));
    }

    #[test]
    fn test_translate_request_aliases() {
        let req: TranslateRequest = serde_json::from_str(
            r#"{"text":"hi","translator_code":"ardrey","target_lang":"de","source_lang":"en"}"#,
        )
        .unwrap();
        let sub = req.into_submission(SessionId::from("S1"));
        assert_eq!(sub.translator_backend, "ardrey");
        assert_eq!(sub.source_lang.as_deref(), Some("en"));
        assert_eq!(sub.session_id.as_str(), "S1");
    }

    #[test]
    fn test_error_response_is_flat() {
        let body = ErrorResponse::from(ErrorMessage::new("VALIDATION_ERROR", "text must not be empty"));
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["errorCode"], "VALIDATION_ERROR");
    }
}
