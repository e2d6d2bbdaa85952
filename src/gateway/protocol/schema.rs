//! Live connection wire schema
//!
//! Every frame is a JSON object discriminated by a `type` field.

use serde::{Deserialize, Serialize};

use super::types::{
    ConnectionEstablished, ErrorMessage, JobAccepted, JoinRoomRequest, Pong, RoomEvent,
    RoomMessage, TranslateRequest,
};
use crate::core::TranslationResult;

/// Protocol version
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Get the protocol version
pub fn protocol_version() -> &'static str {
    PROTOCOL_VERSION
}

/// Frames pushed from the gateway to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ConnectionEstablished(ConnectionEstablished),
    RoomJoined(RoomEvent),
    RoomLeft(RoomEvent),
    RoomOccupied(RoomEvent),
    RoomMessage(RoomMessage),
    TranslationResult(TranslationResult),
    JobAccepted(JobAccepted),
    Error(ErrorMessage),
    Pong(Pong),
}

impl ServerMessage {
    /// Discriminator as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::ConnectionEstablished(_) => "connection_established",
            ServerMessage::RoomJoined(_) => "room_joined",
            ServerMessage::RoomLeft(_) => "room_left",
            ServerMessage::RoomOccupied(_) => "room_occupied",
            ServerMessage::RoomMessage(_) => "room_message",
            ServerMessage::TranslationResult(_) => "translation_result",
            ServerMessage::JobAccepted(_) => "job_accepted",
            ServerMessage::Error(_) => "error",
            ServerMessage::Pong(_) => "pong",
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMessage::Error(ErrorMessage::new(code, message))
    }

    /// Serialize for the socket
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl From<&crate::error::Error> for ServerMessage {
    fn from(err: &crate::error::Error) -> Self {
        ServerMessage::Error(ErrorMessage::from(err))
    }
}

/// Frames sent by a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    JoinRoom(JoinRoomRequest),
    LeaveRoom,
    Translate(TranslateRequest),
    Ping,
}

const CLIENT_MESSAGE_TYPES: &[&str] = &["join_room", "leave_room", "translate", "ping"];

/// Decode an inbound text frame
///
/// Distinguishes frames with an unrecognised `type` from frames that are
/// not valid JSON objects or are missing required fields.
pub fn parse_client_message(text: &str) -> Result<ClientMessage, ErrorMessage> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(|e| {
        ErrorMessage::new(
            error_codes::INVALID_MESSAGE_FORMAT,
            format!("Invalid JSON: {}", e),
        )
    })?;

    let Some(kind) = value.get("type").and_then(|t| t.as_str()) else {
        return Err(ErrorMessage::new(
            error_codes::INVALID_MESSAGE_FORMAT,
            "Message must be an object with a string 'type' field",
        ));
    };

    if !CLIENT_MESSAGE_TYPES.contains(&kind) {
        return Err(ErrorMessage::new(
            error_codes::UNKNOWN_MESSAGE_TYPE,
            format!("Unknown message type: {}", kind),
        )
        .with_details(serde_json::json!({ "supported": CLIENT_MESSAGE_TYPES })));
    }

    let kind = kind.to_string();
    serde_json::from_value(value).map_err(|e| {
        ErrorMessage::new(
            error_codes::INVALID_MESSAGE_FORMAT,
            format!("Invalid '{}' message: {}", kind, e),
        )
    })
}

/// Error codes carried in `error` frames and HTTP error bodies
pub mod error_codes {
    pub const UNKNOWN_MESSAGE_TYPE: &str = "UNKNOWN_MESSAGE_TYPE";
    pub const INVALID_MESSAGE_FORMAT: &str = "INVALID_MESSAGE_FORMAT";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const SESSION_NOT_FOUND: &str = "SESSION_NOT_FOUND";
    pub const NOT_IN_ROOM: &str = "NOT_IN_ROOM";
    pub const ROOM_EMPTY: &str = "ROOM_EMPTY";
    pub const CONNECTION_LIMIT: &str = "CONNECTION_LIMIT";
    pub const UNAVAILABLE: &str = "UNAVAILABLE";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{JobId, SessionId};

    #[test]
    fn test_server_message_tags() {
        let msg = ServerMessage::ConnectionEstablished(ConnectionEstablished {
            session_id: SessionId::from("S1"),
            room_id: None,
            resumed: false,
            node_id: "gw-a".into(),
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "connection_established");
        assert_eq!(value["sessionId"], "S1");
        assert!(value.get("roomId").is_none());
        assert_eq!(msg.kind(), "connection_established");

        let accepted = ServerMessage::JobAccepted(JobAccepted { job_id: JobId::new() });
        let value = serde_json::to_value(&accepted).unwrap();
        assert_eq!(value["type"], "job_accepted");
        assert!(value["jobId"].is_string());
    }

    #[test]
    fn test_error_frame_shape() {
        let msg = ServerMessage::error(error_codes::NOT_IN_ROOM, "not in a room");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["errorCode"], "NOT_IN_ROOM");
        assert_eq!(value["message"], "not in a room");
        assert!(value.get("details").is_none());
    }

    #[test]
    fn test_parse_known_messages() {
        let msg = parse_client_message(r#"{"type":"join_room","roomId":"r1"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::JoinRoom(JoinRoomRequest {
                room_id: "r1".into()
            })
        );

        let msg = parse_client_message(r#"{"type":"join_room","room_id":"r2"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::JoinRoom(r) if r.room_id == "r2"));

        assert_eq!(
            parse_client_message(r#"{"type":"leave_room"}"#).unwrap(),
            ClientMessage::LeaveRoom
        );
        assert_eq!(
            parse_client_message(r#"{"type":"ping"}"#).unwrap(),
            ClientMessage::Ping
        );

        let msg = parse_client_message(
            r#"{"type":"translate","text":"hello","translatorBackend":"yandex","targetLang":"ru"}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::Translate(req) => {
                assert_eq!(req.text, "hello");
                assert_eq!(req.source_lang, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejections() {
        let err = parse_client_message(r#"{"type":"dance"}"#).unwrap_err();
        assert_eq!(err.error_code, error_codes::UNKNOWN_MESSAGE_TYPE);
        assert!(err.details.is_some());

        let err = parse_client_message("not json").unwrap_err();
        assert_eq!(err.error_code, error_codes::INVALID_MESSAGE_FORMAT);

        let err = parse_client_message(r#"{"roomId":"r1"}"#).unwrap_err();
        assert_eq!(err.error_code, error_codes::INVALID_MESSAGE_FORMAT);

        let err = parse_client_message(r#"{"type":"join_room"}"#).unwrap_err();
        assert_eq!(err.error_code, error_codes::INVALID_MESSAGE_FORMAT);
    }
}
