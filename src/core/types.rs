//! Core types used across the broker
//!
//! Identifiers, the job/result records that travel over the queues, and the
//! lifecycle enums for sessions and jobs.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Length of a generated session token (alphanumeric, ~256 bits of entropy)
const SESSION_TOKEN_LEN: usize = 43;

// ============================================================================
// Identifiers
// ============================================================================

/// Opaque, unguessable session token
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh session token from the thread-local CSPRNG
    pub fn generate() -> Self {
        let token: String = rand::rng()
            .sample_iter(&rand::distr::Alphanumeric)
            .take(SESSION_TOKEN_LEN)
            .map(char::from)
            .collect();
        SessionId(token)
    }

    /// Borrow the raw token
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        SessionId(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        SessionId(s.to_string())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique job identifier, generated at submission and never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a new random job id
    pub fn new() -> Self {
        JobId(Uuid::new_v4())
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a gateway/handler process in the fleet
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Random node id for processes started without an explicit one
    pub fn random() -> Self {
        NodeId(format!("node-{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        NodeId(s)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Lifecycle states
// ============================================================================

/// Liveness state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Active,
    Disconnected,
    Expired,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Active => write!(f, "active"),
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Expired => write!(f, "expired"),
        }
    }
}

/// Job status: `queued → in_progress → {succeeded, failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    InProgress,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

/// Business error taxonomy carried in results and client error messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed job, dropped and never retried
    ValidationError,
    /// Unknown or expired session at submission time
    SessionNotFound,
    /// Timeout or unavailable backend, retried up to the ceiling
    BackendTransient,
    /// Backend rejected the input, not retried
    BackendFatal,
    /// No live owner when the result arrived
    DeliveryMiss,
}

impl ErrorKind {
    /// Upper-snake code used on the wire for `error` messages
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "VALIDATION_ERROR",
            ErrorKind::SessionNotFound => "SESSION_NOT_FOUND",
            ErrorKind::BackendTransient => "BACKEND_TRANSIENT",
            ErrorKind::BackendFatal => "BACKEND_FATAL",
            ErrorKind::DeliveryMiss => "DELIVERY_MISS",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::SessionNotFound => "session_not_found",
            ErrorKind::BackendTransient => "backend_transient",
            ErrorKind::BackendFatal => "backend_fatal",
            ErrorKind::DeliveryMiss => "delivery_miss",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Jobs and results
// ============================================================================

/// A submission as received from a client or HTTP caller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSubmission {
    /// Source text
    pub text: String,
    /// Translator backend selector (e.g. "yandex")
    #[serde(alias = "translator_code", alias = "translator_backend")]
    pub translator_backend: String,
    /// Target language code
    #[serde(alias = "target_lang")]
    pub target_lang: String,
    /// Optional source language code
    #[serde(default, alias = "source_lang")]
    pub source_lang: Option<String>,
    /// Session that receives the result
    #[serde(alias = "session_id", alias = "ws_session_id")]
    pub session_id: SessionId,
}

/// One translation request, processed by exactly one worker at a time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationJob {
    pub id: JobId,
    pub session_id: SessionId,
    pub text: String,
    pub backend: String,
    pub target_lang: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_lang: Option<String>,
    pub submitted_at: DateTime<Utc>,
    /// Retry counter carried with the message so it survives crashes
    #[serde(default)]
    pub retries: u32,
    #[serde(default = "default_status")]
    pub status: JobStatus,
}

fn default_status() -> JobStatus {
    JobStatus::Queued
}

impl TranslationJob {
    /// Build a queued job from a submission
    pub fn from_submission(submission: JobSubmission) -> Self {
        TranslationJob {
            id: JobId::new(),
            session_id: submission.session_id,
            text: submission.text,
            backend: submission.translator_backend,
            target_lang: submission.target_lang,
            source_lang: submission.source_lang.filter(|s| !s.trim().is_empty()),
            submitted_at: Utc::now(),
            retries: 0,
            status: JobStatus::Queued,
        }
    }

    /// Structural checks; a job failing these can never succeed
    pub fn validate(&self) -> Result<()> {
        if self.text.trim().is_empty() {
            return Err(Error::Validation("text must not be empty".into()));
        }
        if self.target_lang.trim().is_empty() {
            return Err(Error::Validation("targetLang must not be empty".into()));
        }
        if self.backend.trim().is_empty() {
            return Err(Error::Validation("translatorBackend must not be empty".into()));
        }
        if self.session_id.as_str().is_empty() {
            return Err(Error::Validation("sessionId must not be empty".into()));
        }
        Ok(())
    }
}

/// Failure descriptor delivered in place of translated text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDescriptor {
    pub kind: ErrorKind,
    pub detail: String,
}

/// Outcome of a job, routed back to the originating session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationResult {
    pub job_id: JobId,
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_lang: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDescriptor>,
    /// Number of retries the job went through
    #[serde(default)]
    pub retries: u32,
    pub completed_at: DateTime<Utc>,
}

impl TranslationResult {
    /// Successful translation
    pub fn success(
        job: &TranslationJob,
        translated_text: impl Into<String>,
        source_lang: Option<String>,
    ) -> Self {
        TranslationResult {
            job_id: job.id,
            session_id: job.session_id.clone(),
            translated_text: Some(translated_text.into()),
            source_lang,
            error: None,
            retries: job.retries,
            completed_at: Utc::now(),
        }
    }

    /// Terminal failure, still delivered so the client is informed
    pub fn failure(job: &TranslationJob, kind: ErrorKind, detail: impl Into<String>) -> Self {
        TranslationResult {
            job_id: job.id,
            session_id: job.session_id.clone(),
            translated_text: None,
            source_lang: None,
            error: Some(ErrorDescriptor {
                kind,
                detail: detail.into(),
            }),
            retries: job.retries,
            completed_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.translated_text.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission() -> JobSubmission {
        JobSubmission {
            text: "hello".into(),
            translator_backend: "yandex".into(),
            target_lang: "ru".into(),
            source_lang: Some("  ".into()),
            session_id: SessionId::from("S1"),
        }
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), SESSION_TOKEN_LEN);
        assert!(a.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_job_from_submission() {
        let job = TranslationJob::from_submission(submission());
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.retries, 0);
        assert_eq!(job.source_lang, None);
        assert!(job.validate().is_ok());

        let other = TranslationJob::from_submission(submission());
        assert_ne!(job.id, other.id);
    }

    #[test]
    fn test_job_validation() {
        let mut job = TranslationJob::from_submission(submission());
        job.text = "   ".into();
        assert!(matches!(job.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_submission_accepts_legacy_field_names() {
        let json = r#"{"text":"hi","translator_code":"google","target_lang":"de","ws_session_id":"abc"}"#;
        let sub: JobSubmission = serde_json::from_str(json).unwrap();
        assert_eq!(sub.translator_backend, "google");
        assert_eq!(sub.session_id.as_str(), "abc");

        let json = r#"{"text":"hi","translatorBackend":"yandex","targetLang":"ru","sessionId":"S1"}"#;
        let sub: JobSubmission = serde_json::from_str(json).unwrap();
        assert_eq!(sub.target_lang, "ru");
    }

    #[test]
    fn test_result_wire_shape() {
        let job = TranslationJob::from_submission(submission());
        let result = TranslationResult::success(&job, "привет", None);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["sessionId"], "S1");
        assert_eq!(value["translatedText"], "привет");
        assert!(value.get("error").is_none());

        let failed = TranslationResult::failure(&job, ErrorKind::BackendFatal, "bad lang");
        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(value["error"]["kind"], "backend_fatal");
        assert!(!failed.is_success());
    }
}
