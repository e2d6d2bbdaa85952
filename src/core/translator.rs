//! Translator trait - Abstract interface for translation backends
//!
//! Each backend (yandex, google, deepl, a self-hosted model, ...) implements
//! [`Translator`]. Authentication and request formatting are private to the
//! implementation; the broker only sees text in, text or a classified error out.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::types::{ErrorKind, TranslationJob};

/// Input to a backend call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationRequest {
    pub text: String,
    pub target_lang: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_lang: Option<String>,
}

impl From<&TranslationJob> for TranslationRequest {
    fn from(job: &TranslationJob) -> Self {
        TranslationRequest {
            text: job.text.clone(),
            target_lang: job.target_lang.clone(),
            source_lang: job.source_lang.clone(),
        }
    }
}

/// Successful backend output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Translation {
    pub translated_text: String,
    /// Source language as detected by the backend
    #[serde(default, alias = "source_lang")]
    pub source_lang: Option<String>,
}

impl Translation {
    pub fn new(text: impl Into<String>) -> Self {
        Translation {
            translated_text: text.into(),
            source_lang: None,
        }
    }
}

/// Classified backend failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct BackendError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl BackendError {
    /// Timeout, 5xx, rate limit: worth retrying
    pub fn transient(detail: impl Into<String>) -> Self {
        BackendError {
            kind: ErrorKind::BackendTransient,
            detail: detail.into(),
        }
    }

    /// Backend explicitly rejected the input
    pub fn fatal(detail: impl Into<String>) -> Self {
        BackendError {
            kind: ErrorKind::BackendFatal,
            detail: detail.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ErrorKind::BackendTransient
    }
}

impl From<BackendError> for crate::error::Error {
    fn from(err: BackendError) -> Self {
        crate::error::Error::Backend {
            kind: err.kind,
            detail: err.detail,
        }
    }
}

/// A translation backend
#[async_trait]
pub trait Translator: Send + Sync {
    /// Backend selector this translator answers to
    fn name(&self) -> &str;

    /// Translate one text
    async fn translate(
        &self,
        request: &TranslationRequest,
    ) -> std::result::Result<Translation, BackendError>;
}
