//! Translator backend configuration types

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Translator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslatorsConfig {
    /// Backend selectors accepted at submission
    #[serde(default = "default_allowed")]
    pub allowed: Vec<String>,
    /// HTTP backends by selector
    #[serde(default)]
    pub backends: HashMap<String, HttpBackendConfig>,
}

impl Default for TranslatorsConfig {
    fn default() -> Self {
        TranslatorsConfig {
            allowed: default_allowed(),
            backends: HashMap::new(),
        }
    }
}

fn default_allowed() -> Vec<String> {
    vec!["yandex".to_string(), "ardrey".to_string()]
}

impl TranslatorsConfig {
    /// Whether a backend selector may be submitted
    pub fn is_allowed(&self, backend: &str) -> bool {
        self.allowed.iter().any(|b| b.eq_ignore_ascii_case(backend))
    }
}

/// An HTTP translation endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpBackendConfig {
    /// Endpoint receiving `POST {text, targetLang, sourceLang}`
    pub url: String,
    /// Bearer token
    #[serde(skip_serializing)]
    pub api_key: Option<SecretString>,
    /// Client-side request timeout
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Extra static headers
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

impl HttpBackendConfig {
    pub fn new(url: impl Into<String>) -> Self {
        HttpBackendConfig {
            url: url.into(),
            api_key: None,
            timeout: default_timeout(),
            headers: HashMap::new(),
        }
    }
}
