//! HTTP translation backend
//!
//! `POST {text, targetLang, sourceLang?}` to the configured URL and expect
//! `{translatedText, sourceLang?}` back. Failures are classified for the
//! retry policy:
//! - timeout, connect error, 408, 429, 5xx → transient
//! - any other non-success status or an undecodable body → fatal

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use secrecy::ExposeSecret;
use tracing::debug;

use crate::config::HttpBackendConfig;
use crate::core::{BackendError, Translation, TranslationRequest, Translator};
use crate::error::{Error, Result};

/// Longest upstream error body kept in a failure detail
const MAX_DETAIL_CHARS: usize = 200;

/// Translator backed by a JSON-over-HTTP endpoint
#[derive(Clone)]
pub struct HttpTranslator {
    name: String,
    url: String,
    client: Client,
}

impl HttpTranslator {
    pub fn new(name: impl Into<String>, config: &HttpBackendConfig) -> Result<Self> {
        let mut headers = header::HeaderMap::new();

        if let Some(ref api_key) = config.api_key {
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&format!("Bearer {}", api_key.expose_secret()))
                    .map_err(|e| Error::Config(format!("Invalid API key format: {}", e)))?,
            );
        }
        for (key, value) in &config.headers {
            let name = header::HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| Error::Config(format!("Invalid header name {}: {}", key, e)))?;
            let value = header::HeaderValue::from_str(value)
                .map_err(|e| Error::Config(format!("Invalid header value for {}: {}", key, e)))?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(HttpTranslator {
            name: name.into(),
            url: config.url.clone(),
            client,
        })
    }
}

fn classify_status(status: StatusCode, body: &str) -> BackendError {
    let detail = format!(
        "HTTP {}: {}",
        status.as_u16(),
        body.chars().take(MAX_DETAIL_CHARS).collect::<String>()
    );
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        BackendError::transient(detail)
    } else {
        BackendError::fatal(detail)
    }
}

fn classify_transport(err: reqwest::Error) -> BackendError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        BackendError::transient(err.to_string())
    } else {
        BackendError::fatal(err.to_string())
    }
}

#[async_trait]
impl Translator for HttpTranslator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn translate(
        &self,
        request: &TranslationRequest,
    ) -> std::result::Result<Translation, BackendError> {
        debug!(backend = %self.name, chars = request.text.chars().count(), "calling translator");

        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        response
            .json::<Translation>()
            .await
            .map_err(|e| BackendError::fatal(format!("invalid response body: {}", e)))
    }
}
