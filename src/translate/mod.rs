//! Label translation
//!
//! Translation is an external capability reached over HTTP. The label
//! translator treats it as optional: when the backend fails, the original
//! label is returned in place of the translation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::TranslationConfig;

/// Errors from the translation backend
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("translation request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("translation backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected translation payload: {0}")]
    Payload(String),
}

/// Text translator
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate `text` into the `target` language code (source auto-detected)
    async fn translate(&self, text: &str, target: &str) -> Result<String, TranslateError>;
}

/// Result of an optional translation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TranslationOutcome {
    Translated { text: String },
    /// Backend failed; `fallback` is the untranslated input
    Degraded { fallback: String, reason: String },
}

impl TranslationOutcome {
    /// Text to show the user
    pub fn text(&self) -> &str {
        match self {
            TranslationOutcome::Translated { text } => text,
            TranslationOutcome::Degraded { fallback, .. } => fallback,
        }
    }
}

/// Translate, falling back to the input text on any failure
pub async fn translate_or_fallback(translator: &dyn Translator, text: &str, target: &str) -> TranslationOutcome {
    match translator.translate(text, target).await {
        Ok(translated) => {
            debug!(%text, %target, %translated, "Translated label");
            TranslationOutcome::Translated { text: translated }
        }
        Err(e) => {
            warn!("Translation to {} failed, returning source text: {}", target, e);
            TranslationOutcome::Degraded {
                fallback: text.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    #[serde(rename = "translatedText")]
    translated_text: Option<String>,
    error: Option<String>,
}

/// Client for a LibreTranslate compatible `/translate` endpoint
pub struct LibreTranslateClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl LibreTranslateClient {
    pub fn new(config: &TranslationConfig) -> Result<Self, TranslateError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl Translator for LibreTranslateClient {
    async fn translate(&self, text: &str, target: &str) -> Result<String, TranslateError> {
        let request = TranslateRequest {
            q: text,
            source: "auto",
            target,
            format: "text",
            api_key: self.api_key.as_deref(),
        };

        let response = self
            .client
            .post(format!("{}/translate", self.endpoint))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TranslateError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: TranslateResponse = response.json().await?;
        match (payload.translated_text, payload.error) {
            (Some(text), _) => Ok(text),
            (None, Some(error)) => Err(TranslateError::Payload(error)),
            (None, None) => Err(TranslateError::Payload("missing translatedText".to_string())),
        }
    }
}
