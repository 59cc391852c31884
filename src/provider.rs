//! Generative model provider used for recognition and the assistant.

use crate::matcher::frame::EncodedImage;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-3-flash-preview";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider is not configured")]
    NotConfigured,

    #[error("provider request timed out")]
    Timeout,

    #[error("provider unreachable: {0}")]
    Transport(String),

    /// Authentication, quota or billing refusal.
    #[error("provider rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("provider returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("provider reply could not be read: {0}")]
    Malformed(String),
}

impl ProviderError {
    pub fn class(&self) -> &'static str {
        match self {
            ProviderError::NotConfigured => "not_configured",
            ProviderError::Timeout => "timeout",
            ProviderError::Transport(_) => "transport",
            ProviderError::Rejected { .. } => "rejected",
            ProviderError::Status { .. } => "provider_status",
            ProviderError::Malformed(_) => "malformed",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub prompt: String,
    pub images: Vec<EncodedImage>,
    /// Structured-output schema; the reply text is then a JSON document.
    pub response_schema: Option<serde_json::Value>,
}

#[async_trait]
pub trait RecognitionProvider: Send + Sync {
    fn is_configured(&self) -> bool;

    /// Returns the model's reply text.
    async fn generate(&self, request: &GenerateRequest) -> Result<String, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model: String,
    pub timeout: Duration,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        ProviderSettings {
            api_key: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Client for the `models/{model}:generateContent` REST call.
pub struct GeminiProvider {
    settings: ProviderSettings,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

impl GeminiProvider {
    pub fn new(settings: ProviderSettings) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| ProviderError::Transport(format!("http client: {e}")))?;
        Ok(GeminiProvider { settings, client })
    }

    fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.settings.endpoint.trim_end_matches('/'),
            self.settings.model
        )
    }

    fn body(request: &GenerateRequest) -> serde_json::Value {
        let mut parts = vec![json!({ "text": request.prompt })];
        parts.extend(request.images.iter().map(|img| {
            json!({
                "inline_data": {
                    "mime_type": img.mime(),
                    "data": img.base64(),
                }
            })
        }));
        let mut body = json!({
            "contents": [{ "role": "user", "parts": parts }],
        });
        if let Some(schema) = &request.response_schema {
            body["generationConfig"] = json!({
                "responseMimeType": "application/json",
                "responseSchema": schema,
            });
        }
        body
    }
}

#[async_trait]
impl RecognitionProvider for GeminiProvider {
    fn is_configured(&self) -> bool {
        self.settings
            .api_key
            .as_deref()
            .map(|k| !k.trim().is_empty())
            .unwrap_or(false)
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<String, ProviderError> {
        let Some(api_key) = self.settings.api_key.as_deref().filter(|k| !k.trim().is_empty()) else {
            return Err(ProviderError::NotConfigured);
        };
        debug!(model = %self.settings.model, images = request.images.len(), "provider request");

        let resp = self
            .client
            .post(self.url())
            .header("x-goog-api-key", api_key)
            .json(&Self::body(request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Transport(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            let message: String = message.chars().take(300).collect();
            return Err(match status {
                StatusCode::UNAUTHORIZED
                | StatusCode::FORBIDDEN
                | StatusCode::PAYMENT_REQUIRED
                | StatusCode::TOO_MANY_REQUESTS => ProviderError::Rejected {
                    status: status.as_u16(),
                    message,
                },
                StatusCode::BAD_REQUEST if message.contains("API_KEY") => ProviderError::Rejected {
                    status: status.as_u16(),
                    message,
                },
                _ => ProviderError::Status {
                    status: status.as_u16(),
                    message,
                },
            });
        }

        let parsed: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        Ok(reply_text(&parsed))
    }
}

fn reply_text(resp: &GenerateResponse) -> String {
    resp.candidates
        .first()
        .and_then(|c| c.content.as_ref())
        .map(|content| {
            content
                .parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}
