//! Vision model providers.
//!
//! A provider turns `(image bytes, prompt)` into generated text. The concrete
//! strategy is picked once from [`ModelConfig::provider`] by [`build_provider`].

use bytes::Bytes;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod mock;
pub mod ollama;
pub mod openai;

pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 200;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{0}")]
    Connection(String),
    #[error("AI request timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("{provider} API error: {status} - {message}")]
    Status {
        provider: &'static str,
        status: u16,
        message: String,
    },
    #[error("AI API returned abnormal format")]
    MalformedResponse,
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("unsupported AI model provider: {0}")]
    UnknownProvider(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Ollama,
    OpenAi,
    Mock,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Ollama => "ollama",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Mock => "mock",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelOptions {
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default, alias = "maxtokens", alias = "maxTokens")]
    pub max_tokens: Option<u32>,
}

impl ModelOptions {
    pub fn temperature(&self) -> f32 {
        self.temperature.unwrap_or(DEFAULT_TEMPERATURE)
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)
    }
}

/// How to reach the AI backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: ProviderKind,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub model: String,
    /// API key for hosted backends. Never serialized back out.
    #[serde(default, skip_serializing)]
    pub key: Option<String>,
    #[serde(default)]
    pub options: ModelOptions,
    #[serde(
        default = "default_timeout_secs",
        alias = "timeoutsecs",
        alias = "timeoutSecs"
    )]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl ModelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[async_trait::async_trait]
pub trait VisionProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(&self, image: &[u8], prompt: &str) -> Result<String, ProviderError>;
}

pub fn build_provider(cfg: &ModelConfig) -> Result<Arc<dyn VisionProvider>, ProviderError> {
    let provider: Arc<dyn VisionProvider> = match cfg.provider {
        ProviderKind::Ollama => Arc::new(ollama::OllamaProvider::new(cfg.clone())?),
        ProviderKind::OpenAi => Arc::new(openai::OpenAiProvider::new(cfg.clone())?),
        ProviderKind::Mock => Arc::new(mock::MockProvider),
    };
    tracing::debug!(
        provider = provider.name(),
        endpoint = %cfg.endpoint,
        model = %cfg.model,
        "AI provider selected"
    );
    Ok(provider)
}

pub(crate) fn http_client(timeout: Duration) -> Result<Client, ProviderError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::RequestFailed(e.to_string()))
}

pub(crate) fn send_error(
    service: &str,
    endpoint: &str,
    timeout: Duration,
    err: reqwest::Error,
) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(timeout)
    } else if err.is_connect() {
        ProviderError::Connection(format!(
            "Unable to connect to {} service, please ensure it is running ({})",
            service, endpoint
        ))
    } else {
        ProviderError::RequestFailed(err.to_string())
    }
}

/// Turns a non-2xx response into [`ProviderError::Status`], keeping the
/// backend's own error message when the body carries one.
pub(crate) async fn check_status(
    provider: &'static str,
    resp: Response,
) -> Result<Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.bytes().await.unwrap_or(Bytes::from_static(b""));
    let message = error_message(&body)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());
    Err(ProviderError::Status {
        provider,
        status: status.as_u16(),
        message,
    })
}

fn error_message(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    let err = value.get("error")?;
    match err {
        serde_json::Value::String(s) => Some(s.clone()),
        other => other
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string),
    }
}
