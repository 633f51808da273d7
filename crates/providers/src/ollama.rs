use crate::{check_status, http_client, send_error, ModelConfig, ProviderError, VisionProvider};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const DEFAULT_MODEL: &str = "llava";

#[derive(Clone)]
pub struct OllamaProvider {
    client: Client,
    cfg: Arc<ModelConfig>,
}

impl OllamaProvider {
    pub fn new(cfg: ModelConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client(cfg.timeout())?,
            cfg: Arc::new(cfg),
        })
    }

    fn model(&self) -> &str {
        if self.cfg.model.is_empty() {
            DEFAULT_MODEL
        } else {
            &self.cfg.model
        }
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    images: Vec<String>,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: Option<String>,
}

#[async_trait::async_trait]
impl VisionProvider for OllamaProvider {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn generate(&self, image: &[u8], prompt: &str) -> Result<String, ProviderError> {
        let body = GenerateRequest {
            model: self.model(),
            prompt,
            images: vec![BASE64.encode(image)],
            stream: false,
            options: GenerateOptions {
                temperature: self.cfg.options.temperature(),
                num_predict: self.cfg.options.max_tokens(),
            },
        };

        tracing::debug!(endpoint = %self.cfg.endpoint, model = self.model(), "calling Ollama");
        let resp = self
            .client
            .post(&self.cfg.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| send_error("Ollama", &self.cfg.endpoint, self.cfg.timeout(), e))?;
        let resp = check_status("Ollama", resp).await?;

        let parsed: GenerateResponse = resp
            .json()
            .await
            .map_err(|_| ProviderError::MalformedResponse)?;

        match parsed.response.map(|r| r.trim().to_string()) {
            Some(text) if !text.is_empty() => Ok(text),
            _ => Err(ProviderError::MalformedResponse),
        }
    }
}
