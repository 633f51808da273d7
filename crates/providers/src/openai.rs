use crate::{check_status, http_client, send_error, ModelConfig, ProviderError, VisionProvider};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// OpenAI-compatible chat completions backend (OpenAI, LM Studio, vLLM, ...).
#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
    cfg: Arc<ModelConfig>,
    url: String,
    api_key: Option<String>,
}

impl OpenAiProvider {
    pub fn new(cfg: ModelConfig) -> Result<Self, ProviderError> {
        let base = if cfg.endpoint.is_empty() {
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string())
        } else {
            cfg.endpoint.clone()
        };
        let api_key = cfg
            .key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|k| !k.is_empty());
        Ok(Self {
            client: http_client(cfg.timeout())?,
            url: completions_url(&base),
            api_key,
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

fn completions_url(base: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{}/v1/chat/completions", base)
    }
}

fn data_url(image: &[u8]) -> String {
    let mime = infer::get(image)
        .map(|kind| kind.mime_type())
        .unwrap_or("image/jpeg");
    format!("data:{};base64,{}", mime, BASE64.encode(image))
}

#[async_trait::async_trait]
impl VisionProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn generate(&self, image: &[u8], prompt: &str) -> Result<String, ProviderError> {
        #[derive(Deserialize)]
        struct Choice {
            message: ChatMessageResp,
        }
        #[derive(Deserialize)]
        struct ChatMessageResp {
            content: Option<String>,
        }
        #[derive(Deserialize)]
        struct ChatApiResponse {
            choices: Vec<Choice>,
        }

        let body = serde_json::json!({
            "model": self.model(),
            "temperature": self.cfg.options.temperature(),
            "max_tokens": self.cfg.options.max_tokens(),
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    { "type": "image_url", "image_url": { "url": data_url(image) } }
                ]
            }]
        });

        tracing::debug!(url = %self.url, model = self.model(), "calling chat completions");
        let mut builder = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let resp = builder
            .send()
            .await
            .map_err(|e| send_error("OpenAI", &self.url, self.cfg.timeout(), e))?;
        let resp = check_status("OpenAI", resp).await?;

        let parsed: ChatApiResponse = resp
            .json()
            .await
            .map_err(|_| ProviderError::MalformedResponse)?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default();
        if content.is_empty() {
            return Err(ProviderError::MalformedResponse);
        }
        Ok(content)
    }
}
