//! Direct OpenAI-compatible chat-completions client.
//!
//! Returns the HTTP body untouched so the artifact is exactly what the
//! endpoint sent, `usage` object included.

use super::{VisionClient, VisionRequest};
use crate::error::{PipelineError, VisionError};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "gpt-4o";

#[derive(Debug, Clone)]
pub struct OpenAiVisionClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiVisionClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, PipelineError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| PipelineError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 4096,
        })
    }

    /// `OPENAI_API_KEY`, plus optional `OPENAI_BASE_URL` and `OPENAI_MODEL`.
    pub fn from_env() -> Result<Self, PipelineError> {
        let key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| PipelineError::ProviderNotConfigured {
                provider: "openai".to_string(),
                hint: "Set OPENAI_API_KEY".to_string(),
            })?;
        let mut client = Self::new(key)?;
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            client = client.with_base_url(url);
        }
        if let Ok(model) = std::env::var("OPENAI_MODEL") {
            client = client.with_model(model);
        }
        Ok(client)
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    async fn build_body(&self, request: &VisionRequest) -> Result<Value, VisionError> {
        let mut content = vec![json!({ "type": "text", "text": request.prompt })];
        for img in request.encoded_images().await? {
            content.push(json!({
                "type": "image_url",
                "image_url": { "url": img.data_uri(), "detail": "high" },
            }));
        }
        Ok(json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": [{ "role": "user", "content": content }],
        }))
    }
}

#[async_trait]
impl VisionClient for OpenAiVisionClient {
    async fn extract(&self, request: &VisionRequest) -> Result<String, VisionError> {
        let body = self.build_body(request).await?;
        let bytes = serde_json::to_vec(&body).map_err(|e| VisionError::Failed {
            message: format!("request encoding: {e}"),
        })?;

        let response = self
            .http
            .post(self.endpoint())
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(CONTENT_TYPE, "application/json")
            .body(bytes)
            .send()
            .await
            .map_err(|e| VisionError::classify(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| VisionError::classify(e.to_string()))?;
        debug!("{} → HTTP {status}, {} bytes", self.endpoint(), text.len());

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(VisionError::RateLimited {
                message: format!("HTTP 429: {text}"),
            });
        }
        if !status.is_success() {
            return Err(VisionError::classify(format!("HTTP {status}: {text}")));
        }
        Ok(text)
    }

    fn name(&self) -> &str {
        &self.model
    }
}
