//! [`VisionClient`] over an `edgequake-llm` provider.

use super::{VisionClient, VisionRequest};
use crate::error::{PipelineError, VisionError};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// How to pick a provider when none is handed in.
#[derive(Debug, Clone, Default)]
pub struct ProviderSelection {
    /// Provider name such as `"openai"` or `"anthropic"`.
    pub provider: Option<String>,
    pub model: Option<String>,
}

pub struct ProviderVisionClient {
    provider: Arc<dyn LLMProvider>,
    label: String,
    options: CompletionOptions,
}

impl std::fmt::Debug for ProviderVisionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderVisionClient")
            .field("provider", &self.label)
            .finish_non_exhaustive()
    }
}

impl ProviderVisionClient {
    /// Wrap a pre-built provider.
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider,
            label: "custom".to_string(),
            options: default_options(),
        }
    }

    pub fn with_options(mut self, options: CompletionOptions) -> Self {
        self.options = options;
        self
    }

    /// Resolve a provider, from most-specific to least-specific:
    ///
    /// 1. **Named provider + model** from `selection`. The factory reads the
    ///    matching API key (`OPENAI_API_KEY`, etc.) from the environment.
    /// 2. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`,
    ///    honoured only when both are set.
    /// 3. **OpenAI** when `OPENAI_API_KEY` is present, so users holding
    ///    several keys default to OpenAI.
    /// 4. **Full auto-detection** via `ProviderFactory::from_env`.
    pub fn resolve(selection: &ProviderSelection) -> Result<Self, PipelineError> {
        if let Some(name) = selection.provider.as_deref().filter(|n| !n.is_empty()) {
            let model = selection.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return Self::named(name, model);
        }

        if let (Ok(prov), Ok(model)) = (
            std::env::var("EDGEQUAKE_LLM_PROVIDER"),
            std::env::var("EDGEQUAKE_MODEL"),
        ) {
            if !prov.is_empty() && !model.is_empty() {
                return Self::named(&prov, &model);
            }
        }

        if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
            let model = selection.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return Self::named("openai", model);
        }

        let (provider, _embedding) =
            ProviderFactory::from_env().map_err(|e| PipelineError::ProviderNotConfigured {
                provider: "auto".to_string(),
                hint: format!(
                    "No LLM provider could be auto-detected from environment.\n\
                    Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                    Error: {e}"
                ),
            })?;
        Ok(Self {
            provider,
            label: "auto".to_string(),
            options: default_options(),
        })
    }

    fn named(name: &str, model: &str) -> Result<Self, PipelineError> {
        let provider = ProviderFactory::create_llm_provider(name, model).map_err(|e| {
            PipelineError::ProviderNotConfigured {
                provider: name.to_string(),
                hint: format!("{e}"),
            }
        })?;
        Ok(Self {
            provider,
            label: format!("{name}/{model}"),
            options: default_options(),
        })
    }
}

fn default_options() -> CompletionOptions {
    CompletionOptions {
        temperature: Some(0.1),
        max_tokens: Some(4096),
        ..Default::default()
    }
}

#[async_trait]
impl VisionClient for ProviderVisionClient {
    /// The provider's reply is re-wrapped as a chat-completion payload so the
    /// artifact keeps the same shape as a raw endpoint response, usage
    /// included.
    async fn extract(&self, request: &VisionRequest) -> Result<String, VisionError> {
        let images = request
            .encoded_images()
            .await?
            .iter()
            .map(|img| img.to_image_data())
            .collect::<Vec<_>>();
        let messages = vec![ChatMessage::user_with_images(
            request.prompt.as_str(),
            images,
        )];

        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| VisionError::classify(e.to_string()))?;

        let prompt_tokens = response.prompt_tokens as u64;
        let completion_tokens = response.completion_tokens as u64;
        debug!(
            "{}: {prompt_tokens} input tokens, {completion_tokens} output tokens",
            self.label
        );
        let payload = json!({
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": response.content },
            }],
            "usage": {
                "prompt_tokens": prompt_tokens,
                "completion_tokens": completion_tokens,
                "total_tokens": prompt_tokens + completion_tokens,
            },
        });
        Ok(payload.to_string())
    }

    fn name(&self) -> &str {
        &self.label
    }
}
