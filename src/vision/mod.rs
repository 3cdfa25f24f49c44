//! Vision clients: an ordered set of page images plus a prompt in, an opaque
//! response payload out.
//!
//! The orchestrator only ever sees [`VisionClient`]; payloads are decoded by
//! [`crate::pipeline::response`]. Two implementations ship:
//!
//! * [`ProviderVisionClient`] routes through `edgequake-llm` and so works
//!   with any provider the factory knows (OpenAI, Anthropic, Gemini, Ollama).
//! * [`OpenAiVisionClient`] POSTs straight to an OpenAI-compatible
//!   `/v1/chat/completions` endpoint and returns the body verbatim.

mod openai;
mod provider;

pub use openai::OpenAiVisionClient;
pub use provider::{ProviderSelection, ProviderVisionClient};

use crate::error::VisionError;
use crate::pipeline::encode::{encode_file, EncodedImage};
use async_trait::async_trait;
use std::path::PathBuf;

/// One call to a vision model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisionRequest {
    pub prompt: String,
    /// Page images in page order.
    pub images: Vec<PathBuf>,
    /// When false the images are not embedded and only the prompt is sent.
    pub include_images: bool,
}

impl VisionRequest {
    pub fn new(prompt: impl Into<String>, images: Vec<PathBuf>, include_images: bool) -> Self {
        Self {
            prompt: prompt.into(),
            images,
            include_images,
        }
    }

    /// Encode the images that should be embedded, in order.
    pub async fn encoded_images(&self) -> Result<Vec<EncodedImage>, VisionError> {
        if !self.include_images {
            return Ok(Vec::new());
        }
        let mut out = Vec::with_capacity(self.images.len());
        for path in &self.images {
            let img = encode_file(path).await.map_err(|e| VisionError::Failed {
                message: format!("cannot read image {}: {e}", path.display()),
            })?;
            out.push(img);
        }
        Ok(out)
    }
}

#[async_trait]
pub trait VisionClient: Send + Sync {
    /// Send the request and return the raw response payload.
    ///
    /// A quota rejection must come back as [`VisionError::RateLimited`].
    async fn extract(&self, request: &VisionRequest) -> Result<String, VisionError>;

    /// Short label for logs.
    fn name(&self) -> &str {
        "vision"
    }
}
