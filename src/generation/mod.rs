//! Streaming answer generation.
//!
//! Providers hand back a lazy stream of text deltas. The stream owns the underlying HTTP
//! response, so dropping it closes the connection and stops the provider from producing more.
//! Chunk boundaries carry no meaning; consumers must not assume any.

mod lines;
mod ollama;
mod openai;

pub use ollama::OllamaGenerator;
pub use openai::OpenAiGenerator;

use crate::config::{Config, GenerationProvider};
use async_trait::async_trait;
use futures_core::Stream;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Notice streamed back when no provider is configured.
pub const UNCONFIGURED_NOTICE: &str =
    "AI service is not configured. Set GENERATION_PROVIDER and the matching credentials.";

/// Errors surfaced while generating an answer.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Provider could not be reached.
    #[error("Generation provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider rejected the request.
    #[error("Generation request failed: {0}")]
    RequestFailed(String),
    /// Provider response could not be decoded.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
    /// Provider stream broke off mid-answer.
    #[error("Generation stream interrupted: {0}")]
    Stream(String),
}

/// Lazy, finite, non-restartable sequence of text deltas.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, GenerationError>> + Send>>;

/// Prompt handed to a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// System instructions.
    pub system: String,
    /// User-facing prompt, including any retrieved context.
    pub prompt: String,
}

/// Sampling options shared by every provider.
#[derive(Debug, Clone, Copy)]
pub struct SamplingOptions {
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens in the answer.
    pub max_tokens: u32,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1000,
        }
    }
}

/// Interface implemented by answer generation providers.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Short provider label used in logs and status output.
    fn name(&self) -> &'static str;

    /// Start generating and return the stream of text deltas.
    async fn stream(&self, request: GenerationRequest) -> Result<TextStream, GenerationError>;
}

/// Fallback used when no provider is configured: streams a single notice.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredGenerator;

#[async_trait]
impl GenerationClient for UnconfiguredGenerator {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn stream(&self, _request: GenerationRequest) -> Result<TextStream, GenerationError> {
        let notice: Result<String, GenerationError> = Ok(UNCONFIGURED_NOTICE.to_string());
        Ok(Box::pin(futures_util::stream::iter([notice])))
    }
}

/// Build the generation client selected by configuration.
pub fn build_generator(config: &Config) -> Result<Arc<dyn GenerationClient>, GenerationError> {
    let sampling = SamplingOptions {
        temperature: config.generation_temperature,
        max_tokens: config.generation_max_tokens,
    };
    let client: Arc<dyn GenerationClient> = match config.generation_provider {
        GenerationProvider::None => {
            tracing::warn!("No generation provider configured; answers will carry a notice");
            Arc::new(UnconfiguredGenerator)
        }
        GenerationProvider::Ollama => Arc::new(OllamaGenerator::new(
            config.ollama_url.clone(),
            config.generation_model.clone(),
            sampling,
        )?),
        GenerationProvider::OpenAI => {
            let api_key = config.openai_api_key.clone().ok_or_else(|| {
                GenerationError::ProviderUnavailable("OPENAI_API_KEY is not set".into())
            })?;
            Arc::new(OpenAiGenerator::new(
                config.openai_base_url.clone(),
                api_key,
                config.generation_model.clone(),
                sampling,
            )?)
        }
    };
    tracing::info!(
        provider = client.name(),
        model = %config.generation_model,
        "Generation client ready"
    );
    Ok(client)
}
