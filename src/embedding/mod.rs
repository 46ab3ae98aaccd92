//! Embedding client abstraction and adapters.
//!
//! Every adapter returns vectors of one fixed dimension and answers blank input with a zero
//! vector instead of failing, so a blank PDF page can never abort an ingestion.

mod hashing;
mod ollama;

pub use hashing::HashingEmbedder;
pub use ollama::OllamaEmbedder;

use crate::config::{Config, EmbeddingProvider};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// Provider could not be reached.
    #[error("Embedding provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider response could not be decoded or had the wrong shape.
    #[error("Malformed embedding response: {0}")]
    InvalidResponse(String),
    /// Provider returned vectors of a different size than configured.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Configured dimension.
        expected: usize,
        /// Dimension produced by the provider.
        actual: usize,
    },
}

/// Interface implemented by embedding backends.
///
/// `embed_many` exists for throughput only: its output must equal calling `embed` per element.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Short provider label used in logs and status output.
    fn name(&self) -> &'static str {
        "custom"
    }

    /// Length of every vector this embedder produces.
    fn dimension(&self) -> usize;

    /// Produce one vector per input text, in input order.
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Produce the vector for a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_many(&[text.to_string()]).await?;
        match (vectors.pop(), vectors.is_empty()) {
            (Some(vector), true) => Ok(vector),
            _ => Err(EmbeddingError::InvalidResponse(
                "expected exactly one vector for one input".into(),
            )),
        }
    }
}

/// Build the embedder selected by configuration.
pub fn build_embedder(config: &Config) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    tracing::debug!(
        provider = ?config.embedding_provider,
        model = %config.embedding_model,
        dimension = config.embedding_dimension,
        "Building embedding client"
    );
    match config.embedding_provider {
        EmbeddingProvider::Hashing => Ok(Arc::new(HashingEmbedder::new(
            config.embedding_dimension,
        )?)),
        EmbeddingProvider::Ollama => Ok(Arc::new(OllamaEmbedder::new(
            config.ollama_url.clone(),
            config.embedding_model.clone(),
            config.embedding_dimension,
        )?)),
    }
}
