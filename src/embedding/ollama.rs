//! Embeddings served by a local Ollama instance.

use super::{Embedder, EmbeddingError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

/// Embedding client backed by a local Ollama runtime.
///
/// Blank inputs never leave the process: they are answered with zero vectors and only the
/// remaining texts are sent in a single `/api/embed` batch.
pub struct OllamaEmbedder {
    http: Client,
    base_url: String,
    model: String,
    dimension: usize,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbedder {
    /// Build a client for `model` served at `base_url`.
    pub fn new(base_url: String, model: String, dimension: usize) -> Result<Self, EmbeddingError> {
        if dimension == 0 {
            return Err(EmbeddingError::GenerationFailed(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }
        let http = Client::builder()
            .user_agent("docchat/embed")
            .build()
            .map_err(|error| EmbeddingError::ProviderUnavailable(error.to_string()))?;
        Ok(Self {
            http,
            base_url,
            model,
            dimension,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/embed", self.base_url.trim_end_matches('/'))
    }

    async fn request(&self, inputs: Vec<&str>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let payload = json!({ "model": self.model, "input": inputs });
        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                EmbeddingError::ProviderUnavailable(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(EmbeddingError::ProviderUnavailable(format!(
                "Ollama endpoint {} returned 404",
                self.endpoint()
            )));
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::GenerationFailed(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let body: EmbedResponse = response.json().await.map_err(|error| {
            EmbeddingError::InvalidResponse(format!("failed to decode Ollama response: {error}"))
        })?;
        Ok(body.embeddings)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = vec![vec![0.0_f32; self.dimension]; texts.len()];
        let pending: Vec<(usize, &str)> = texts
            .iter()
            .enumerate()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(position, text)| (position, text.as_str()))
            .collect();
        if pending.is_empty() {
            return Ok(vectors);
        }

        tracing::debug!(
            model = %self.model,
            inputs = pending.len(),
            "Requesting Ollama embeddings"
        );
        let embeddings = self
            .request(pending.iter().map(|(_, text)| *text).collect())
            .await?;
        if embeddings.len() != pending.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} vectors, got {}",
                pending.len(),
                embeddings.len()
            )));
        }

        for ((position, _), vector) in pending.into_iter().zip(embeddings) {
            if vector.len() != self.dimension {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.dimension,
                    actual: vector.len(),
                });
            }
            vectors[position] = vector;
        }
        Ok(vectors)
    }
}
