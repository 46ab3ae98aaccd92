//! Deterministic feature-hashing embedder that needs no external service.

use super::{Embedder, EmbeddingError};
use async_trait::async_trait;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Deterministic feature-hashing embedder.
///
/// Each lower-cased alphanumeric word adds one to the bucket selected by its FNV-1a hash, so
/// texts sharing vocabulary point in similar directions. Vectors are left unnormalized.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    /// Construct an embedder producing vectors of `dimension` buckets.
    pub fn new(dimension: usize) -> Result<Self, EmbeddingError> {
        if dimension == 0 {
            return Err(EmbeddingError::GenerationFailed(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }
        Ok(Self { dimension })
    }

    /// Embed a single text synchronously.
    pub fn encode(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; self.dimension];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
        {
            let bucket = fnv1a(&word.to_lowercase()) % self.dimension as u64;
            embedding[bucket as usize] += 1.0;
        }
        embedding
    }
}

fn fnv1a(value: &str) -> u64 {
    value.bytes().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn name(&self) -> &'static str {
        "hashing"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|text| self.encode(text)).collect())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.encode(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_dimension() {
        assert!(HashingEmbedder::new(0).is_err());
    }

    #[test]
    fn blank_text_yields_zero_vector() {
        let embedder = HashingEmbedder::new(16).unwrap();
        let vector = embedder.encode("  \n\t ");
        assert_eq!(vector.len(), 16);
        assert!(vector.iter().all(|value| *value == 0.0));
    }

    #[test]
    fn encoding_is_case_insensitive_and_deterministic() {
        let embedder = HashingEmbedder::new(64).unwrap();
        assert_eq!(embedder.encode("Solar Panels"), embedder.encode("solar panels"));
        assert_eq!(embedder.encode("solar panels"), embedder.encode("solar panels"));
    }

    #[tokio::test]
    async fn batch_matches_single_embeddings() {
        let embedder = HashingEmbedder::new(32).unwrap();
        let texts = vec![
            "first passage".to_string(),
            String::new(),
            "third passage about revenue".to_string(),
        ];
        let batch = embedder.embed_many(&texts).await.unwrap();
        for (text, vector) in texts.iter().zip(batch) {
            assert_eq!(embedder.embed(text).await.unwrap(), vector);
        }
    }
}
