use crate::error::CapabilityError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;

/// Produces a vector for a piece of text. Implementations are called through
/// the dispatcher, so they classify their own failures but never retry.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CapabilityError>;
}

#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    prompt: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

/// Embedding capability backed by an Ollama-compatible HTTP endpoint.
pub struct OllamaEmbedder {
    base_url: String,
    model: String,
    client: Client,
}

impl OllamaEmbedder {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CapabilityError> {
        let response = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&EmbeddingRequest {
                model: self.model.clone(),
                prompt: text.to_string(),
            })
            .send()
            .await?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(CapabilityError::RateLimited(
                "embedding endpoint returned 429".to_string(),
            ));
        }
        if !response.status().is_success() {
            return Err(CapabilityError::Request(format!(
                "embedding request returned {}",
                response.status()
            )));
        }

        let payload: EmbeddingResponse = response.json().await?;
        Ok(payload.embedding)
    }
}

/// Deterministic character-trigram embedder. No network, stable across runs;
/// used for offline processing and tests.
#[derive(Debug, Clone, Copy)]
pub struct HashedNgramEmbedder {
    pub dimensions: usize,
}

impl Default for HashedNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl HashedNgramEmbedder {
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashedNgramEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CapabilityError> {
        Ok(self.embed_text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashed_embedder_is_deterministic() {
        let embedder = HashedNgramEmbedder::default();
        let first = embedder.embed_text("entity resolution over document chunks");
        let second = embedder.embed_text("entity resolution over document chunks");
        assert_eq!(first, second);
    }

    #[test]
    fn hashed_embedder_outputs_expected_length() {
        let embedder = HashedNgramEmbedder { dimensions: 32 };
        assert_eq!(embedder.embed_text("abc").len(), 32);
    }

    #[tokio::test]
    async fn hashed_embedder_serves_the_provider_contract() {
        let embedder = HashedNgramEmbedder::default();
        let vector = embedder
            .embed("graph node")
            .await
            .expect("deterministic embedder never fails");
        assert_eq!(vector.len(), DEFAULT_EMBEDDING_DIMENSIONS);
    }
}
