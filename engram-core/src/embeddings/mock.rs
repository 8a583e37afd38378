//! Deterministic mock embedding provider
//!
//! Produces stable, non-semantic embeddings from a text hash. Used by the
//! test suite and as the fallback when no remote provider is configured —
//! identical text always maps to an identical vector, so dedup and
//! exact-repeat cache behavior still hold.

use super::similarity::normalize;
use super::{validate_input, Embedding, EmbeddingProvider};
use crate::constants::defaults::EMBEDDING_DIMENSION;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Mock embedding provider; deterministic but non-semantic.
pub struct MockEmbeddingProvider {
    dimension: usize,
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEmbeddingProvider {
    #[must_use]
    pub fn new() -> Self {
        Self { dimension: EMBEDDING_DIMENSION }
    }

    /// Generate the deterministic embedding for a text.
    #[must_use]
    pub fn embedding_for(&self, text: &str) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let mut seed = hasher.finish();

        let mut vector = Vec::with_capacity(self.dimension);
        for _ in 0..self.dimension {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let value = ((seed >> 16) as f32) / 32_768.0 - 1.0;
            vector.push(value);
        }
        normalize(vector)
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        validate_input(text)?;
        Ok(Embedding {
            vector: self.embedding_for(text),
            model: "mock".to_string(),
            latency_ms: 0,
        })
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::cosine_similarity;

    #[tokio::test]
    async fn identical_text_gives_identical_vectors() {
        let provider = MockEmbeddingProvider::new();
        let a = provider.embed("kubernetes pods").await.unwrap();
        let b = provider.embed("kubernetes pods").await.unwrap();
        assert_eq!(a.vector, b.vector);
        assert!((cosine_similarity(&a.vector, &b.vector) - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn different_text_gives_different_vectors() {
        let provider = MockEmbeddingProvider::new();
        let a = provider.embed("kubernetes pods").await.unwrap();
        let b = provider.embed("french cooking").await.unwrap();
        assert!(cosine_similarity(&a.vector, &b.vector) < 0.9);
    }

    #[tokio::test]
    async fn empty_input_fails() {
        let provider = MockEmbeddingProvider::new();
        assert!(provider.embed("  ").await.is_err());
    }

    #[tokio::test]
    async fn dimension_matches_platform_commitment() {
        let provider = MockEmbeddingProvider::new();
        let e = provider.embed("text").await.unwrap();
        assert_eq!(e.vector.len(), EMBEDDING_DIMENSION);
    }
}
