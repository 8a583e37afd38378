//! Text embedding generation
//!
//! The platform embeds every stored memory and every incoming query into a
//! fixed-dimension vector. The dimension is committed at
//! [`crate::constants::defaults::EMBEDDING_DIMENSION`] (1536); a provider or
//! adapter seeing any other length fails loudly rather than storing a
//! vector that can never match.

mod mock;
#[cfg(feature = "remote-providers")]
mod openai;
pub mod similarity;

pub use mock::MockEmbeddingProvider;
#[cfg(feature = "remote-providers")]
pub use openai::OpenAiEmbeddingProvider;
pub use similarity::cosine_similarity;

use crate::constants::defaults::EMBEDDING_DIMENSION;
use crate::error::{Error, Result};
use async_trait::async_trait;

/// Result of embedding a single text, with provider-side timing so the
/// caller can attribute latency in query analytics.
#[derive(Debug, Clone)]
pub struct Embedding {
    /// The embedding vector.
    pub vector: Vec<f32>,
    /// Model that produced it.
    pub model: String,
    /// Provider-measured generation time.
    pub latency_ms: u64,
}

/// Trait for embedding providers converting text to vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text.
    ///
    /// Fails with [`Error::Embedding`] on empty input, transport failure,
    /// or a dimension mismatch.
    async fn embed(&self, text: &str) -> Result<Embedding>;

    /// Embed multiple texts. Sequential by default; callers that need
    /// parallelism fan out themselves.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// The fixed dimension this provider produces.
    fn dimension(&self) -> usize {
        EMBEDDING_DIMENSION
    }

    /// Model identifier for analytics.
    fn model_name(&self) -> &str;
}

/// Reject vectors that are not the committed platform dimension.
pub fn validate_dimension(vector: &[f32]) -> Result<()> {
    if vector.len() != EMBEDDING_DIMENSION {
        return Err(Error::Embedding(format!(
            "embedding dimension mismatch: got {}, expected {}",
            vector.len(),
            EMBEDDING_DIMENSION
        )));
    }
    Ok(())
}

/// Reject empty or whitespace-only input before it reaches a provider.
pub fn validate_input(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(Error::Embedding("cannot embed empty input".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrong_dimension_is_rejected() {
        assert!(validate_dimension(&vec![0.0; EMBEDDING_DIMENSION]).is_ok());
        assert!(validate_dimension(&vec![0.0; 768]).is_err());
        assert!(validate_dimension(&[]).is_err());
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(validate_input("hello").is_ok());
        assert!(validate_input("   \n").is_err());
    }
}
