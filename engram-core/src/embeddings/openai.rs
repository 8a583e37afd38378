//! OpenAI-compatible embedding provider
//!
//! Works against the OpenAI embeddings endpoint or any API-compatible
//! gateway (set a custom base URL). Requires an API key and network access.

use super::{validate_dimension, validate_input, Embedding, EmbeddingProvider};
use crate::constants::defaults;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Embedding provider backed by the OpenAI embeddings API.
pub struct OpenAiEmbeddingProvider {
    api_key: String,
    model: String,
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
    model: &'a str,
    encoding_format: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAiEmbeddingProvider {
    /// Create a provider against the public OpenAI API.
    pub fn new(api_key: String, model: String) -> Result<Self> {
        Self::with_base_url(api_key, model, "https://api.openai.com/v1".to_string())
    }

    /// Create a provider against a custom API-compatible base URL.
    pub fn with_base_url(api_key: String, model: String, base_url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(defaults::EMBEDDING_TIMEOUT)
            .build()
            .map_err(|e| Error::Embedding(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { api_key, model, client, base_url })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        validate_input(text)?;
        let start = Instant::now();

        let url = format!("{}/embeddings", self.base_url);
        let request = EmbeddingRequest {
            input: text,
            model: &self.model,
            encoding_format: "float",
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Embedding(format!("embedding request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Embedding(format!("embedding API error {status}: {body}")));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("failed to parse embedding response: {e}")))?;

        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| Error::Embedding("embedding API returned no data".into()))?;

        validate_dimension(&vector)?;

        let latency_ms = start.elapsed().as_millis() as u64;
        tracing::debug!(
            model = %self.model,
            latency_ms,
            dimensions = vector.len(),
            "generated embedding"
        );

        Ok(Embedding { vector, model: self.model.clone(), latency_ms })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
