//! Semantic answer cache
//!
//! A trust-but-verify layer in front of the agents: canonical queries and
//! their answers are stored as Q&A snapshots in the raw collection, keyed by
//! the query embedding. A lookup returns the single most similar entry at or
//! above the similarity threshold (0.92 by default — near-paraphrase only).
//!
//! Hit bookkeeping (usage count, last-used timestamp) runs off the read
//! path; the caller never blocks on it. When the auto-tuner has disabled
//! the cache, the orchestrator skips lookups entirely.

use crate::constants::defaults;
use crate::error::Result;
use crate::storage::{Collection, SearchFilter, VectorStore};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Property value marking cache entries within the raw collection.
const SOURCE_TYPE_SNAPSHOT: &str = "qa_snapshot";

/// A semantic cache hit.
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub id: Uuid,
    pub canonical_query: String,
    pub answer_summary: String,
    pub original_agent: String,
    pub similarity: f32,
    pub usage_count: u64,
}

/// Vector-similarity answer cache over the raw collection.
pub struct SemanticCache {
    vectors: Arc<dyn VectorStore>,
    threshold: f32,
}

impl SemanticCache {
    #[must_use]
    pub fn new(vectors: Arc<dyn VectorStore>) -> Self {
        Self { vectors, threshold: defaults::SEMANTIC_CACHE_THRESHOLD }
    }

    /// Override the similarity threshold.
    #[must_use]
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Probe the cache with a query embedding.
    ///
    /// Returns the best entry at or above the threshold, or `None` on miss.
    /// Lookup failures degrade to a miss.
    pub async fn lookup(&self, query_vector: &[f32]) -> Option<CacheHit> {
        let filter = SearchFilter::new().with_equals("source_type", SOURCE_TYPE_SNAPSHOT);
        let hits = match self
            .vectors
            .near_vector(Collection::Raw, query_vector, 1, Some(filter))
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "semantic cache lookup failed; treating as miss");
                return None;
            }
        };

        let hit = hits.into_iter().next()?;
        let similarity = hit.similarity();
        if similarity < self.threshold {
            debug!(similarity, threshold = self.threshold, "semantic cache near-miss");
            return None;
        }

        let (canonical_query, answer_summary) =
            crate::retrieval::parse_qa(hit.properties["content"].as_str().unwrap_or_default());

        Some(CacheHit {
            id: hit.id,
            canonical_query,
            answer_summary,
            original_agent: hit.properties["agent"].as_str().unwrap_or_default().to_string(),
            similarity,
            usage_count: hit.properties["usage_count"].as_u64().unwrap_or(0),
        })
    }

    /// Store a fresh generation as a cache entry.
    pub async fn store(
        &self,
        query: &str,
        answer: &str,
        agent: &str,
        user_id: &str,
        query_vector: Vec<f32>,
    ) -> Result<Uuid> {
        let properties = json!({
            "content": format!("Q: {query}\nA: {answer}"),
            "content_hash": crate::crypto::content_hash(&format!("{query}\n{answer}")),
            "user_id": user_id,
            "source_type": SOURCE_TYPE_SNAPSHOT,
            "source_id": "",
            "agent": agent,
            "privacy_level": "INTERNAL",
            "tags": [],
            "usage_count": 0,
            "cost_savings": 0.0,
            "cost_usd": 0.0,
            "created_at": Utc::now().to_rfc3339(),
        });
        self.vectors.insert(Collection::Raw, query_vector, properties).await
    }

    /// Record a hit without blocking the read path.
    pub fn record_hit(&self, hit: &CacheHit) {
        let vectors = Arc::clone(&self.vectors);
        let id = hit.id;
        let next_count = hit.usage_count + 1;
        tokio::spawn(async move {
            let patch = json!({
                "usage_count": next_count,
                "last_used_at": Utc::now().to_rfc3339(),
            });
            if let Err(e) = vectors.update(Collection::Raw, id, None, Some(patch)).await {
                warn!(cache_id = %id, error = %e, "cache hit bookkeeping failed");
            }
        });
    }
}
