//! Dual memory retrieval
//!
//! Runs two near-vector searches concurrently — raw Q&A snapshots and
//! distilled knowledge — and joins on both. Each leg over-fetches
//! (`2 × limit`), filters to its similarity threshold, sorts descending and
//! truncates. A failed leg degrades to an empty list; retrieval never
//! raises to the caller.

use crate::constants::defaults;
use crate::storage::{Collection, SearchFilter, SearchHit, VectorStore};
use crate::types::PrivacyLevel;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Thresholds and limits for one dual search.
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub raw_limit: usize,
    pub knowledge_limit: usize,
    pub raw_threshold: f32,
    pub knowledge_threshold: f32,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            raw_limit: defaults::RAW_SEARCH_LIMIT,
            knowledge_limit: defaults::KNOWLEDGE_SEARCH_LIMIT,
            raw_threshold: defaults::RAW_SIMILARITY_THRESHOLD,
            knowledge_threshold: defaults::KNOWLEDGE_SIMILARITY_THRESHOLD,
        }
    }
}

/// A hit from the raw Q&A collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawHit {
    pub id: Uuid,
    /// Question text when the content carried `"Q: ...\nA: ..."` format,
    /// otherwise the full content.
    pub canonical_query: String,
    /// Answer text when the Q&A format was present.
    pub summarized_answer: String,
    pub original_agent: String,
    /// Relational row backing this vector, when one exists.
    pub source_id: Option<Uuid>,
    pub privacy_level: PrivacyLevel,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    pub distance: f32,
    pub similarity: f32,
}

/// A hit from the distilled knowledge collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeHit {
    pub id: Uuid,
    /// Canonical query and answer summary, joined.
    pub content: String,
    pub extraction_confidence: f64,
    pub related_topics: Vec<String>,
    pub topic_cluster: String,
    pub primary_intent: String,
    pub distance: f32,
    pub similarity: f32,
}

/// Parallel retriever over the raw and knowledge collections.
pub struct DualRetriever {
    vectors: Arc<dyn VectorStore>,
}

impl DualRetriever {
    #[must_use]
    pub fn new(vectors: Arc<dyn VectorStore>) -> Self {
        Self { vectors }
    }

    /// Search both collections concurrently.
    ///
    /// `user_id` scopes the knowledge leg; raw snapshots are shared within
    /// the tenant and searched unscoped.
    pub async fn search(
        &self,
        query_vector: &[f32],
        user_id: &str,
        params: &SearchParams,
    ) -> (Vec<RawHit>, Vec<KnowledgeHit>) {
        let (raw, knowledge) = tokio::join!(
            self.search_raw(query_vector, params.raw_limit, params.raw_threshold),
            self.search_knowledge(
                query_vector,
                user_id,
                params.knowledge_limit,
                params.knowledge_threshold
            ),
        );
        debug!(
            raw_hits = raw.len(),
            knowledge_hits = knowledge.len(),
            "dual retrieval complete"
        );
        (raw, knowledge)
    }

    async fn search_raw(&self, query_vector: &[f32], limit: usize, threshold: f32) -> Vec<RawHit> {
        let result = self
            .vectors
            .near_vector(Collection::Raw, query_vector, limit * 2, None)
            .await;

        let hits = match result {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "raw search failed; degrading to empty");
                return Vec::new();
            }
        };

        let mut filtered: Vec<RawHit> = hits
            .into_iter()
            .filter(|h| h.similarity() >= threshold)
            .map(|h| parse_raw_hit(&h))
            .collect();
        filtered.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        filtered.truncate(limit);
        filtered
    }

    /// Search the cross-source insights collection (email, calendar,
    /// financial, chat). Only runs when the caller opted in; failures
    /// degrade to empty like the other legs.
    pub async fn search_insights(
        &self,
        query_vector: &[f32],
        user_id: &str,
        limit: usize,
        threshold: f32,
    ) -> Vec<KnowledgeHit> {
        let filter = if user_id.is_empty() {
            None
        } else {
            Some(SearchFilter::new().with_equals("user_id", user_id))
        };

        let result = self
            .vectors
            .near_vector(Collection::Insights, query_vector, limit * 2, filter)
            .await;

        let hits = match result {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "insight search failed; degrading to empty");
                return Vec::new();
            }
        };

        let mut filtered: Vec<KnowledgeHit> = hits
            .into_iter()
            .filter(|h| h.similarity() >= threshold)
            .map(|h| parse_insight_hit(&h))
            .collect();
        filtered.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        filtered.truncate(limit);
        filtered
    }

    async fn search_knowledge(
        &self,
        query_vector: &[f32],
        user_id: &str,
        limit: usize,
        threshold: f32,
    ) -> Vec<KnowledgeHit> {
        let filter = if user_id.is_empty() {
            None
        } else {
            Some(SearchFilter::new().with_equals("user_id", user_id))
        };

        let result = self
            .vectors
            .near_vector(Collection::Knowledge, query_vector, limit * 2, filter)
            .await;

        let hits = match result {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "knowledge search failed; degrading to empty");
                return Vec::new();
            }
        };

        let mut filtered: Vec<KnowledgeHit> = hits
            .into_iter()
            .filter(|h| h.similarity() >= threshold)
            .map(|h| parse_knowledge_hit(&h))
            .collect();
        filtered.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        filtered.truncate(limit);
        filtered
    }
}

/// Decode `"Q: ...\nA: ..."` content into its parts; other content passes
/// through as the canonical query with an empty answer.
fn parse_raw_hit(hit: &SearchHit) -> RawHit {
    let content = hit.properties["content"].as_str().unwrap_or_default();
    let agent = hit.properties["agent"].as_str().unwrap_or_default();

    let (canonical_query, summarized_answer) = parse_qa(content);

    RawHit {
        id: hit.id,
        canonical_query,
        summarized_answer,
        original_agent: agent.to_string(),
        source_id: hit.properties["source_id"]
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok()),
        privacy_level: hit.properties["privacy_level"]
            .as_str()
            .and_then(PrivacyLevel::parse)
            .unwrap_or_default(),
        created_at: hit.properties["created_at"]
            .as_str()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc)),
        distance: hit.distance,
        similarity: hit.similarity(),
    }
}

/// Split Q&A-formatted content; truncate to keep prompt blocks bounded.
#[must_use]
pub fn parse_qa(content: &str) -> (String, String) {
    if content.contains("Q:") && content.contains("A:") {
        if let Some((question, answer)) = content.split_once("A:") {
            let q = question.replace("Q:", "");
            let q = q.trim();
            let a = answer.trim();
            return (truncate(q, 500), truncate(a, 2000));
        }
    }
    (content.to_string(), String::new())
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s[..end].to_string()
    }
}

/// Insight objects carry display text and a source label instead of the
/// canonical-query/answer pair.
fn parse_insight_hit(hit: &SearchHit) -> KnowledgeHit {
    let props = &hit.properties;
    KnowledgeHit {
        id: hit.id,
        content: props["insight_text"].as_str().unwrap_or_default().to_string(),
        extraction_confidence: props["confidence_score"].as_f64().unwrap_or(0.0),
        related_topics: Vec::new(),
        topic_cluster: props["source"].as_str().unwrap_or("insight").to_string(),
        primary_intent: props["insight_type"].as_str().unwrap_or_default().to_string(),
        distance: hit.distance,
        similarity: hit.similarity(),
    }
}

fn parse_knowledge_hit(hit: &SearchHit) -> KnowledgeHit {
    let props = &hit.properties;
    let canonical = props["canonical_query"].as_str().unwrap_or_default();
    let summary = props["answer_summary"].as_str().unwrap_or_default();
    let related_topics = props["related_topics"]
        .as_array()
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();

    KnowledgeHit {
        id: hit.id,
        content: format!("{canonical}\n{summary}"),
        extraction_confidence: props["extraction_confidence"].as_f64().unwrap_or(0.0),
        related_topics,
        topic_cluster: props["topic_cluster"].as_str().unwrap_or_default().to_string(),
        primary_intent: props["primary_intent"].as_str().unwrap_or_default().to_string(),
        distance: hit.distance,
        similarity: hit.similarity(),
    }
}
