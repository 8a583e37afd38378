//! # Storage Abstraction
//!
//! Unified traits for the two persistence layers:
//!
//! - [`RelationalStore`] — the durable, canonical record of entities,
//!   conversations, metrics, feedback, audit rows and tokens.
//! - [`VectorStore`] — typed collections of embedding-indexed objects,
//!   subordinate to the relational rows and rebuildable from them.
//!
//! The two stores are *not* atomic across writes; the write path orders
//! vector-first / row-last on create so a failed create leaves no orphan
//! row, and a reconciliation sweep repairs orphan vectors.
//!
//! In-memory implementations back the test suite and serve as the fallback
//! when external storage is not configured.

pub mod memory;

pub use memory::{InMemoryRelationalStore, InMemoryVectorStore};

use crate::error::Result;
use crate::types::{
    AuditEvent, ConversationRecord, ConversationState, FeedbackRecord, FeedbackSummary,
    MemoryItem, MessageRecord, OAuthTokenRecord, QueryRecord, TuningLogRow, UserAccount,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

// ============================================================================
// Vector store
// ============================================================================

/// Vector store namespaces. Collections are created out-of-band and must
/// exist before first use; the adapter never deletes collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// All memory items and Q&A snapshots; primary search target.
    Raw,
    /// Distilled, intent-tagged facts. Written only by compaction and
    /// explicit extraction.
    Knowledge,
    /// Level-3 topic summaries.
    Topics,
    /// Level-4 cross-topic domain maps.
    Domains,
    /// Cross-source derived facts (email, calendar, financial, chat).
    Insights,
}

impl Collection {
    /// Collection name as the vector store knows it.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Raw => "Engram_Raw_v1",
            Self::Knowledge => "Engram_Knowledge_v2",
            Self::Topics => "Engram_Topics_v1",
            Self::Domains => "Engram_Domains_v1",
            Self::Insights => "Engram_Insights_v1",
        }
    }

    /// All collections, for startup assertion and reconciliation.
    #[must_use]
    pub fn all() -> [Self; 5] {
        [Self::Raw, Self::Knowledge, Self::Topics, Self::Domains, Self::Insights]
    }
}

/// Property-equality filter applied server-side to a near-vector search.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// `(property, value)` pairs; all must match.
    pub equals: Vec<(String, Value)>,
}

impl SearchFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality condition.
    #[must_use]
    pub fn with_equals(mut self, property: &str, value: impl Into<Value>) -> Self {
        self.equals.push((property.to_string(), value.into()));
        self
    }

    /// Whether a property map satisfies every condition.
    #[must_use]
    pub fn matches(&self, properties: &Value) -> bool {
        self.equals
            .iter()
            .all(|(key, expected)| properties.get(key) == Some(expected))
    }
}

/// One hit from a near-vector search.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: Uuid,
    /// Cosine distance in [0, 2]; similarity = `1 - distance`.
    pub distance: f32,
    pub properties: Value,
}

impl SearchHit {
    /// Convenience similarity accessor.
    #[must_use]
    pub fn similarity(&self) -> f32 {
        1.0 - self.distance
    }
}

/// A stored vector object.
#[derive(Debug, Clone)]
pub struct VectorObject {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub properties: Value,
}

/// Typed-collection vector store operations.
///
/// Inserts validate the embedding dimension and the property schema;
/// deletes are idempotent (missing object returns `false`).
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert a vector object; returns its new id.
    async fn insert(&self, collection: Collection, vector: Vec<f32>, properties: Value)
        -> Result<Uuid>;

    /// Update the vector and/or properties of an object.
    async fn update(
        &self,
        collection: Collection,
        id: Uuid,
        vector: Option<Vec<f32>>,
        properties: Option<Value>,
    ) -> Result<()>;

    /// Delete an object. Missing objects are a no-op returning `false`.
    async fn delete(&self, collection: Collection, id: Uuid) -> Result<bool>;

    /// Nearest-neighbor search by cosine distance, optionally filtered.
    async fn near_vector(
        &self,
        collection: Collection,
        query: &[f32],
        limit: usize,
        filter: Option<SearchFilter>,
    ) -> Result<Vec<SearchHit>>;

    /// Count objects in a collection.
    async fn count(&self, collection: Collection) -> Result<u64>;

    /// Fetch one object by id.
    async fn fetch_by_id(&self, collection: Collection, id: Uuid) -> Result<Option<VectorObject>>;

    /// List objects in a collection, optionally filtered. Used by the
    /// compaction engine and background sweeps; ordering is unspecified.
    async fn list(
        &self,
        collection: Collection,
        limit: usize,
        filter: Option<SearchFilter>,
    ) -> Result<Vec<VectorObject>>;
}

// ============================================================================
// Relational store
// ============================================================================

/// Aggregated rating statistics for the auto-tuner.
#[derive(Debug, Clone, PartialEq)]
pub struct RatingStats {
    pub avg_rating: f64,
    pub count: u64,
}

/// Per-model rating aggregate over a window.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRating {
    pub model: String,
    pub avg_rating: f64,
    pub count: u64,
}

/// Counts of context-size complaints in feedback comments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommentCounts {
    pub too_many: u64,
    pub too_few: u64,
    pub total: u64,
}

/// Durable record of entities, conversations, metrics, feedback and audit.
///
/// One short transaction per operation; concurrency control is the store's
/// row constraints (no application-level locks).
#[async_trait]
pub trait RelationalStore: Send + Sync {
    // ========== Users ==========

    async fn create_user(&self, user: &UserAccount) -> Result<()>;
    async fn get_user(&self, user_id: Uuid) -> Result<Option<UserAccount>>;

    /// Ids of all active users; drives per-user background jobs.
    async fn list_active_users(&self) -> Result<Vec<Uuid>>;

    /// Soft-activate or deactivate a user. Users are never deleted.
    async fn set_user_active(&self, user_id: Uuid, is_active: bool) -> Result<()>;

    // ========== Memory items ==========

    /// Insert a memory item. Returns `false` when the
    /// `(user_id, content_hash)` constraint rejects it as a duplicate.
    async fn insert_memory(&self, item: &MemoryItem) -> Result<bool>;

    async fn get_memory(&self, memory_id: Uuid) -> Result<Option<MemoryItem>>;

    /// Dedup probe by `(user, content_hash)`.
    async fn find_memory_by_hash(&self, user_id: Uuid, content_hash: &str)
        -> Result<Option<MemoryItem>>;

    /// Full-row update by id.
    async fn update_memory(&self, item: &MemoryItem) -> Result<()>;

    /// Delete a memory row. Missing rows return `false`.
    async fn delete_memory(&self, memory_id: Uuid) -> Result<bool>;

    /// List a user's memories, newest first.
    async fn list_memories(&self, user_id: Uuid, limit: usize, offset: usize)
        -> Result<Vec<MemoryItem>>;

    /// Memories carrying a tag, newest first.
    async fn search_memories_by_tag(&self, user_id: Uuid, tag: &str, limit: usize)
        -> Result<Vec<MemoryItem>>;

    /// Record an access: bump `access_count`, set `last_accessed`.
    async fn touch_memory(&self, memory_id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Every memory row, for background sweeps (decay, dedup, reconcile).
    async fn all_memories(&self, limit: usize) -> Result<Vec<MemoryItem>>;

    /// Write the denormalized feedback rollup onto an item.
    async fn update_feedback_summary(
        &self,
        memory_id: Uuid,
        summary: &FeedbackSummary,
    ) -> Result<()>;

    /// Write a recomputed composite score onto an item.
    async fn update_crs(&self, memory_id: Uuid, crs_score: f64) -> Result<()>;

    // ========== Conversations ==========

    async fn insert_conversation(&self, conversation: &ConversationRecord) -> Result<()>;

    async fn get_conversation(
        &self,
        tenant_id: &str,
        conversation_id: Uuid,
    ) -> Result<Option<ConversationRecord>>;

    async fn update_conversation_state(
        &self,
        tenant_id: &str,
        conversation_id: Uuid,
        state: &ConversationState,
        updated_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn list_conversations(
        &self,
        user_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ConversationRecord>>;

    async fn insert_message(&self, message: &MessageRecord) -> Result<()>;

    /// Idempotency probe on `(tenant, conversation, client_message_id)`.
    async fn find_message_by_client_id(
        &self,
        tenant_id: &str,
        conversation_id: Uuid,
        client_message_id: &str,
    ) -> Result<Option<MessageRecord>>;

    /// Messages in chronological order; `tail` keeps only the last N.
    async fn list_messages(
        &self,
        conversation_id: Uuid,
        tail: Option<usize>,
    ) -> Result<Vec<MessageRecord>>;

    async fn count_messages(&self, conversation_id: Uuid) -> Result<u64>;

    // ========== Query metrics ==========

    async fn insert_query(&self, record: &QueryRecord) -> Result<()>;
    async fn get_query(&self, query_id: Uuid) -> Result<Option<QueryRecord>>;
    async fn update_query(&self, record: &QueryRecord) -> Result<()>;

    /// Answered queries still awaiting knowledge extraction, oldest first.
    async fn list_pending_enrichment(&self, limit: usize) -> Result<Vec<QueryRecord>>;

    /// Move a query to a terminal enrichment status.
    async fn set_enrichment_status(&self, query_id: Uuid, status: &str) -> Result<()>;

    // ========== Feedback ==========

    async fn insert_feedback(&self, record: &FeedbackRecord) -> Result<()>;

    async fn list_feedback_for_query(&self, query_id: Uuid) -> Result<Vec<FeedbackRecord>>;

    /// Average rating of feedback whose `response_source` matches, since a
    /// cutoff. `None` when no matching rows exist.
    async fn avg_rating_by_source(
        &self,
        response_source: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<RatingStats>>;

    /// Per-model rating averages since a cutoff, models with at least
    /// `min_count` ratings, best first.
    async fn ratings_by_model(
        &self,
        since: DateTime<Utc>,
        min_count: u64,
    ) -> Result<Vec<ModelRating>>;

    /// Tally "too many" / "too few" phrases in feedback comments.
    async fn comment_counts(&self, since: DateTime<Utc>) -> Result<CommentCounts>;

    // ========== Audit ==========

    async fn insert_audit(&self, event: &AuditEvent) -> Result<()>;

    /// Most recent audit events, newest first.
    async fn list_audit(&self, limit: usize) -> Result<Vec<AuditEvent>>;

    // ========== OAuth tokens ==========

    async fn upsert_token(&self, record: &OAuthTokenRecord) -> Result<()>;

    async fn get_token(&self, provider: &str, user_id: Uuid) -> Result<Option<OAuthTokenRecord>>;

    /// Delete a token row. Missing rows return `false`.
    async fn delete_token(&self, provider: &str, user_id: Uuid) -> Result<bool>;

    // ========== Tuning log ==========

    async fn insert_tuning_decision(&self, row: &TuningLogRow) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn collection_names_are_distinct() {
        let names: std::collections::HashSet<_> =
            Collection::all().iter().map(|c| c.name()).collect();
        assert_eq!(names.len(), 5);
    }

    #[test]
    fn filter_requires_all_conditions() {
        let filter = SearchFilter::new()
            .with_equals("user_id", "u1")
            .with_equals("source_type", "memory_item");
        assert!(filter.matches(&json!({"user_id": "u1", "source_type": "memory_item", "x": 1})));
        assert!(!filter.matches(&json!({"user_id": "u1", "source_type": "qa_snapshot"})));
        assert!(!filter.matches(&json!({"user_id": "u2"})));
    }

    #[test]
    fn hit_similarity_is_one_minus_distance() {
        let hit = SearchHit { id: Uuid::new_v4(), distance: 0.08, properties: json!({}) };
        assert!((hit.similarity() - 0.92).abs() < 1e-6);
    }
}
