//! Memory write path
//!
//! Orchestrates hashing, privacy classification, encryption, embedding and
//! dual-store persistence for one memory item. The caller sees the create
//! as atomic: the relational row is written last, so a failed embed or
//! vector insert leaves no orphan row. The memory id is generated before
//! either insert, so the vector object carries its final `source_id` from
//! the start and no second-phase update exists.
//!
//! Orphan *vectors* from a crash between the two writes are possible; the
//! reconciliation sweep repairs them.

use crate::audit::AuditLogger;
use crate::crypto::{content_hash, EncryptionManager};
use crate::embeddings::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::privacy::PrivacyDetector;
use crate::scoring::{ContextScorer, ScoreInputs};
use crate::storage::{Collection, RelationalStore, VectorStore};
use crate::types::{
    MemoryItem, MemoryTier, PrivacyLevel, MAX_CONTENT_LEN, MAX_TAG_COUNT,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Patterns marking Q&A snapshot pollution in stored content.
const QA_POLLUTION_PREFIXES: &[(&str, &str)] = &[
    ("Q:", "A:"),
    ("User:", "Assistant:"),
    ("Query:", "Response:"),
    ("Question:", "Answer:"),
];

/// Request to create one memory item.
#[derive(Debug, Clone)]
pub struct CreateMemory {
    pub user_id: Uuid,
    pub content: String,
    pub tags: Vec<String>,
    /// Originating agent or surface (chatgpt, claude, gmail, ...).
    pub source: Option<String>,
    pub phase: Option<String>,
    pub tier: MemoryTier,
    /// Caller-supplied privacy wins over auto-detection.
    pub privacy_level: Option<PrivacyLevel>,
    pub auto_detect_privacy: bool,
    pub metadata: HashMap<String, Value>,
}

impl CreateMemory {
    /// Minimal create request with defaults.
    #[must_use]
    pub fn new(user_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            user_id,
            content: content.into(),
            tags: Vec::new(),
            source: None,
            phase: None,
            tier: MemoryTier::Short,
            privacy_level: None,
            auto_detect_privacy: true,
            metadata: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    #[must_use]
    pub fn with_tier(mut self, tier: MemoryTier) -> Self {
        self.tier = tier;
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    #[must_use]
    pub fn with_privacy(mut self, level: PrivacyLevel) -> Self {
        self.privacy_level = Some(level);
        self
    }
}

/// Partial update of a memory item.
#[derive(Debug, Clone, Default)]
pub struct UpdateMemory {
    /// New content triggers re-encryption and re-embedding.
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub tier: Option<MemoryTier>,
    pub phase: Option<String>,
    pub privacy_level: Option<PrivacyLevel>,
    pub metadata: Option<HashMap<String, Value>>,
}

/// Statistics from one reconciliation sweep.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileReport {
    pub scanned: usize,
    pub repaired: usize,
    pub errors: usize,
}

/// Statistics from one decay pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecayReport {
    pub scanned: usize,
    pub updated: usize,
    pub errors: usize,
}

/// High-level memory persistence service over both stores.
pub struct MemoryService {
    relational: Arc<dyn RelationalStore>,
    vectors: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    encryption: Arc<EncryptionManager>,
    privacy: PrivacyDetector,
    audit: AuditLogger,
}

impl MemoryService {
    #[must_use]
    pub fn new(
        relational: Arc<dyn RelationalStore>,
        vectors: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        encryption: Arc<EncryptionManager>,
        audit: AuditLogger,
    ) -> Self {
        Self {
            relational,
            vectors,
            embedder,
            encryption,
            privacy: PrivacyDetector::new(),
            audit,
        }
    }

    /// Create a memory item through the full pipeline.
    ///
    /// Returns `None` when `(user, content_hash)` already exists — a
    /// duplicate is not an error to the caller.
    pub async fn create(&self, request: CreateMemory) -> Result<Option<Uuid>> {
        if request.content.is_empty() || request.content.len() > MAX_CONTENT_LEN {
            return Err(Error::InvalidInput(format!(
                "content length must be 1..={MAX_CONTENT_LEN} bytes"
            )));
        }
        if request.tags.len() > MAX_TAG_COUNT {
            return Err(Error::InvalidInput(format!("at most {MAX_TAG_COUNT} tags allowed")));
        }

        let hash = content_hash(&request.content);

        if let Some(existing) =
            self.relational.find_memory_by_hash(request.user_id, &hash).await?
        {
            debug!(memory_id = %existing.memory_id, "duplicate content; skipping create");
            self.audit
                .log_ingress(
                    "memory",
                    "create_duplicate",
                    1,
                    existing.privacy_level.into(),
                    json!({"memory_id": existing.memory_id.to_string()}),
                )
                .await;
            return Ok(None);
        }

        let privacy_level = match request.privacy_level {
            Some(level) => level,
            None if request.auto_detect_privacy => {
                self.privacy.detect(&request.content, &request.tags)
            }
            None => PrivacyLevel::Internal,
        };

        let encrypted_content = self.encryption.encrypt_to_base64(&request.content)?;
        let embedding = self.embedder.embed(&request.content).await?;

        // Id first: the vector row gets its final source_id immediately.
        let memory_id = Uuid::new_v4();
        let now = Utc::now();

        let vector_properties = json!({
            "content": request.content.clone(),
            "content_hash": hash.clone(),
            "user_id": request.user_id.to_string(),
            "source_type": "memory_item",
            "source_id": memory_id.to_string(),
            "agent": request.source.clone().unwrap_or_else(|| "user".to_string()),
            "privacy_level": privacy_level.to_string(),
            "tags": request.tags.clone(),
            "cost_usd": 0.0,
            "created_at": now.to_rfc3339(),
        });
        let vector_id = self
            .vectors
            .insert(Collection::Raw, embedding.vector, vector_properties)
            .await?;

        let mut metadata = request.metadata;
        if let Some(source) = &request.source {
            metadata.insert("source".to_string(), json!(source));
        }
        if is_qa_pollution(&request.content) {
            metadata.insert("qa_pollution".to_string(), json!(true));
        }

        let item = MemoryItem {
            memory_id,
            user_id: request.user_id,
            content: request.content,
            content_hash: hash,
            encrypted_content,
            embedding_vector_id: Some(vector_id),
            tier: request.tier,
            phase: request.phase,
            tags: request.tags,
            privacy_level,
            crs_score: 0.0,
            access_count: 0,
            last_accessed: None,
            created_at: now,
            updated_at: now,
            metadata,
            feedback_summary: None,
            confidence_score: None,
            flagged: false,
            flagged_reason: None,
        };

        // Row last: a constraint loss here means another task won the race.
        if !self.relational.insert_memory(&item).await? {
            if let Err(e) = self.vectors.delete(Collection::Raw, vector_id).await {
                warn!(vector_id = %vector_id, error = %e, "failed to roll back vector for duplicate");
            }
            self.audit
                .log_ingress(
                    "memory",
                    "create_duplicate",
                    1,
                    privacy_level.into(),
                    json!({"content_hash": item.content_hash}),
                )
                .await;
            return Ok(None);
        }

        self.audit
            .log_transform(
                "memory",
                "create",
                "weaviate",
                1,
                privacy_level.into(),
                json!({
                    "memory_id": memory_id.to_string(),
                    "tier": item.tier.to_string(),
                    "content_length": item.content.len(),
                    "embedding_latency_ms": embedding.latency_ms,
                }),
            )
            .await;

        info!(memory_id = %memory_id, tier = %item.tier, privacy = %privacy_level, "memory created");
        Ok(Some(memory_id))
    }

    /// Fetch a memory, recording the access.
    pub async fn get(&self, memory_id: Uuid) -> Result<Option<MemoryItem>> {
        let Some(item) = self.relational.get_memory(memory_id).await? else {
            return Ok(None);
        };
        self.relational.touch_memory(memory_id, Utc::now()).await?;
        Ok(Some(item))
    }

    /// Update a memory. Content changes re-encrypt and re-embed; tag or
    /// privacy changes patch the vector's metadata only.
    pub async fn update(&self, memory_id: Uuid, update: UpdateMemory) -> Result<()> {
        let mut item = self
            .relational
            .get_memory(memory_id)
            .await?
            .ok_or(Error::NotFound(memory_id))?;

        let content_changed = update
            .content
            .as_ref()
            .is_some_and(|c| *c != item.content);

        if let Some(content) = update.content {
            if content.is_empty() || content.len() > MAX_CONTENT_LEN {
                return Err(Error::InvalidInput("invalid content length".into()));
            }
            item.content_hash = content_hash(&content);
            item.encrypted_content = self.encryption.encrypt_to_base64(&content)?;
            item.content = content;
        }
        if let Some(tags) = update.tags {
            item.tags = tags;
        }
        if let Some(tier) = update.tier {
            item.tier = tier;
        }
        if let Some(phase) = update.phase {
            item.phase = Some(phase);
        }
        if let Some(level) = update.privacy_level {
            item.privacy_level = level;
        }
        if let Some(metadata) = update.metadata {
            item.metadata = metadata;
        }
        item.updated_at = Utc::now();

        if let Some(vector_id) = item.embedding_vector_id {
            if content_changed {
                let embedding = self.embedder.embed(&item.content).await?;
                self.vectors
                    .update(
                        Collection::Raw,
                        vector_id,
                        Some(embedding.vector),
                        Some(json!({
                            "content": item.content.clone(),
                            "content_hash": item.content_hash.clone(),
                            "privacy_level": item.privacy_level.to_string(),
                            "tags": item.tags.clone(),
                        })),
                    )
                    .await?;
            } else {
                self.vectors
                    .update(
                        Collection::Raw,
                        vector_id,
                        None,
                        Some(json!({
                            "privacy_level": item.privacy_level.to_string(),
                            "tags": item.tags.clone(),
                        })),
                    )
                    .await?;
            }
        }

        self.relational.update_memory(&item).await?;

        self.audit
            .log_transform(
                "memory",
                if content_changed { "update_content" } else { "update_metadata" },
                "weaviate",
                1,
                item.privacy_level.into(),
                json!({"memory_id": memory_id.to_string()}),
            )
            .await;
        Ok(())
    }

    /// Delete a memory: vector first (missing is fine), then the row.
    pub async fn delete(&self, memory_id: Uuid) -> Result<bool> {
        let Some(item) = self.relational.get_memory(memory_id).await? else {
            return Ok(false);
        };

        if let Some(vector_id) = item.embedding_vector_id {
            match self.vectors.delete(Collection::Raw, vector_id).await {
                Ok(removed) => {
                    debug!(memory_id = %memory_id, vector_removed = removed, "vector delete");
                }
                Err(e) => {
                    warn!(memory_id = %memory_id, error = %e, "vector delete failed; removing row anyway");
                }
            }
        }

        let removed = self.relational.delete_memory(memory_id).await?;
        self.audit
            .log_transform(
                "memory",
                "delete",
                "weaviate",
                1,
                item.privacy_level.into(),
                json!({"memory_id": memory_id.to_string()}),
            )
            .await;
        Ok(removed)
    }

    /// List a user's memories, newest first.
    pub async fn list(&self, user_id: Uuid, limit: usize, offset: usize)
        -> Result<Vec<MemoryItem>> {
        self.relational.list_memories(user_id, limit, offset).await
    }

    /// Memories carrying a tag.
    pub async fn search_by_tag(&self, user_id: Uuid, tag: &str, limit: usize)
        -> Result<Vec<MemoryItem>> {
        self.relational.search_memories_by_tag(user_id, tag, limit).await
    }

    /// Repair memories whose vector object has gone missing by
    /// re-embedding and re-inserting.
    pub async fn reconcile_vectors(&self, batch: usize) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let items = match self.relational.all_memories(batch).await {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "reconciliation scan failed");
                report.errors += 1;
                return report;
            }
        };

        for mut item in items {
            let Some(vector_id) = item.embedding_vector_id else { continue };
            report.scanned += 1;

            let exists = match self.vectors.fetch_by_id(Collection::Raw, vector_id).await {
                Ok(found) => found.is_some(),
                Err(e) => {
                    warn!(memory_id = %item.memory_id, error = %e, "reconcile fetch failed");
                    report.errors += 1;
                    continue;
                }
            };
            if exists {
                continue;
            }

            match self.reinsert_vector(&item).await {
                Ok(new_id) => {
                    item.embedding_vector_id = Some(new_id);
                    item.updated_at = Utc::now();
                    if let Err(e) = self.relational.update_memory(&item).await {
                        warn!(memory_id = %item.memory_id, error = %e, "reconcile row update failed");
                        report.errors += 1;
                    } else {
                        report.repaired += 1;
                    }
                }
                Err(e) => {
                    warn!(memory_id = %item.memory_id, error = %e, "reconcile reinsert failed");
                    report.errors += 1;
                }
            }
        }

        info!(scanned = report.scanned, repaired = report.repaired, errors = report.errors,
            "vector reconciliation complete");
        report
    }

    async fn reinsert_vector(&self, item: &MemoryItem) -> Result<Uuid> {
        let embedding = self.embedder.embed(&item.content).await?;
        let properties = json!({
            "content": item.content.clone(),
            "content_hash": item.content_hash.clone(),
            "user_id": item.user_id.to_string(),
            "source_type": "memory_item",
            "source_id": item.memory_id.to_string(),
            "agent": item.metadata.get("source").and_then(Value::as_str).unwrap_or("user"),
            "privacy_level": item.privacy_level.to_string(),
            "tags": item.tags.clone(),
            "cost_usd": 0.0,
            "created_at": item.created_at.to_rfc3339(),
        });
        self.vectors.insert(Collection::Raw, embedding.vector, properties).await
    }

    /// Recompute stored composite scores so recency decay takes effect.
    ///
    /// Uses a neutral similarity of 0.5: the live query contributes the
    /// semantic component at search time, the stored score only orders
    /// maintenance decisions.
    pub async fn decay_scores(&self, scorer: &ContextScorer, batch: usize) -> DecayReport {
        let mut report = DecayReport::default();
        let items = match self.relational.all_memories(batch).await {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "decay scan failed");
                report.errors += 1;
                return report;
            }
        };

        let now = Utc::now();
        for item in items {
            report.scanned += 1;
            let score = scorer.score(
                &ScoreInputs {
                    similarity: 0.5,
                    created_at: item.created_at,
                    tier: item.tier,
                    feedback: item.feedback_summary.as_ref(),
                    access_count: item.access_count,
                },
                now,
            );
            if (score - item.crs_score).abs() < 1e-9 {
                continue;
            }
            if let Err(e) = self.relational.update_crs(item.memory_id, score).await {
                warn!(memory_id = %item.memory_id, error = %e, "decay update failed");
                report.errors += 1;
            } else {
                report.updated += 1;
            }
        }
        report
    }
}

/// Detect Q&A-format pollution so retrieval can down-rank snapshot noise.
fn is_qa_pollution(content: &str) -> bool {
    QA_POLLUTION_PREFIXES.iter().any(|(q, a)| {
        content.starts_with(q) && content.contains(a)
    })
}

/// Test fixtures shared across the crate's unit tests.
#[cfg(test)]
pub mod tests_support {
    use super::*;

    /// A bare memory item for storage-level tests.
    #[must_use]
    pub fn memory_item(user_id: Uuid, content: &str) -> MemoryItem {
        let now = Utc::now();
        MemoryItem {
            memory_id: Uuid::new_v4(),
            user_id,
            content: content.to_string(),
            content_hash: content_hash(content),
            encrypted_content: String::new(),
            embedding_vector_id: None,
            tier: MemoryTier::Short,
            phase: None,
            tags: Vec::new(),
            privacy_level: PrivacyLevel::Internal,
            crs_score: 0.0,
            access_count: 0,
            last_accessed: None,
            created_at: now,
            updated_at: now,
            metadata: HashMap::new(),
            feedback_summary: None,
            confidence_score: None,
            flagged: false,
            flagged_reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::MockEmbeddingProvider;
    use crate::storage::{InMemoryRelationalStore, InMemoryVectorStore};
    use crate::types::AuditKind;

    struct Fixture {
        service: MemoryService,
        relational: Arc<InMemoryRelationalStore>,
        vectors: Arc<InMemoryVectorStore>,
    }

    fn fixture() -> Fixture {
        let relational = Arc::new(InMemoryRelationalStore::new());
        let vectors = Arc::new(InMemoryVectorStore::new());
        let service = MemoryService::new(
            relational.clone(),
            vectors.clone(),
            Arc::new(MockEmbeddingProvider::new()),
            Arc::new(EncryptionManager::generate()),
            AuditLogger::new(relational.clone()),
        );
        Fixture { service, relational, vectors }
    }

    #[tokio::test]
    async fn create_stores_row_and_vector_with_matching_source_id() {
        let f = fixture();
        let user = Uuid::new_v4();

        let id = f
            .service
            .create(CreateMemory::new(user, "The capital of France is Paris."))
            .await
            .unwrap()
            .unwrap();

        let item = f.relational.get_memory(id).await.unwrap().unwrap();
        assert_eq!(item.content_hash, content_hash("The capital of France is Paris."));

        let vector_id = item.embedding_vector_id.unwrap();
        let object = f.vectors.fetch_by_id(Collection::Raw, vector_id).await.unwrap().unwrap();
        assert_eq!(object.properties["source_id"], id.to_string());
    }

    #[tokio::test]
    async fn duplicate_create_returns_none_without_side_effects() {
        let f = fixture();
        let user = Uuid::new_v4();

        let first = f
            .service
            .create(CreateMemory::new(user, "The capital of France is Paris."))
            .await
            .unwrap();
        assert!(first.is_some());

        let second = f
            .service
            .create(CreateMemory::new(user, "The capital of France is Paris."))
            .await
            .unwrap();
        assert!(second.is_none());

        assert_eq!(f.service.list(user, 10, 0).await.unwrap().len(), 1);
        assert_eq!(f.vectors.count(Collection::Raw).await.unwrap(), 1);

        // The duplicate left an ingress audit event.
        let events = f.relational.list_audit(10).await.unwrap();
        assert!(events
            .iter()
            .any(|e| e.kind == AuditKind::Ingress && e.operation == "create_duplicate"));
    }

    #[tokio::test]
    async fn privacy_is_auto_detected_when_unset() {
        let f = fixture();
        let user = Uuid::new_v4();

        let key_content = format!("My OpenAI key: sk-{}", "a".repeat(40));
        let id = f
            .service
            .create(CreateMemory::new(user, key_content))
            .await
            .unwrap()
            .unwrap();
        let item = f.relational.get_memory(id).await.unwrap().unwrap();
        assert_eq!(item.privacy_level, PrivacyLevel::LocalOnly);

        let doc = "# Python Tutorial\n\n## Intro\n```py\nprint()\n```";
        let id = f
            .service
            .create(CreateMemory::new(user, doc).with_tags(vec!["tutorial".into()]))
            .await
            .unwrap()
            .unwrap();
        let item = f.relational.get_memory(id).await.unwrap().unwrap();
        assert_eq!(item.privacy_level, PrivacyLevel::Public);

        let chat = "Had a chat with ChatGPT about coding";
        let id = f
            .service
            .create(CreateMemory::new(user, chat).with_tags(vec!["chatgpt".into()]))
            .await
            .unwrap()
            .unwrap();
        let item = f.relational.get_memory(id).await.unwrap().unwrap();
        assert_eq!(item.privacy_level, PrivacyLevel::Internal);
    }

    #[tokio::test]
    async fn caller_supplied_privacy_wins() {
        let f = fixture();
        let user = Uuid::new_v4();
        let id = f
            .service
            .create(
                CreateMemory::new(user, "ordinary note").with_privacy(PrivacyLevel::Confidential),
            )
            .await
            .unwrap()
            .unwrap();
        let item = f.relational.get_memory(id).await.unwrap().unwrap();
        assert_eq!(item.privacy_level, PrivacyLevel::Confidential);
    }

    #[tokio::test]
    async fn stored_ciphertext_decrypts_to_content() {
        let relational = Arc::new(InMemoryRelationalStore::new());
        let vectors = Arc::new(InMemoryVectorStore::new());
        let encryption = Arc::new(EncryptionManager::generate());
        let service = MemoryService::new(
            relational.clone(),
            vectors,
            Arc::new(MockEmbeddingProvider::new()),
            encryption.clone(),
            AuditLogger::new(relational.clone()),
        );

        let id = service
            .create(CreateMemory::new(Uuid::new_v4(), "secret plans"))
            .await
            .unwrap()
            .unwrap();
        let item = relational.get_memory(id).await.unwrap().unwrap();
        assert_eq!(encryption.decrypt_from_base64(&item.encrypted_content).unwrap(), "secret plans");
    }

    #[tokio::test]
    async fn content_update_reembeds_and_rehashes() {
        let f = fixture();
        let user = Uuid::new_v4();
        let id = f
            .service
            .create(CreateMemory::new(user, "old content"))
            .await
            .unwrap()
            .unwrap();

        f.service
            .update(id, UpdateMemory { content: Some("new content".into()), ..Default::default() })
            .await
            .unwrap();

        let item = f.relational.get_memory(id).await.unwrap().unwrap();
        assert_eq!(item.content, "new content");
        assert_eq!(item.content_hash, content_hash("new content"));

        let object = f
            .vectors
            .fetch_by_id(Collection::Raw, item.embedding_vector_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(object.properties["content"], "new content");
    }

    #[tokio::test]
    async fn delete_removes_vector_then_row() {
        let f = fixture();
        let user = Uuid::new_v4();
        let id = f
            .service
            .create(CreateMemory::new(user, "to be deleted"))
            .await
            .unwrap()
            .unwrap();

        assert!(f.service.delete(id).await.unwrap());
        assert!(f.relational.get_memory(id).await.unwrap().is_none());
        assert_eq!(f.vectors.count(Collection::Raw).await.unwrap(), 0);
        // Re-delete: the row is gone, report false.
        assert!(!f.service.delete(id).await.unwrap());
    }

    #[tokio::test]
    async fn get_records_access() {
        let f = fixture();
        let user = Uuid::new_v4();
        let id = f
            .service
            .create(CreateMemory::new(user, "accessed"))
            .await
            .unwrap()
            .unwrap();

        f.service.get(id).await.unwrap().unwrap();
        f.service.get(id).await.unwrap().unwrap();
        let item = f.relational.get_memory(id).await.unwrap().unwrap();
        assert_eq!(item.access_count, 2);
        assert!(item.last_accessed.is_some());
    }

    #[tokio::test]
    async fn reconcile_repairs_missing_vectors() {
        let f = fixture();
        let user = Uuid::new_v4();
        let id = f
            .service
            .create(CreateMemory::new(user, "will lose its vector"))
            .await
            .unwrap()
            .unwrap();

        let item = f.relational.get_memory(id).await.unwrap().unwrap();
        f.vectors
            .delete(Collection::Raw, item.embedding_vector_id.unwrap())
            .await
            .unwrap();

        let report = f.service.reconcile_vectors(100).await;
        assert_eq!(report.repaired, 1);

        let item = f.relational.get_memory(id).await.unwrap().unwrap();
        let object = f
            .vectors
            .fetch_by_id(Collection::Raw, item.embedding_vector_id.unwrap())
            .await
            .unwrap();
        assert!(object.is_some());
    }

    #[tokio::test]
    async fn qa_pollution_is_flagged_in_metadata() {
        let f = fixture();
        let user = Uuid::new_v4();
        let id = f
            .service
            .create(CreateMemory::new(user, "Q: what?\nA: that."))
            .await
            .unwrap()
            .unwrap();
        let item = f.relational.get_memory(id).await.unwrap().unwrap();
        assert_eq!(item.metadata.get("qa_pollution"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn search_by_tag_matches_exactly() {
        let f = fixture();
        let user = Uuid::new_v4();
        f.service
            .create(CreateMemory::new(user, "tagged note").with_tags(vec!["rust".into()]))
            .await
            .unwrap();
        f.service
            .create(CreateMemory::new(user, "other note").with_tags(vec!["python".into()]))
            .await
            .unwrap();

        let hits = f.service.search_by_tag(user, "rust", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "tagged note");
    }

    #[test]
    fn qa_pollution_detector_matches_known_shapes() {
        assert!(is_qa_pollution("Q: a question\nA: an answer"));
        assert!(is_qa_pollution("User: hi\nAssistant: hello"));
        assert!(!is_qa_pollution("plain prose mentioning Q: inline"));
        assert!(!is_qa_pollution("regular note"));
    }
}
