//! In-memory storage backends
//!
//! Brute-force, lock-protected implementations of [`RelationalStore`] and
//! [`VectorStore`]. They back the test suite and act as the fallback when
//! no external store is configured. Semantics match the external adapters:
//! unique constraints, idempotent deletes, cosine distances.

use super::{
    Collection, CommentCounts, ModelRating, RatingStats, RelationalStore, SearchFilter,
    SearchHit, VectorObject, VectorStore,
};
use crate::embeddings::similarity::cosine_distance;
use crate::embeddings::validate_dimension;
use crate::error::{Error, Result};
use crate::types::{
    AuditEvent, ConversationRecord, ConversationState, FeedbackRecord, FeedbackSummary,
    MemoryItem, MessageRecord, OAuthTokenRecord, QueryRecord, TuningLogRow, UserAccount,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

// ============================================================================
// Vector store
// ============================================================================

#[derive(Default)]
struct VectorInner {
    collections: HashMap<&'static str, HashMap<Uuid, (Vec<f32>, Value)>>,
}

/// Brute-force in-memory vector store.
#[derive(Default)]
pub struct InMemoryVectorStore {
    inner: RwLock<VectorInner>,
}

impl InMemoryVectorStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn insert(
        &self,
        collection: Collection,
        vector: Vec<f32>,
        properties: Value,
    ) -> Result<Uuid> {
        validate_dimension(&vector).map_err(|e| Error::VectorStore(e.to_string()))?;
        let id = Uuid::new_v4();
        let mut inner = self.inner.write().await;
        inner
            .collections
            .entry(collection.name())
            .or_default()
            .insert(id, (vector, properties));
        Ok(id)
    }

    async fn update(
        &self,
        collection: Collection,
        id: Uuid,
        vector: Option<Vec<f32>>,
        properties: Option<Value>,
    ) -> Result<()> {
        if let Some(v) = &vector {
            validate_dimension(v).map_err(|e| Error::VectorStore(e.to_string()))?;
        }
        let mut inner = self.inner.write().await;
        let entry = inner
            .collections
            .entry(collection.name())
            .or_default()
            .get_mut(&id)
            .ok_or(Error::NotFound(id))?;
        if let Some(v) = vector {
            entry.0 = v;
        }
        if let Some(props) = properties {
            match (&mut entry.1, props) {
                // Partial updates merge into the existing property map.
                (Value::Object(existing), Value::Object(incoming)) => {
                    for (k, v) in incoming {
                        existing.insert(k, v);
                    }
                }
                (slot, props) => *slot = props,
            }
        }
        Ok(())
    }

    async fn delete(&self, collection: Collection, id: Uuid) -> Result<bool> {
        let mut inner = self.inner.write().await;
        Ok(inner
            .collections
            .entry(collection.name())
            .or_default()
            .remove(&id)
            .is_some())
    }

    async fn near_vector(
        &self,
        collection: Collection,
        query: &[f32],
        limit: usize,
        filter: Option<SearchFilter>,
    ) -> Result<Vec<SearchHit>> {
        let inner = self.inner.read().await;
        let Some(objects) = inner.collections.get(collection.name()) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<SearchHit> = objects
            .iter()
            .filter(|(_, (_, props))| filter.as_ref().map_or(true, |f| f.matches(props)))
            .map(|(id, (vector, props))| SearchHit {
                id: *id,
                distance: cosine_distance(query, vector),
                properties: props.clone(),
            })
            .collect();

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn count(&self, collection: Collection) -> Result<u64> {
        let inner = self.inner.read().await;
        Ok(inner
            .collections
            .get(collection.name())
            .map_or(0, |c| c.len() as u64))
    }

    async fn fetch_by_id(&self, collection: Collection, id: Uuid) -> Result<Option<VectorObject>> {
        let inner = self.inner.read().await;
        Ok(inner
            .collections
            .get(collection.name())
            .and_then(|c| c.get(&id))
            .map(|(vector, props)| VectorObject {
                id,
                vector: vector.clone(),
                properties: props.clone(),
            }))
    }

    async fn list(
        &self,
        collection: Collection,
        limit: usize,
        filter: Option<SearchFilter>,
    ) -> Result<Vec<VectorObject>> {
        let inner = self.inner.read().await;
        let Some(objects) = inner.collections.get(collection.name()) else {
            return Ok(Vec::new());
        };
        Ok(objects
            .iter()
            .filter(|(_, (_, props))| filter.as_ref().map_or(true, |f| f.matches(props)))
            .take(limit)
            .map(|(id, (vector, props))| VectorObject {
                id: *id,
                vector: vector.clone(),
                properties: props.clone(),
            })
            .collect())
    }
}

// ============================================================================
// Relational store
// ============================================================================

#[derive(Default)]
struct RelationalInner {
    users: HashMap<Uuid, UserAccount>,
    memories: HashMap<Uuid, MemoryItem>,
    conversations: HashMap<Uuid, ConversationRecord>,
    messages: Vec<MessageRecord>,
    queries: HashMap<Uuid, QueryRecord>,
    feedback: Vec<FeedbackRecord>,
    audit: Vec<AuditEvent>,
    tokens: HashMap<(String, Uuid), OAuthTokenRecord>,
    tuning_log: Vec<TuningLogRow>,
}

/// In-memory relational store with the same constraints as the SQL adapter.
#[derive(Default)]
pub struct InMemoryRelationalStore {
    inner: RwLock<RelationalInner>,
}

impl InMemoryRelationalStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RelationalStore for InMemoryRelationalStore {
    async fn create_user(&self, user: &UserAccount) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.users.insert(user.user_id, user.clone());
        Ok(())
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<UserAccount>> {
        Ok(self.inner.read().await.users.get(&user_id).cloned())
    }

    async fn list_active_users(&self) -> Result<Vec<Uuid>> {
        Ok(self
            .inner
            .read()
            .await
            .users
            .values()
            .filter(|u| u.is_active)
            .map(|u| u.user_id)
            .collect())
    }

    async fn set_user_active(&self, user_id: Uuid, is_active: bool) -> Result<()> {
        let mut inner = self.inner.write().await;
        let user = inner.users.get_mut(&user_id).ok_or(Error::NotFound(user_id))?;
        user.is_active = is_active;
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_memory(&self, item: &MemoryItem) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let duplicate = inner
            .memories
            .values()
            .any(|m| m.user_id == item.user_id && m.content_hash == item.content_hash);
        if duplicate {
            return Ok(false);
        }
        inner.memories.insert(item.memory_id, item.clone());
        Ok(true)
    }

    async fn get_memory(&self, memory_id: Uuid) -> Result<Option<MemoryItem>> {
        Ok(self.inner.read().await.memories.get(&memory_id).cloned())
    }

    async fn find_memory_by_hash(
        &self,
        user_id: Uuid,
        content_hash: &str,
    ) -> Result<Option<MemoryItem>> {
        Ok(self
            .inner
            .read()
            .await
            .memories
            .values()
            .find(|m| m.user_id == user_id && m.content_hash == content_hash)
            .cloned())
    }

    async fn update_memory(&self, item: &MemoryItem) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.memories.contains_key(&item.memory_id) {
            return Err(Error::NotFound(item.memory_id));
        }
        inner.memories.insert(item.memory_id, item.clone());
        Ok(())
    }

    async fn delete_memory(&self, memory_id: Uuid) -> Result<bool> {
        Ok(self.inner.write().await.memories.remove(&memory_id).is_some())
    }

    async fn list_memories(
        &self,
        user_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MemoryItem>> {
        let inner = self.inner.read().await;
        let mut items: Vec<MemoryItem> = inner
            .memories
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items.into_iter().skip(offset).take(limit).collect())
    }

    async fn search_memories_by_tag(
        &self,
        user_id: Uuid,
        tag: &str,
        limit: usize,
    ) -> Result<Vec<MemoryItem>> {
        let inner = self.inner.read().await;
        let mut items: Vec<MemoryItem> = inner
            .memories
            .values()
            .filter(|m| m.user_id == user_id && m.tags.iter().any(|t| t == tag))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items.truncate(limit);
        Ok(items)
    }

    async fn touch_memory(&self, memory_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.write().await;
        let item = inner
            .memories
            .get_mut(&memory_id)
            .ok_or(Error::NotFound(memory_id))?;
        item.access_count += 1;
        item.last_accessed = Some(at);
        Ok(())
    }

    async fn all_memories(&self, limit: usize) -> Result<Vec<MemoryItem>> {
        let inner = self.inner.read().await;
        let mut items: Vec<MemoryItem> = inner.memories.values().cloned().collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        items.truncate(limit);
        Ok(items)
    }

    async fn update_feedback_summary(
        &self,
        memory_id: Uuid,
        summary: &FeedbackSummary,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let item = inner
            .memories
            .get_mut(&memory_id)
            .ok_or(Error::NotFound(memory_id))?;
        item.feedback_summary = Some(summary.clone());
        item.updated_at = Utc::now();
        Ok(())
    }

    async fn update_crs(&self, memory_id: Uuid, crs_score: f64) -> Result<()> {
        let mut inner = self.inner.write().await;
        let item = inner
            .memories
            .get_mut(&memory_id)
            .ok_or(Error::NotFound(memory_id))?;
        item.crs_score = crs_score;
        item.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_conversation(&self, conversation: &ConversationRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .conversations
            .insert(conversation.conversation_id, conversation.clone());
        Ok(())
    }

    async fn get_conversation(
        &self,
        tenant_id: &str,
        conversation_id: Uuid,
    ) -> Result<Option<ConversationRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .conversations
            .get(&conversation_id)
            .filter(|c| c.tenant_id == tenant_id)
            .cloned())
    }

    async fn update_conversation_state(
        &self,
        tenant_id: &str,
        conversation_id: Uuid,
        state: &ConversationState,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let conversation = inner
            .conversations
            .get_mut(&conversation_id)
            .filter(|c| c.tenant_id == tenant_id)
            .ok_or(Error::NotFound(conversation_id))?;
        conversation.state = state.clone();
        conversation.updated_at = updated_at;
        Ok(())
    }

    async fn list_conversations(
        &self,
        user_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ConversationRecord>> {
        let inner = self.inner.read().await;
        let mut items: Vec<ConversationRecord> = inner
            .conversations
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(items.into_iter().skip(offset).take(limit).collect())
    }

    async fn insert_message(&self, message: &MessageRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(client_id) = &message.client_message_id {
            let exists = inner.messages.iter().any(|m| {
                m.tenant_id == message.tenant_id
                    && m.conversation_id == message.conversation_id
                    && m.client_message_id.as_deref() == Some(client_id)
            });
            if exists {
                return Err(Error::Storage(format!(
                    "unique constraint: message with client id {client_id} already exists"
                )));
            }
        }
        inner.messages.push(message.clone());
        Ok(())
    }

    async fn find_message_by_client_id(
        &self,
        tenant_id: &str,
        conversation_id: Uuid,
        client_message_id: &str,
    ) -> Result<Option<MessageRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .messages
            .iter()
            .find(|m| {
                m.tenant_id == tenant_id
                    && m.conversation_id == conversation_id
                    && m.client_message_id.as_deref() == Some(client_message_id)
            })
            .cloned())
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        tail: Option<usize>,
    ) -> Result<Vec<MessageRecord>> {
        let inner = self.inner.read().await;
        let mut messages: Vec<MessageRecord> = inner
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        if let Some(tail) = tail {
            let len = messages.len();
            if len > tail {
                messages.drain(0..len - tail);
            }
        }
        Ok(messages)
    }

    async fn count_messages(&self, conversation_id: Uuid) -> Result<u64> {
        Ok(self
            .inner
            .read()
            .await
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .count() as u64)
    }

    async fn insert_query(&self, record: &QueryRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.queries.insert(record.query_id, record.clone());
        Ok(())
    }

    async fn get_query(&self, query_id: Uuid) -> Result<Option<QueryRecord>> {
        Ok(self.inner.read().await.queries.get(&query_id).cloned())
    }

    async fn update_query(&self, record: &QueryRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.queries.contains_key(&record.query_id) {
            return Err(Error::NotFound(record.query_id));
        }
        inner.queries.insert(record.query_id, record.clone());
        Ok(())
    }

    async fn list_pending_enrichment(&self, limit: usize) -> Result<Vec<QueryRecord>> {
        let inner = self.inner.read().await;
        let mut pending: Vec<QueryRecord> = inner
            .queries
            .values()
            .filter(|q| q.enrichment_status == "pending" && q.response_source == "fresh_generation")
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn set_enrichment_status(&self, query_id: Uuid, status: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let query = inner.queries.get_mut(&query_id).ok_or(Error::NotFound(query_id))?;
        query.enrichment_status = status.to_string();
        Ok(())
    }

    async fn insert_feedback(&self, record: &FeedbackRecord) -> Result<()> {
        self.inner.write().await.feedback.push(record.clone());
        Ok(())
    }

    async fn list_feedback_for_query(&self, query_id: Uuid) -> Result<Vec<FeedbackRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .feedback
            .iter()
            .filter(|f| f.query_id == query_id)
            .cloned()
            .collect())
    }

    async fn avg_rating_by_source(
        &self,
        response_source: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<RatingStats>> {
        let inner = self.inner.read().await;
        let ratings: Vec<f64> = inner
            .feedback
            .iter()
            .filter(|f| {
                f.created_at >= since && f.response_source.as_deref() == Some(response_source)
            })
            .map(|f| f64::from(f.rating))
            .collect();
        if ratings.is_empty() {
            return Ok(None);
        }
        let count = ratings.len() as u64;
        let avg_rating = ratings.iter().sum::<f64>() / count as f64;
        Ok(Some(RatingStats { avg_rating, count }))
    }

    async fn ratings_by_model(
        &self,
        since: DateTime<Utc>,
        min_count: u64,
    ) -> Result<Vec<ModelRating>> {
        let inner = self.inner.read().await;
        let mut by_model: HashMap<String, (f64, u64)> = HashMap::new();
        for feedback in inner.feedback.iter().filter(|f| f.created_at >= since) {
            let Some(query) = inner.queries.get(&feedback.query_id) else { continue };
            let Some(model) = &query.agent_used else { continue };
            let slot = by_model.entry(model.clone()).or_insert((0.0, 0));
            slot.0 += f64::from(feedback.rating);
            slot.1 += 1;
        }
        let mut ratings: Vec<ModelRating> = by_model
            .into_iter()
            .filter(|(_, (_, n))| *n >= min_count)
            .map(|(model, (sum, n))| ModelRating {
                model,
                avg_rating: sum / n as f64,
                count: n,
            })
            .collect();
        ratings.sort_by(|a, b| b.avg_rating.total_cmp(&a.avg_rating));
        Ok(ratings)
    }

    async fn comment_counts(&self, since: DateTime<Utc>) -> Result<CommentCounts> {
        let inner = self.inner.read().await;
        let mut counts = CommentCounts::default();
        for feedback in inner.feedback.iter().filter(|f| f.created_at >= since) {
            let Some(comment) = &feedback.comment else { continue };
            counts.total += 1;
            let lower = comment.to_lowercase();
            if lower.contains("too many") {
                counts.too_many += 1;
            }
            if lower.contains("too few") {
                counts.too_few += 1;
            }
        }
        Ok(counts)
    }

    async fn insert_audit(&self, event: &AuditEvent) -> Result<()> {
        self.inner.write().await.audit.push(event.clone());
        Ok(())
    }

    async fn list_audit(&self, limit: usize) -> Result<Vec<AuditEvent>> {
        let inner = self.inner.read().await;
        Ok(inner.audit.iter().rev().take(limit).cloned().collect())
    }

    async fn upsert_token(&self, record: &OAuthTokenRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .tokens
            .insert((record.provider.clone(), record.user_id), record.clone());
        Ok(())
    }

    async fn get_token(&self, provider: &str, user_id: Uuid) -> Result<Option<OAuthTokenRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .tokens
            .get(&(provider.to_string(), user_id))
            .cloned())
    }

    async fn delete_token(&self, provider: &str, user_id: Uuid) -> Result<bool> {
        Ok(self
            .inner
            .write()
            .await
            .tokens
            .remove(&(provider.to_string(), user_id))
            .is_some())
    }

    async fn insert_tuning_decision(&self, row: &TuningLogRow) -> Result<()> {
        self.inner.write().await.tuning_log.push(row.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::defaults::EMBEDDING_DIMENSION;
    use serde_json::json;

    fn unit_vector(index: usize) -> Vec<f32> {
        let mut v = vec![0.0; EMBEDDING_DIMENSION];
        v[index] = 1.0;
        v
    }

    #[tokio::test]
    async fn near_vector_orders_by_distance() {
        let store = InMemoryVectorStore::new();
        let close = unit_vector(0);
        let mut near = unit_vector(0);
        near[1] = 0.5;
        let far = unit_vector(2);

        store.insert(Collection::Raw, far, json!({"label": "far"})).await.unwrap();
        store.insert(Collection::Raw, near, json!({"label": "near"})).await.unwrap();
        store.insert(Collection::Raw, close.clone(), json!({"label": "close"})).await.unwrap();

        let hits = store.near_vector(Collection::Raw, &close, 2, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].properties["label"], "close");
        assert_eq!(hits[1].properties["label"], "near");
        assert!(hits[0].distance <= hits[1].distance);
    }

    #[tokio::test]
    async fn filter_restricts_hits() {
        let store = InMemoryVectorStore::new();
        let query = unit_vector(0);
        store
            .insert(Collection::Raw, unit_vector(0), json!({"user_id": "u1"}))
            .await
            .unwrap();
        store
            .insert(Collection::Raw, unit_vector(0), json!({"user_id": "u2"}))
            .await
            .unwrap();

        let filter = SearchFilter::new().with_equals("user_id", "u1");
        let hits = store.near_vector(Collection::Raw, &query, 10, Some(filter)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].properties["user_id"], "u1");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = InMemoryVectorStore::new();
        let id = store
            .insert(Collection::Raw, unit_vector(0), json!({}))
            .await
            .unwrap();
        assert!(store.delete(Collection::Raw, id).await.unwrap());
        assert!(!store.delete(Collection::Raw, id).await.unwrap());
    }

    #[tokio::test]
    async fn wrong_dimension_insert_is_rejected() {
        let store = InMemoryVectorStore::new();
        let result = store.insert(Collection::Raw, vec![1.0; 768], json!({})).await;
        assert!(matches!(result, Err(Error::VectorStore(_))));
    }

    #[tokio::test]
    async fn property_update_merges() {
        let store = InMemoryVectorStore::new();
        let id = store
            .insert(Collection::Raw, unit_vector(0), json!({"a": 1, "b": 2}))
            .await
            .unwrap();
        store
            .update(Collection::Raw, id, None, Some(json!({"b": 3})))
            .await
            .unwrap();
        let object = store.fetch_by_id(Collection::Raw, id).await.unwrap().unwrap();
        assert_eq!(object.properties["a"], 1);
        assert_eq!(object.properties["b"], 3);
    }

    #[tokio::test]
    async fn memory_unique_constraint_rejects_duplicates() {
        let store = InMemoryRelationalStore::new();
        let user = Uuid::new_v4();
        let item = crate::memory::tests_support::memory_item(user, "same content");
        assert!(store.insert_memory(&item).await.unwrap());
        let mut dup = crate::memory::tests_support::memory_item(user, "same content");
        dup.memory_id = Uuid::new_v4();
        assert!(!store.insert_memory(&dup).await.unwrap());
        // A different user may store the same content.
        let other = crate::memory::tests_support::memory_item(Uuid::new_v4(), "same content");
        assert!(store.insert_memory(&other).await.unwrap());
    }
}
