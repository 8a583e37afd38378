//! `RelationalStore` implementation over libSQL

use crate::rows;
use crate::TursoStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use engram_core::error::{Error, Result};
use engram_core::storage::{CommentCounts, ModelRating, RatingStats, RelationalStore};
use engram_core::types::{
    AuditEvent, ConversationRecord, ConversationState, FeedbackRecord, FeedbackSummary,
    MemoryItem, MessageRecord, OAuthTokenRecord, QueryRecord, TuningLogRow, UserAccount,
};
use libsql::params;
use tracing::debug;
use uuid::Uuid;

/// Memory item column list shared by every memory SELECT.
const MEMORY_COLUMNS: &str = "memory_id, user_id, content, content_hash, encrypted_content, \
     embedding_vector_id, tier, phase, tags, privacy_level, crs_score, access_count, \
     last_accessed, created_at, updated_at, metadata, feedback_summary, confidence_score, \
     flagged, flagged_reason";

const MESSAGE_COLUMNS: &str = "message_id, tenant_id, conversation_id, client_message_id, role, \
     content, token_count, metadata, created_at";

const QUERY_COLUMNS: &str = "query_id, user_id, conversation_id, query_hash, query_text, intent, \
     agent_used, response_source, confidence, latency_ms, search_latency_ms, llm_latency_ms, \
     input_tokens, output_tokens, cost_usd, memories_used, memory_ids, enrichment_status, \
     created_at";

fn is_unique_violation(e: &libsql::Error) -> bool {
    e.to_string().contains("UNIQUE constraint failed")
}

fn enum_str<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default()
}

impl TursoStore {
    async fn query_memories(&self, sql: &str, args: impl libsql::params::IntoParams)
        -> Result<Vec<MemoryItem>> {
        let conn = self.connection()?;
        let mut rows = conn
            .query(sql, args)
            .await
            .map_err(|e| Error::Storage(format!("memory query failed: {e}")))?;
        let mut items = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| Error::Storage(format!("memory row fetch failed: {e}")))?
        {
            items.push(rows::to_memory_item(&row)?);
        }
        Ok(items)
    }
}

#[async_trait]
impl RelationalStore for TursoStore {
    async fn create_user(&self, user: &UserAccount) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO users (user_id, username, email, role, password_hash, is_active, \
             created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                user.user_id.to_string(),
                user.username.clone(),
                user.email.clone(),
                enum_str(&user.role),
                user.password_hash.clone(),
                i64::from(user.is_active),
                rows::to_ts(user.created_at),
                rows::to_ts(user.updated_at),
            ],
        )
        .await
        .map_err(|e| Error::Storage(format!("failed to create user: {e}")))?;
        Ok(())
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<UserAccount>> {
        let conn = self.connection()?;
        let mut rows = conn
            .query(
                "SELECT user_id, username, email, role, password_hash, is_active, created_at, \
                 updated_at FROM users WHERE user_id = ?",
                params![user_id.to_string()],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to query user: {e}")))?;
        match rows
            .next()
            .await
            .map_err(|e| Error::Storage(format!("user row fetch failed: {e}")))?
        {
            Some(row) => Ok(Some(rows::to_user(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_active_users(&self) -> Result<Vec<Uuid>> {
        let conn = self.connection()?;
        let mut rows = conn
            .query("SELECT user_id FROM users WHERE is_active = 1", ())
            .await
            .map_err(|e| Error::Storage(format!("failed to list users: {e}")))?;
        let mut ids = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| Error::Storage(format!("user row fetch failed: {e}")))?
        {
            let id: String = row
                .get(0)
                .map_err(|e| Error::Storage(format!("user id column: {e}")))?;
            ids.push(rows::parse_uuid(&id)?);
        }
        Ok(ids)
    }

    async fn set_user_active(&self, user_id: Uuid, is_active: bool) -> Result<()> {
        let conn = self.connection()?;
        let affected = conn
            .execute(
                "UPDATE users SET is_active = ?, updated_at = ? WHERE user_id = ?",
                params![
                    i64::from(is_active),
                    rows::to_ts(Utc::now()),
                    user_id.to_string(),
                ],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to update user: {e}")))?;
        if affected == 0 {
            return Err(Error::NotFound(user_id));
        }
        Ok(())
    }

    async fn insert_memory(&self, item: &MemoryItem) -> Result<bool> {
        let conn = self.connection()?;
        let result = conn
            .execute(
                &format!("INSERT INTO memory_items ({MEMORY_COLUMNS}) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"),
                params![
                    item.memory_id.to_string(),
                    item.user_id.to_string(),
                    item.content.clone(),
                    item.content_hash.clone(),
                    item.encrypted_content.clone(),
                    item.embedding_vector_id.map(|id| id.to_string()),
                    item.tier.to_string(),
                    item.phase.clone(),
                    serde_json::to_string(&item.tags)?,
                    item.privacy_level.to_string(),
                    item.crs_score,
                    item.access_count as i64,
                    item.last_accessed.map(rows::to_ts),
                    rows::to_ts(item.created_at),
                    rows::to_ts(item.updated_at),
                    serde_json::to_string(&item.metadata)?,
                    item.feedback_summary
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                    item.confidence_score,
                    i64::from(item.flagged),
                    item.flagged_reason.clone(),
                ],
            )
            .await;

        match result {
            Ok(_) => {
                debug!(memory_id = %item.memory_id, "memory row inserted");
                Ok(true)
            }
            // The dedup constraint is the serialization point for racing
            // creates; losers get a duplicate outcome, not an error.
            Err(e) if is_unique_violation(&e) => Ok(false),
            Err(e) => Err(Error::Storage(format!("failed to insert memory: {e}"))),
        }
    }

    async fn get_memory(&self, memory_id: Uuid) -> Result<Option<MemoryItem>> {
        let items = self
            .query_memories(
                &format!("SELECT {MEMORY_COLUMNS} FROM memory_items WHERE memory_id = ?"),
                params![memory_id.to_string()],
            )
            .await?;
        Ok(items.into_iter().next())
    }

    async fn find_memory_by_hash(
        &self,
        user_id: Uuid,
        content_hash: &str,
    ) -> Result<Option<MemoryItem>> {
        let items = self
            .query_memories(
                &format!(
                    "SELECT {MEMORY_COLUMNS} FROM memory_items \
                     WHERE user_id = ? AND content_hash = ?"
                ),
                params![user_id.to_string(), content_hash.to_string()],
            )
            .await?;
        Ok(items.into_iter().next())
    }

    async fn update_memory(&self, item: &MemoryItem) -> Result<()> {
        let conn = self.connection()?;
        let affected = conn
            .execute(
                "UPDATE memory_items SET content = ?, content_hash = ?, encrypted_content = ?, \
                 embedding_vector_id = ?, tier = ?, phase = ?, tags = ?, privacy_level = ?, \
                 crs_score = ?, access_count = ?, last_accessed = ?, created_at = ?, \
                 updated_at = ?, metadata = ?, feedback_summary = ?, confidence_score = ?, \
                 flagged = ?, flagged_reason = ? WHERE memory_id = ?",
                params![
                    item.content.clone(),
                    item.content_hash.clone(),
                    item.encrypted_content.clone(),
                    item.embedding_vector_id.map(|id| id.to_string()),
                    item.tier.to_string(),
                    item.phase.clone(),
                    serde_json::to_string(&item.tags)?,
                    item.privacy_level.to_string(),
                    item.crs_score,
                    item.access_count as i64,
                    item.last_accessed.map(rows::to_ts),
                    rows::to_ts(item.created_at),
                    rows::to_ts(item.updated_at),
                    serde_json::to_string(&item.metadata)?,
                    item.feedback_summary
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                    item.confidence_score,
                    i64::from(item.flagged),
                    item.flagged_reason.clone(),
                    item.memory_id.to_string(),
                ],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to update memory: {e}")))?;
        if affected == 0 {
            return Err(Error::NotFound(item.memory_id));
        }
        Ok(())
    }

    async fn delete_memory(&self, memory_id: Uuid) -> Result<bool> {
        let conn = self.connection()?;
        let affected = conn
            .execute(
                "DELETE FROM memory_items WHERE memory_id = ?",
                params![memory_id.to_string()],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to delete memory: {e}")))?;
        Ok(affected > 0)
    }

    async fn list_memories(
        &self,
        user_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MemoryItem>> {
        self.query_memories(
            &format!(
                "SELECT {MEMORY_COLUMNS} FROM memory_items WHERE user_id = ? \
                 ORDER BY created_at DESC LIMIT ? OFFSET ?"
            ),
            params![user_id.to_string(), limit as i64, offset as i64],
        )
        .await
    }

    async fn search_memories_by_tag(
        &self,
        user_id: Uuid,
        tag: &str,
        limit: usize,
    ) -> Result<Vec<MemoryItem>> {
        // Tags live in a JSON array column; match the quoted element.
        let needle = format!("%{}%", serde_json::to_string(tag)?);
        self.query_memories(
            &format!(
                "SELECT {MEMORY_COLUMNS} FROM memory_items \
                 WHERE user_id = ? AND tags LIKE ? ORDER BY created_at DESC LIMIT ?"
            ),
            params![user_id.to_string(), needle, limit as i64],
        )
        .await
    }

    async fn touch_memory(&self, memory_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let conn = self.connection()?;
        let affected = conn
            .execute(
                "UPDATE memory_items SET access_count = access_count + 1, last_accessed = ? \
                 WHERE memory_id = ?",
                params![rows::to_ts(at), memory_id.to_string()],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to touch memory: {e}")))?;
        if affected == 0 {
            return Err(Error::NotFound(memory_id));
        }
        Ok(())
    }

    async fn all_memories(&self, limit: usize) -> Result<Vec<MemoryItem>> {
        self.query_memories(
            &format!(
                "SELECT {MEMORY_COLUMNS} FROM memory_items ORDER BY created_at ASC LIMIT ?"
            ),
            params![limit as i64],
        )
        .await
    }

    async fn update_feedback_summary(
        &self,
        memory_id: Uuid,
        summary: &FeedbackSummary,
    ) -> Result<()> {
        let conn = self.connection()?;
        let affected = conn
            .execute(
                "UPDATE memory_items SET feedback_summary = ?, updated_at = ? WHERE memory_id = ?",
                params![
                    serde_json::to_string(summary)?,
                    rows::to_ts(Utc::now()),
                    memory_id.to_string(),
                ],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to write feedback summary: {e}")))?;
        if affected == 0 {
            return Err(Error::NotFound(memory_id));
        }
        Ok(())
    }

    async fn update_crs(&self, memory_id: Uuid, crs_score: f64) -> Result<()> {
        let conn = self.connection()?;
        let affected = conn
            .execute(
                "UPDATE memory_items SET crs_score = ?, updated_at = ? WHERE memory_id = ?",
                params![crs_score, rows::to_ts(Utc::now()), memory_id.to_string()],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to write crs score: {e}")))?;
        if affected == 0 {
            return Err(Error::NotFound(memory_id));
        }
        Ok(())
    }

    async fn insert_conversation(&self, conversation: &ConversationRecord) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO conversations (conversation_id, tenant_id, user_id, agent, title, \
             state_json, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                conversation.conversation_id.to_string(),
                conversation.tenant_id.clone(),
                conversation.user_id.to_string(),
                conversation.agent.clone(),
                conversation.title.clone(),
                serde_json::to_string(&conversation.state)?,
                rows::to_ts(conversation.created_at),
                rows::to_ts(conversation.updated_at),
            ],
        )
        .await
        .map_err(|e| Error::Storage(format!("failed to insert conversation: {e}")))?;
        Ok(())
    }

    async fn get_conversation(
        &self,
        tenant_id: &str,
        conversation_id: Uuid,
    ) -> Result<Option<ConversationRecord>> {
        let conn = self.connection()?;
        let mut rows = conn
            .query(
                "SELECT conversation_id, tenant_id, user_id, agent, title, state_json, \
                 created_at, updated_at FROM conversations \
                 WHERE conversation_id = ? AND tenant_id = ?",
                params![conversation_id.to_string(), tenant_id.to_string()],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to query conversation: {e}")))?;
        match rows
            .next()
            .await
            .map_err(|e| Error::Storage(format!("conversation row fetch failed: {e}")))?
        {
            Some(row) => Ok(Some(rows::to_conversation(&row)?)),
            None => Ok(None),
        }
    }

    async fn update_conversation_state(
        &self,
        tenant_id: &str,
        conversation_id: Uuid,
        state: &ConversationState,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.connection()?;
        let affected = conn
            .execute(
                "UPDATE conversations SET state_json = ?, updated_at = ? \
                 WHERE conversation_id = ? AND tenant_id = ?",
                params![
                    serde_json::to_string(state)?,
                    rows::to_ts(updated_at),
                    conversation_id.to_string(),
                    tenant_id.to_string(),
                ],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to update conversation state: {e}")))?;
        if affected == 0 {
            return Err(Error::NotFound(conversation_id));
        }
        Ok(())
    }

    async fn list_conversations(
        &self,
        user_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ConversationRecord>> {
        let conn = self.connection()?;
        let mut rows = conn
            .query(
                "SELECT conversation_id, tenant_id, user_id, agent, title, state_json, \
                 created_at, updated_at FROM conversations WHERE user_id = ? \
                 ORDER BY updated_at DESC LIMIT ? OFFSET ?",
                params![user_id.to_string(), limit as i64, offset as i64],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to list conversations: {e}")))?;
        let mut conversations = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| Error::Storage(format!("conversation row fetch failed: {e}")))?
        {
            conversations.push(rows::to_conversation(&row)?);
        }
        Ok(conversations)
    }

    async fn insert_message(&self, message: &MessageRecord) -> Result<()> {
        let conn = self.connection()?;
        let result = conn
            .execute(
                &format!(
                    "INSERT INTO conversation_messages ({MESSAGE_COLUMNS}) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
                ),
                params![
                    message.message_id.to_string(),
                    message.tenant_id.clone(),
                    message.conversation_id.to_string(),
                    message.client_message_id.clone(),
                    message.role.to_string(),
                    message.content.clone(),
                    message.token_count.map(i64::from),
                    serde_json::to_string(&message.metadata)?,
                    rows::to_ts(message.created_at),
                ],
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(Error::Storage(format!(
                "unique constraint: message with client id {:?} already exists",
                message.client_message_id
            ))),
            Err(e) => Err(Error::Storage(format!("failed to insert message: {e}"))),
        }
    }

    async fn find_message_by_client_id(
        &self,
        tenant_id: &str,
        conversation_id: Uuid,
        client_message_id: &str,
    ) -> Result<Option<MessageRecord>> {
        let conn = self.connection()?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM conversation_messages \
                     WHERE tenant_id = ? AND conversation_id = ? AND client_message_id = ?"
                ),
                params![
                    tenant_id.to_string(),
                    conversation_id.to_string(),
                    client_message_id.to_string(),
                ],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to query message: {e}")))?;
        match rows
            .next()
            .await
            .map_err(|e| Error::Storage(format!("message row fetch failed: {e}")))?
        {
            Some(row) => Ok(Some(rows::to_message(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        tail: Option<usize>,
    ) -> Result<Vec<MessageRecord>> {
        let conn = self.connection()?;
        // Tail by reading newest-first with a limit, then restoring order.
        let (sql, reverse) = match tail {
            Some(_) => (
                format!(
                    "SELECT {MESSAGE_COLUMNS} FROM conversation_messages \
                     WHERE conversation_id = ? ORDER BY created_at DESC, message_id DESC LIMIT ?"
                ),
                true,
            ),
            None => (
                format!(
                    "SELECT {MESSAGE_COLUMNS} FROM conversation_messages \
                     WHERE conversation_id = ? ORDER BY created_at ASC, message_id ASC"
                ),
                false,
            ),
        };

        let mut rows = match tail {
            Some(n) => conn
                .query(&sql, params![conversation_id.to_string(), n as i64])
                .await,
            None => conn.query(&sql, params![conversation_id.to_string()]).await,
        }
        .map_err(|e| Error::Storage(format!("failed to list messages: {e}")))?;

        let mut messages = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| Error::Storage(format!("message row fetch failed: {e}")))?
        {
            messages.push(rows::to_message(&row)?);
        }
        if reverse {
            messages.reverse();
        }
        Ok(messages)
    }

    async fn count_messages(&self, conversation_id: Uuid) -> Result<u64> {
        let conn = self.connection()?;
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM conversation_messages WHERE conversation_id = ?",
                params![conversation_id.to_string()],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to count messages: {e}")))?;
        let row = rows
            .next()
            .await
            .map_err(|e| Error::Storage(format!("count fetch failed: {e}")))?
            .ok_or_else(|| Error::Storage("count returned no rows".into()))?;
        let count: i64 = row
            .get(0)
            .map_err(|e| Error::Storage(format!("count column: {e}")))?;
        Ok(count as u64)
    }

    async fn insert_query(&self, record: &QueryRecord) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            &format!(
                "INSERT INTO query_metrics ({QUERY_COLUMNS}) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            params![
                record.query_id.to_string(),
                record.user_id.to_string(),
                record.conversation_id.map(|id| id.to_string()),
                record.query_hash.clone(),
                record.query_text.clone(),
                record.intent.map(|i| i.to_string()),
                record.agent_used.clone(),
                record.response_source.clone(),
                record.confidence,
                record.latency_ms as i64,
                record.search_latency_ms as i64,
                record.llm_latency_ms as i64,
                record.input_tokens as i64,
                record.output_tokens as i64,
                record.cost_usd,
                record.memories_used as i64,
                serde_json::to_string(
                    &record.memory_ids.iter().map(ToString::to_string).collect::<Vec<_>>()
                )?,
                record.enrichment_status.clone(),
                rows::to_ts(record.created_at),
            ],
        )
        .await
        .map_err(|e| Error::Storage(format!("failed to insert query: {e}")))?;
        Ok(())
    }

    async fn get_query(&self, query_id: Uuid) -> Result<Option<QueryRecord>> {
        let conn = self.connection()?;
        let mut rows = conn
            .query(
                &format!("SELECT {QUERY_COLUMNS} FROM query_metrics WHERE query_id = ?"),
                params![query_id.to_string()],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to query metrics row: {e}")))?;
        match rows
            .next()
            .await
            .map_err(|e| Error::Storage(format!("metrics row fetch failed: {e}")))?
        {
            Some(row) => Ok(Some(rows::to_query(&row)?)),
            None => Ok(None),
        }
    }

    async fn update_query(&self, record: &QueryRecord) -> Result<()> {
        let conn = self.connection()?;
        let affected = conn
            .execute(
                "UPDATE query_metrics SET conversation_id = ?, intent = ?, agent_used = ?, \
                 response_source = ?, confidence = ?, latency_ms = ?, search_latency_ms = ?, \
                 llm_latency_ms = ?, input_tokens = ?, output_tokens = ?, cost_usd = ?, \
                 memories_used = ?, memory_ids = ?, enrichment_status = ? WHERE query_id = ?",
                params![
                    record.conversation_id.map(|id| id.to_string()),
                    record.intent.map(|i| i.to_string()),
                    record.agent_used.clone(),
                    record.response_source.clone(),
                    record.confidence,
                    record.latency_ms as i64,
                    record.search_latency_ms as i64,
                    record.llm_latency_ms as i64,
                    record.input_tokens as i64,
                    record.output_tokens as i64,
                    record.cost_usd,
                    record.memories_used as i64,
                    serde_json::to_string(
                        &record.memory_ids.iter().map(ToString::to_string).collect::<Vec<_>>()
                    )?,
                    record.enrichment_status.clone(),
                    record.query_id.to_string(),
                ],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to update query: {e}")))?;
        if affected == 0 {
            return Err(Error::NotFound(record.query_id));
        }
        Ok(())
    }

    async fn list_pending_enrichment(&self, limit: usize) -> Result<Vec<QueryRecord>> {
        let conn = self.connection()?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {QUERY_COLUMNS} FROM query_metrics \
                     WHERE enrichment_status = 'pending' \
                       AND response_source = 'fresh_generation' \
                     ORDER BY created_at ASC LIMIT ?"
                ),
                params![limit as i64],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to list pending queries: {e}")))?;
        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| Error::Storage(format!("pending query fetch failed: {e}")))?
        {
            records.push(rows::to_query(&row)?);
        }
        Ok(records)
    }

    async fn set_enrichment_status(&self, query_id: Uuid, status: &str) -> Result<()> {
        let conn = self.connection()?;
        let affected = conn
            .execute(
                "UPDATE query_metrics SET enrichment_status = ? WHERE query_id = ?",
                params![status.to_string(), query_id.to_string()],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to set enrichment status: {e}")))?;
        if affected == 0 {
            return Err(Error::NotFound(query_id));
        }
        Ok(())
    }

    async fn insert_feedback(&self, record: &FeedbackRecord) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO query_feedback (feedback_id, query_id, user_id, rating, feedback_type, \
             response_source, comment, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                record.feedback_id.to_string(),
                record.query_id.to_string(),
                record.user_id.to_string(),
                i64::from(record.rating),
                record.feedback_type.to_string(),
                record.response_source.clone(),
                record.comment.clone(),
                rows::to_ts(record.created_at),
            ],
        )
        .await
        .map_err(|e| Error::Storage(format!("failed to insert feedback: {e}")))?;
        Ok(())
    }

    async fn list_feedback_for_query(&self, query_id: Uuid) -> Result<Vec<FeedbackRecord>> {
        let conn = self.connection()?;
        let mut rows = conn
            .query(
                "SELECT feedback_id, query_id, user_id, rating, feedback_type, response_source, \
                 comment, created_at FROM query_feedback WHERE query_id = ? \
                 ORDER BY created_at ASC",
                params![query_id.to_string()],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to list feedback: {e}")))?;
        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| Error::Storage(format!("feedback row fetch failed: {e}")))?
        {
            records.push(rows::to_feedback(&row)?);
        }
        Ok(records)
    }

    async fn avg_rating_by_source(
        &self,
        response_source: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<RatingStats>> {
        let conn = self.connection()?;
        let mut rows = conn
            .query(
                "SELECT AVG(rating), COUNT(*) FROM query_feedback \
                 WHERE response_source = ? AND created_at >= ?",
                params![response_source.to_string(), rows::to_ts(since)],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to aggregate ratings: {e}")))?;
        let Some(row) = rows
            .next()
            .await
            .map_err(|e| Error::Storage(format!("aggregate fetch failed: {e}")))?
        else {
            return Ok(None);
        };
        let count: i64 = row
            .get(1)
            .map_err(|e| Error::Storage(format!("count column: {e}")))?;
        if count == 0 {
            return Ok(None);
        }
        let avg: f64 = row
            .get(0)
            .map_err(|e| Error::Storage(format!("avg column: {e}")))?;
        Ok(Some(RatingStats { avg_rating: avg, count: count as u64 }))
    }

    async fn ratings_by_model(
        &self,
        since: DateTime<Utc>,
        min_count: u64,
    ) -> Result<Vec<ModelRating>> {
        let conn = self.connection()?;
        let mut rows = conn
            .query(
                "SELECT q.agent_used, AVG(f.rating), COUNT(*) FROM query_feedback f \
                 JOIN query_metrics q ON q.query_id = f.query_id \
                 WHERE f.created_at >= ? AND q.agent_used IS NOT NULL \
                 GROUP BY q.agent_used HAVING COUNT(*) >= ? ORDER BY AVG(f.rating) DESC",
                params![rows::to_ts(since), min_count as i64],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to aggregate model ratings: {e}")))?;
        let mut ratings = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| Error::Storage(format!("model rating fetch failed: {e}")))?
        {
            let model: String = row
                .get(0)
                .map_err(|e| Error::Storage(format!("model column: {e}")))?;
            let avg_rating: f64 = row
                .get(1)
                .map_err(|e| Error::Storage(format!("avg column: {e}")))?;
            let count: i64 = row
                .get(2)
                .map_err(|e| Error::Storage(format!("count column: {e}")))?;
            ratings.push(ModelRating { model, avg_rating, count: count as u64 });
        }
        Ok(ratings)
    }

    async fn comment_counts(&self, since: DateTime<Utc>) -> Result<CommentCounts> {
        let conn = self.connection()?;
        let mut rows = conn
            .query(
                "SELECT \
                 SUM(CASE WHEN comment LIKE '%too many%' THEN 1 ELSE 0 END), \
                 SUM(CASE WHEN comment LIKE '%too few%' THEN 1 ELSE 0 END), \
                 COUNT(*) FROM query_feedback \
                 WHERE comment IS NOT NULL AND created_at >= ?",
                params![rows::to_ts(since)],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to count comments: {e}")))?;
        let Some(row) = rows
            .next()
            .await
            .map_err(|e| Error::Storage(format!("comment count fetch failed: {e}")))?
        else {
            return Ok(CommentCounts::default());
        };
        let too_many: Option<i64> = row
            .get(0)
            .map_err(|e| Error::Storage(format!("too_many column: {e}")))?;
        let too_few: Option<i64> = row
            .get(1)
            .map_err(|e| Error::Storage(format!("too_few column: {e}")))?;
        let total: i64 = row
            .get(2)
            .map_err(|e| Error::Storage(format!("total column: {e}")))?;
        Ok(CommentCounts {
            too_many: too_many.unwrap_or(0) as u64,
            too_few: too_few.unwrap_or(0) as u64,
            total: total as u64,
        })
    }

    async fn insert_audit(&self, event: &AuditEvent) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO audit_logs (event_id, kind, source, operation, destination, \
             item_count, classification, metadata, timestamp) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                event.event_id.to_string(),
                event.kind.to_string(),
                event.source.clone(),
                event.operation.clone(),
                event.destination.clone(),
                event.item_count as i64,
                enum_str(&event.classification),
                serde_json::to_string(&event.metadata)?,
                rows::to_ts(event.timestamp),
            ],
        )
        .await
        .map_err(|e| Error::Storage(format!("failed to insert audit event: {e}")))?;
        Ok(())
    }

    async fn list_audit(&self, limit: usize) -> Result<Vec<AuditEvent>> {
        let conn = self.connection()?;
        let mut rows = conn
            .query(
                "SELECT event_id, kind, source, operation, destination, item_count, \
                 classification, metadata, timestamp FROM audit_logs \
                 ORDER BY timestamp DESC LIMIT ?",
                params![limit as i64],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to list audit events: {e}")))?;
        let mut events = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| Error::Storage(format!("audit row fetch failed: {e}")))?
        {
            events.push(rows::to_audit(&row)?);
        }
        Ok(events)
    }

    async fn upsert_token(&self, record: &OAuthTokenRecord) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT OR REPLACE INTO oauth_tokens (provider, user_id, access_ciphertext, \
             refresh_ciphertext, expiry, scopes, email, last_used_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                record.provider.clone(),
                record.user_id.to_string(),
                record.access_ciphertext.clone(),
                record.refresh_ciphertext.clone(),
                rows::to_ts(record.expiry),
                serde_json::to_string(&record.scopes)?,
                record.email.clone(),
                record.last_used_at.map(rows::to_ts),
            ],
        )
        .await
        .map_err(|e| Error::Storage(format!("failed to upsert token: {e}")))?;
        Ok(())
    }

    async fn get_token(&self, provider: &str, user_id: Uuid) -> Result<Option<OAuthTokenRecord>> {
        let conn = self.connection()?;
        let mut rows = conn
            .query(
                "SELECT provider, user_id, access_ciphertext, refresh_ciphertext, expiry, \
                 scopes, email, last_used_at FROM oauth_tokens \
                 WHERE provider = ? AND user_id = ?",
                params![provider.to_string(), user_id.to_string()],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to query token: {e}")))?;
        match rows
            .next()
            .await
            .map_err(|e| Error::Storage(format!("token row fetch failed: {e}")))?
        {
            Some(row) => Ok(Some(rows::to_token(&row)?)),
            None => Ok(None),
        }
    }

    async fn delete_token(&self, provider: &str, user_id: Uuid) -> Result<bool> {
        let conn = self.connection()?;
        let affected = conn
            .execute(
                "DELETE FROM oauth_tokens WHERE provider = ? AND user_id = ?",
                params![provider.to_string(), user_id.to_string()],
            )
            .await
            .map_err(|e| Error::Storage(format!("failed to delete token: {e}")))?;
        Ok(affected > 0)
    }

    async fn insert_tuning_decision(&self, row: &TuningLogRow) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO auto_tuning_log (action, reason, old_value, new_value, confidence, \
             created_at) VALUES (?, ?, ?, ?, ?, ?)",
            params![
                row.action.clone(),
                row.reason.clone(),
                row.old_value.clone(),
                row.new_value.clone(),
                row.confidence,
                rows::to_ts(row.created_at),
            ],
        )
        .await
        .map_err(|e| Error::Storage(format!("failed to insert tuning decision: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use engram_core::crypto::content_hash;
    use engram_core::types::{FeedbackType, MemoryTier, PrivacyLevel};
    use std::collections::HashMap;

    async fn store() -> (TursoStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = libsql::Builder::new_local(path).build().await.unwrap();
        let store = TursoStore::from_database(db);
        store.initialize_schema().await.unwrap();
        (store, dir)
    }

    fn memory_item(user_id: Uuid, content: &str) -> MemoryItem {
        let now = Utc::now();
        MemoryItem {
            memory_id: Uuid::new_v4(),
            user_id,
            content: content.to_string(),
            content_hash: content_hash(content),
            encrypted_content: "ciphertext".to_string(),
            embedding_vector_id: Some(Uuid::new_v4()),
            tier: MemoryTier::Mid,
            phase: Some("phase-1".to_string()),
            tags: vec!["rust".to_string()],
            privacy_level: PrivacyLevel::Internal,
            crs_score: 0.42,
            access_count: 0,
            last_accessed: None,
            created_at: now,
            updated_at: now,
            metadata: HashMap::from([("source".to_string(), serde_json::json!("cli"))]),
            feedback_summary: None,
            confidence_score: Some(0.9),
            flagged: false,
            flagged_reason: None,
        }
    }

    #[tokio::test]
    async fn memory_roundtrip_preserves_fields() {
        let (store, _dir) = store().await;
        let user = Uuid::new_v4();
        let item = memory_item(user, "roundtrip content");

        assert!(store.insert_memory(&item).await.unwrap());
        let loaded = store.get_memory(item.memory_id).await.unwrap().unwrap();

        assert_eq!(loaded.content, item.content);
        assert_eq!(loaded.content_hash, item.content_hash);
        assert_eq!(loaded.tier, MemoryTier::Mid);
        assert_eq!(loaded.privacy_level, PrivacyLevel::Internal);
        assert_eq!(loaded.tags, vec!["rust"]);
        assert_eq!(loaded.metadata["source"], serde_json::json!("cli"));
        assert!((loaded.crs_score - 0.42).abs() < 1e-9);
    }

    #[tokio::test]
    async fn dedup_constraint_rejects_second_insert() {
        let (store, _dir) = store().await;
        let user = Uuid::new_v4();
        let item = memory_item(user, "dup content");
        assert!(store.insert_memory(&item).await.unwrap());

        let mut dup = memory_item(user, "dup content");
        dup.memory_id = Uuid::new_v4();
        assert!(!store.insert_memory(&dup).await.unwrap());

        // A different user may store identical content.
        let other = memory_item(Uuid::new_v4(), "dup content");
        assert!(store.insert_memory(&other).await.unwrap());
    }

    #[tokio::test]
    async fn tag_search_matches_whole_tags() {
        let (store, _dir) = store().await;
        let user = Uuid::new_v4();
        store.insert_memory(&memory_item(user, "a")).await.unwrap();
        let mut untagged = memory_item(user, "b");
        untagged.tags = vec!["python".to_string()];
        store.insert_memory(&untagged).await.unwrap();

        let hits = store.search_memories_by_tag(user, "rust", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "a");
    }

    #[tokio::test]
    async fn message_idempotency_constraint_holds() {
        let (store, _dir) = store().await;
        let conversation = ConversationRecord {
            conversation_id: Uuid::new_v4(),
            tenant_id: "t1".to_string(),
            user_id: Uuid::new_v4(),
            agent: "claude".to_string(),
            title: None,
            state: ConversationState::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        store.insert_conversation(&conversation).await.unwrap();

        let message = MessageRecord {
            message_id: Uuid::new_v4(),
            tenant_id: "t1".to_string(),
            conversation_id: conversation.conversation_id,
            client_message_id: Some("k1".to_string()),
            role: engram_core::types::Role::User,
            content: "A".to_string(),
            token_count: None,
            metadata: HashMap::new(),
            created_at: Utc::now(),
        };
        store.insert_message(&message).await.unwrap();

        let mut retry = message.clone();
        retry.message_id = Uuid::new_v4();
        retry.content = "B".to_string();
        assert!(store.insert_message(&retry).await.is_err());

        let found = store
            .find_message_by_client_id("t1", conversation.conversation_id, "k1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.message_id, message.message_id);
        assert_eq!(found.content, "A");
    }

    #[tokio::test]
    async fn list_messages_tail_is_chronological() {
        let (store, _dir) = store().await;
        let conversation_id = Uuid::new_v4();
        for i in 0..5 {
            let message = MessageRecord {
                message_id: Uuid::new_v4(),
                tenant_id: "t1".to_string(),
                conversation_id,
                client_message_id: None,
                role: engram_core::types::Role::User,
                content: format!("m{i}"),
                token_count: None,
                metadata: HashMap::new(),
                created_at: Utc::now() + chrono::Duration::seconds(i),
            };
            store.insert_message(&message).await.unwrap();
        }

        let tail = store.list_messages(conversation_id, Some(3)).await.unwrap();
        let contents: Vec<&str> = tail.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
        assert_eq!(store.count_messages(conversation_id).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn query_metrics_roundtrip_and_update() {
        let (store, _dir) = store().await;
        let mut record = QueryRecord::pending(Uuid::new_v4(), None, "what?", content_hash("what?"));
        store.insert_query(&record).await.unwrap();

        record.response_source = "fresh_generation".to_string();
        record.agent_used = Some("claude".to_string());
        record.memory_ids = vec![Uuid::new_v4()];
        record.cost_usd = 0.004;
        store.update_query(&record).await.unwrap();

        let loaded = store.get_query(record.query_id).await.unwrap().unwrap();
        assert_eq!(loaded.response_source, "fresh_generation");
        assert_eq!(loaded.memory_ids, record.memory_ids);
        assert!((loaded.cost_usd - 0.004).abs() < 1e-9);
    }

    #[tokio::test]
    async fn rating_aggregates_feed_the_tuner() {
        let (store, _dir) = store().await;
        let since = Utc::now() - chrono::Duration::days(30);

        for (agent, rating) in [("claude", 5u8), ("claude", 4), ("claude", 5), ("gpt", 2), ("gpt", 1), ("gpt", 2)] {
            let mut query =
                QueryRecord::pending(Uuid::new_v4(), None, "q", content_hash("q"));
            query.agent_used = Some(agent.to_string());
            query.response_source = "semantic_cache_hit".to_string();
            store.insert_query(&query).await.unwrap();

            store
                .insert_feedback(&FeedbackRecord {
                    feedback_id: Uuid::new_v4(),
                    query_id: query.query_id,
                    user_id: Uuid::new_v4(),
                    rating,
                    feedback_type: FeedbackType::ThumbsUp,
                    response_source: Some("semantic_cache_hit".to_string()),
                    comment: Some("too many sources".to_string()),
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let stats = store
            .avg_rating_by_source("semantic_cache_hit", since)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.count, 6);

        let models = store.ratings_by_model(since, 3).await.unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].model, "claude");
        assert!(models[0].avg_rating > models[1].avg_rating);

        let counts = store.comment_counts(since).await.unwrap();
        assert_eq!(counts.too_many, 6);
        assert_eq!(counts.total, 6);
    }

    #[tokio::test]
    async fn token_upsert_and_delete() {
        let (store, _dir) = store().await;
        let user = Uuid::new_v4();
        let record = OAuthTokenRecord {
            provider: "gmail".to_string(),
            user_id: user,
            access_ciphertext: "ct-a".to_string(),
            refresh_ciphertext: "ct-r".to_string(),
            expiry: Utc::now(),
            scopes: vec!["mail.read".to_string()],
            email: Some("u@example.com".to_string()),
            last_used_at: None,
        };
        store.upsert_token(&record).await.unwrap();

        let mut refreshed = record.clone();
        refreshed.access_ciphertext = "ct-a2".to_string();
        store.upsert_token(&refreshed).await.unwrap();

        let loaded = store.get_token("gmail", user).await.unwrap().unwrap();
        assert_eq!(loaded.access_ciphertext, "ct-a2");

        assert!(store.delete_token("gmail", user).await.unwrap());
        assert!(!store.delete_token("gmail", user).await.unwrap());
    }
}
