//! Conversation memory
//!
//! Thread continuity for the ask pipeline: a rolling summary (mid-term
//! memory), the last N turns (short-term memory), entity disambiguation
//! state and a topic stack, all hanging off the conversation row's state
//! bag.
//!
//! Appends are idempotent on `(tenant, conversation, client_message_id)`;
//! a retried append returns the original message id and ignores the new
//! content (first write wins). The rolling summary regenerates after every
//! [`defaults::SUMMARY_THRESHOLD`] turns: the last ≤20 turns concatenated
//! with per-message truncation to 200 chars. `summary_version` bumps once
//! per regeneration and the turn counter resets in the same write.

use crate::constants::defaults;
use crate::error::{Error, Result};
use crate::storage::RelationalStore;
use crate::types::{ConversationRecord, ConversationState, MessageRecord, Role};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Context bundle for prompt composition.
#[derive(Debug, Clone)]
pub struct ThreadContext {
    pub conversation_id: Uuid,
    pub tenant_id: String,
    pub user_id: Uuid,
    /// Rolling conversation summary.
    pub summary: String,
    /// Entity disambiguation state.
    pub entities: HashMap<String, Value>,
    /// Topics under discussion, most recent last.
    pub topic_stack: Vec<String>,
    /// Last N turns, chronological.
    pub recent_turns: Vec<MessageRecord>,
    /// Total turns in the conversation.
    pub turn_count: u64,
}

/// Manages conversation state for continuity.
pub struct ConversationMemory {
    store: Arc<dyn RelationalStore>,
}

impl ConversationMemory {
    #[must_use]
    pub fn new(store: Arc<dyn RelationalStore>) -> Self {
        Self { store }
    }

    /// Get an existing conversation or create a new one.
    ///
    /// A supplied id is validated against the tenant and user; mismatches
    /// fall through to a fresh conversation rather than leaking another
    /// thread.
    pub async fn get_or_create(
        &self,
        tenant_id: &str,
        user_id: Uuid,
        conversation_id: Option<Uuid>,
        agent: &str,
    ) -> Result<Uuid> {
        if let Some(id) = conversation_id {
            if let Some(existing) = self.store.get_conversation(tenant_id, id).await? {
                if existing.user_id == user_id {
                    debug!(conversation_id = %id, "using existing conversation");
                    return Ok(id);
                }
                warn!(conversation_id = %id, user_id = %user_id, "conversation access denied");
            }
        }

        let now = Utc::now();
        let conversation = ConversationRecord {
            conversation_id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            user_id,
            agent: agent.to_string(),
            title: None,
            state: ConversationState::default(),
            created_at: now,
            updated_at: now,
        };
        self.store.insert_conversation(&conversation).await?;
        info!(conversation_id = %conversation.conversation_id, %user_id, "created conversation");
        Ok(conversation.conversation_id)
    }

    /// Load the thread context for prompt composition.
    pub async fn load_context(
        &self,
        tenant_id: &str,
        conversation_id: Uuid,
        max_turns: usize,
    ) -> Result<Option<ThreadContext>> {
        let Some(conversation) = self.store.get_conversation(tenant_id, conversation_id).await?
        else {
            return Ok(None);
        };

        let recent_turns = self.store.list_messages(conversation_id, Some(max_turns)).await?;
        let turn_count = self.store.count_messages(conversation_id).await?;

        Ok(Some(ThreadContext {
            conversation_id,
            tenant_id: tenant_id.to_string(),
            user_id: conversation.user_id,
            summary: conversation.state.summary,
            entities: conversation.state.entities,
            topic_stack: conversation.state.topic_stack,
            recent_turns,
            turn_count,
        }))
    }

    /// Append a turn (idempotent on `client_message_id`).
    #[allow(clippy::too_many_arguments)]
    pub async fn append_turn(
        &self,
        tenant_id: &str,
        conversation_id: Uuid,
        role: Role,
        content: &str,
        client_message_id: Option<&str>,
        token_count: Option<u32>,
        metadata: Option<HashMap<String, Value>>,
    ) -> Result<Uuid> {
        if let Some(client_id) = client_message_id {
            if let Some(existing) = self
                .store
                .find_message_by_client_id(tenant_id, conversation_id, client_id)
                .await?
            {
                debug!(message_id = %existing.message_id, "idempotent append: returning existing");
                return Ok(existing.message_id);
            }
        }

        let mut conversation = self
            .store
            .get_conversation(tenant_id, conversation_id)
            .await?
            .ok_or(Error::NotFound(conversation_id))?;

        let message = MessageRecord {
            message_id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            conversation_id,
            client_message_id: client_message_id.map(String::from),
            role,
            content: content.to_string(),
            token_count,
            metadata: metadata.unwrap_or_default(),
            created_at: Utc::now(),
        };
        self.store.insert_message(&message).await?;

        conversation.state.turns_since_summary += 1;
        self.store
            .update_conversation_state(tenant_id, conversation_id, &conversation.state, Utc::now())
            .await?;

        debug!(message_id = %message.message_id, %role, "appended turn");
        Ok(message.message_id)
    }

    /// Regenerate the rolling summary when the threshold is reached.
    ///
    /// Returns `true` when a new summary was written.
    pub async fn update_summary_if_needed(
        &self,
        tenant_id: &str,
        conversation_id: Uuid,
        force: bool,
    ) -> Result<bool> {
        let Some(mut conversation) =
            self.store.get_conversation(tenant_id, conversation_id).await?
        else {
            return Ok(false);
        };

        if !force && conversation.state.turns_since_summary < defaults::SUMMARY_THRESHOLD {
            return Ok(false);
        }

        let turns = self
            .store
            .list_messages(conversation_id, Some(defaults::SUMMARY_TURN_WINDOW))
            .await?;
        if turns.is_empty() {
            return Ok(false);
        }

        let summary = turns
            .iter()
            .map(|msg| {
                let prefix = match msg.role {
                    Role::User => "User",
                    Role::Assistant => "Assistant",
                    Role::System => "System",
                };
                let truncated = truncate_chars(&msg.content, defaults::SUMMARY_TURN_TRUNCATE);
                if truncated.len() < msg.content.len() {
                    format!("{prefix}: {truncated}...")
                } else {
                    format!("{prefix}: {truncated}")
                }
            })
            .collect::<Vec<_>>()
            .join("\n");

        conversation.state.summary = summary;
        conversation.state.turns_since_summary = 0;
        conversation.state.summary_version += 1;
        self.store
            .update_conversation_state(tenant_id, conversation_id, &conversation.state, Utc::now())
            .await?;

        info!(
            conversation_id = %conversation_id,
            version = conversation.state.summary_version,
            "regenerated rolling summary"
        );
        Ok(true)
    }

    /// Update entity disambiguation state.
    pub async fn update_entity(
        &self,
        tenant_id: &str,
        conversation_id: Uuid,
        key: &str,
        value: Value,
    ) -> Result<()> {
        let Some(mut conversation) =
            self.store.get_conversation(tenant_id, conversation_id).await?
        else {
            warn!(conversation_id = %conversation_id, "entity update on missing conversation");
            return Ok(());
        };
        conversation.state.entities.insert(key.to_string(), value);
        self.store
            .update_conversation_state(tenant_id, conversation_id, &conversation.state, Utc::now())
            .await
    }

    /// Push a topic onto the stack; deduped at the top, capped at 10.
    pub async fn push_topic(
        &self,
        tenant_id: &str,
        conversation_id: Uuid,
        topic: &str,
    ) -> Result<()> {
        let Some(mut conversation) =
            self.store.get_conversation(tenant_id, conversation_id).await?
        else {
            return Ok(());
        };

        let stack = &mut conversation.state.topic_stack;
        if stack.last().map(String::as_str) != Some(topic) {
            stack.push(topic.to_string());
            if stack.len() > defaults::TOPIC_STACK_CAP {
                let excess = stack.len() - defaults::TOPIC_STACK_CAP;
                stack.drain(0..excess);
            }
        }
        self.store
            .update_conversation_state(tenant_id, conversation_id, &conversation.state, Utc::now())
            .await
    }
}

/// Date bucket for conversation listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DateBucket {
    Today,
    Yesterday,
    Previous7Days,
    Previous30Days,
    Older,
}

impl std::fmt::Display for DateBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Today => write!(f, "Today"),
            Self::Yesterday => write!(f, "Yesterday"),
            Self::Previous7Days => write!(f, "Previous 7 days"),
            Self::Previous30Days => write!(f, "Previous 30 days"),
            Self::Older => write!(f, "Older"),
        }
    }
}

/// Classify a conversation's last activity into a date bucket.
#[must_use]
pub fn date_bucket(updated_at: chrono::DateTime<Utc>, now: chrono::DateTime<Utc>) -> DateBucket {
    let today = now.date_naive();
    let date = updated_at.date_naive();
    if date == today {
        return DateBucket::Today;
    }
    if date == today.pred_opt().unwrap_or(today) {
        return DateBucket::Yesterday;
    }
    let days = (today - date).num_days();
    if days <= 7 {
        DateBucket::Previous7Days
    } else if days <= 30 {
        DateBucket::Previous30Days
    } else {
        DateBucket::Older
    }
}

/// Group conversations by date bucket, newest bucket first. Buckets keep
/// the input's internal ordering (callers pass newest-first lists).
#[must_use]
pub fn group_by_date(
    conversations: Vec<ConversationRecord>,
    now: chrono::DateTime<Utc>,
) -> Vec<(DateBucket, Vec<ConversationRecord>)> {
    let order = [
        DateBucket::Today,
        DateBucket::Yesterday,
        DateBucket::Previous7Days,
        DateBucket::Previous30Days,
        DateBucket::Older,
    ];

    let mut grouped: Vec<(DateBucket, Vec<ConversationRecord>)> =
        order.iter().map(|b| (*b, Vec::new())).collect();
    for conversation in conversations {
        let bucket = date_bucket(conversation.updated_at, now);
        if let Some(slot) = grouped.iter_mut().find(|(b, _)| *b == bucket) {
            slot.1.push(conversation);
        }
    }
    grouped.retain(|(_, items)| !items.is_empty());
    grouped
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryRelationalStore;

    fn memory() -> (ConversationMemory, Arc<InMemoryRelationalStore>) {
        let store = Arc::new(InMemoryRelationalStore::new());
        (ConversationMemory::new(store.clone()), store)
    }

    #[tokio::test]
    async fn append_turn_is_idempotent_on_client_id() {
        let (conversations, _) = memory();
        let user = Uuid::new_v4();
        let conv = conversations.get_or_create("t1", user, None, "claude").await.unwrap();

        let first = conversations
            .append_turn("t1", conv, Role::User, "A", Some("k1"), None, None)
            .await
            .unwrap();
        let second = conversations
            .append_turn("t1", conv, Role::User, "B", Some("k1"), None, None)
            .await
            .unwrap();

        assert_eq!(first, second);
        let context = conversations.load_context("t1", conv, 10).await.unwrap().unwrap();
        assert_eq!(context.turn_count, 1);
        // First write wins: the retried content was ignored.
        assert_eq!(context.recent_turns[0].content, "A");
    }

    #[tokio::test]
    async fn supplied_id_is_validated_against_user() {
        let (conversations, _) = memory();
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let conv = conversations.get_or_create("t1", owner, None, "claude").await.unwrap();

        let reused = conversations
            .get_or_create("t1", owner, Some(conv), "claude")
            .await
            .unwrap();
        assert_eq!(reused, conv);

        let fresh = conversations
            .get_or_create("t1", stranger, Some(conv), "claude")
            .await
            .unwrap();
        assert_ne!(fresh, conv);
    }

    #[tokio::test]
    async fn summary_regenerates_at_threshold() {
        let (conversations, _) = memory();
        let user = Uuid::new_v4();
        let conv = conversations.get_or_create("t1", user, None, "claude").await.unwrap();

        for i in 0..defaults::SUMMARY_THRESHOLD {
            conversations
                .append_turn("t1", conv, Role::User, &format!("turn {i}"), None, None, None)
                .await
                .unwrap();
        }

        assert!(conversations.update_summary_if_needed("t1", conv, false).await.unwrap());
        let context = conversations.load_context("t1", conv, 10).await.unwrap().unwrap();
        assert!(context.summary.contains("turn 0"));

        // Counter reset: an immediate second pass is a no-op.
        assert!(!conversations.update_summary_if_needed("t1", conv, false).await.unwrap());
    }

    #[tokio::test]
    async fn summary_version_bumps_once_per_regeneration() {
        let (conversations, store) = memory();
        let user = Uuid::new_v4();
        let conv = conversations.get_or_create("t1", user, None, "claude").await.unwrap();
        conversations
            .append_turn("t1", conv, Role::User, "hello", None, None, None)
            .await
            .unwrap();

        conversations.update_summary_if_needed("t1", conv, true).await.unwrap();
        let record = store.get_conversation("t1", conv).await.unwrap().unwrap();
        assert_eq!(record.state.summary_version, 2);
        assert_eq!(record.state.turns_since_summary, 0);
    }

    #[tokio::test]
    async fn long_turns_are_truncated_in_summary() {
        let (conversations, store) = memory();
        let user = Uuid::new_v4();
        let conv = conversations.get_or_create("t1", user, None, "claude").await.unwrap();
        conversations
            .append_turn("t1", conv, Role::User, &"x".repeat(500), None, None, None)
            .await
            .unwrap();

        conversations.update_summary_if_needed("t1", conv, true).await.unwrap();
        let record = store.get_conversation("t1", conv).await.unwrap().unwrap();
        // "User: " + 200 chars + "..."
        assert!(record.state.summary.len() < 220);
        assert!(record.state.summary.ends_with("..."));
    }

    #[tokio::test]
    async fn topic_stack_dedupes_top_and_caps() {
        let (conversations, store) = memory();
        let user = Uuid::new_v4();
        let conv = conversations.get_or_create("t1", user, None, "claude").await.unwrap();

        conversations.push_topic("t1", conv, "rust").await.unwrap();
        conversations.push_topic("t1", conv, "rust").await.unwrap();
        for i in 0..12 {
            conversations.push_topic("t1", conv, &format!("topic-{i}")).await.unwrap();
        }

        let record = store.get_conversation("t1", conv).await.unwrap().unwrap();
        assert_eq!(record.state.topic_stack.len(), defaults::TOPIC_STACK_CAP);
        assert_eq!(record.state.topic_stack.last().map(String::as_str), Some("topic-11"));
    }

    #[test]
    fn date_buckets_match_the_listing_contract() {
        let now = Utc::now();
        assert_eq!(date_bucket(now, now), DateBucket::Today);
        assert_eq!(date_bucket(now - chrono::Duration::days(1), now), DateBucket::Yesterday);
        assert_eq!(date_bucket(now - chrono::Duration::days(5), now), DateBucket::Previous7Days);
        assert_eq!(date_bucket(now - chrono::Duration::days(20), now), DateBucket::Previous30Days);
        assert_eq!(date_bucket(now - chrono::Duration::days(90), now), DateBucket::Older);
    }

    #[test]
    fn grouping_drops_empty_buckets_and_keeps_order() {
        let now = Utc::now();
        let conversation = |days_ago: i64| ConversationRecord {
            conversation_id: Uuid::new_v4(),
            tenant_id: "t1".to_string(),
            user_id: Uuid::new_v4(),
            agent: "claude".to_string(),
            title: None,
            state: crate::types::ConversationState::default(),
            created_at: now - chrono::Duration::days(days_ago),
            updated_at: now - chrono::Duration::days(days_ago),
        };

        let grouped = group_by_date(vec![conversation(0), conversation(0), conversation(45)], now);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].0, DateBucket::Today);
        assert_eq!(grouped[0].1.len(), 2);
        assert_eq!(grouped[1].0, DateBucket::Older);
    }

    #[tokio::test]
    async fn entities_accumulate() {
        let (conversations, store) = memory();
        let user = Uuid::new_v4();
        let conv = conversations.get_or_create("t1", user, None, "claude").await.unwrap();

        conversations
            .update_entity("t1", conv, "NuBird", serde_json::json!({"type": "SRE assistant"}))
            .await
            .unwrap();
        let record = store.get_conversation("t1", conv).await.unwrap().unwrap();
        assert_eq!(record.state.entities["NuBird"]["type"], "SRE assistant");
    }
}
