//! Row ↔ record mapping

use chrono::{DateTime, Utc};
use engram_core::error::{Error, Result};
use engram_core::types::{
    AuditEvent, AuditKind, ConversationRecord, ConversationState, DataClassification,
    FeedbackRecord, FeedbackType, MemoryItem, MemoryTier, MessageRecord, OAuthTokenRecord,
    PrivacyLevel, QueryIntent, QueryRecord, Role, UserAccount, UserRole,
};
use libsql::Row;
use uuid::Uuid;

pub fn to_ts(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

pub fn from_ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
}

pub fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| Error::Storage(format!("malformed uuid in row: {e}")))
}

fn text(row: &Row, index: i32) -> Result<String> {
    row.get::<String>(index)
        .map_err(|e| Error::Storage(format!("column {index}: {e}")))
}

fn opt_text(row: &Row, index: i32) -> Result<Option<String>> {
    row.get::<Option<String>>(index)
        .map_err(|e| Error::Storage(format!("column {index}: {e}")))
}

fn integer(row: &Row, index: i32) -> Result<i64> {
    row.get::<i64>(index)
        .map_err(|e| Error::Storage(format!("column {index}: {e}")))
}

fn opt_integer(row: &Row, index: i32) -> Result<Option<i64>> {
    row.get::<Option<i64>>(index)
        .map_err(|e| Error::Storage(format!("column {index}: {e}")))
}

fn real(row: &Row, index: i32) -> Result<f64> {
    row.get::<f64>(index)
        .map_err(|e| Error::Storage(format!("column {index}: {e}")))
}

fn opt_real(row: &Row, index: i32) -> Result<Option<f64>> {
    row.get::<Option<f64>>(index)
        .map_err(|e| Error::Storage(format!("column {index}: {e}")))
}

/// Columns: user_id, username, email, role, password_hash, is_active,
/// created_at, updated_at
pub fn to_user(row: &Row) -> Result<UserAccount> {
    Ok(UserAccount {
        user_id: parse_uuid(&text(row, 0)?)?,
        username: text(row, 1)?,
        email: text(row, 2)?,
        role: serde_json::from_value(serde_json::Value::String(text(row, 3)?))
            .unwrap_or(UserRole::Member),
        password_hash: text(row, 4)?,
        is_active: integer(row, 5)? != 0,
        created_at: from_ts(integer(row, 6)?),
        updated_at: from_ts(integer(row, 7)?),
    })
}

/// Columns: memory_id, user_id, content, content_hash, encrypted_content,
/// embedding_vector_id, tier, phase, tags, privacy_level, crs_score,
/// access_count, last_accessed, created_at, updated_at, metadata,
/// feedback_summary, confidence_score, flagged, flagged_reason
pub fn to_memory_item(row: &Row) -> Result<MemoryItem> {
    let tier = text(row, 6)?;
    let privacy = text(row, 9)?;
    Ok(MemoryItem {
        memory_id: parse_uuid(&text(row, 0)?)?,
        user_id: parse_uuid(&text(row, 1)?)?,
        content: text(row, 2)?,
        content_hash: text(row, 3)?,
        encrypted_content: text(row, 4)?,
        embedding_vector_id: opt_text(row, 5)?.map(|s| parse_uuid(&s)).transpose()?,
        tier: MemoryTier::parse(&tier)
            .ok_or_else(|| Error::Storage(format!("unknown tier in row: {tier}")))?,
        phase: opt_text(row, 7)?,
        tags: serde_json::from_str(&text(row, 8)?)?,
        privacy_level: PrivacyLevel::parse(&privacy)
            .ok_or_else(|| Error::Storage(format!("unknown privacy level in row: {privacy}")))?,
        crs_score: real(row, 10)?,
        access_count: integer(row, 11)? as u64,
        last_accessed: opt_integer(row, 12)?.map(from_ts),
        created_at: from_ts(integer(row, 13)?),
        updated_at: from_ts(integer(row, 14)?),
        metadata: serde_json::from_str(&text(row, 15)?)?,
        feedback_summary: opt_text(row, 16)?
            .map(|s| serde_json::from_str(&s))
            .transpose()?,
        confidence_score: opt_real(row, 17)?,
        flagged: integer(row, 18)? != 0,
        flagged_reason: opt_text(row, 19)?,
    })
}

/// Columns: conversation_id, tenant_id, user_id, agent, title, state_json,
/// created_at, updated_at
pub fn to_conversation(row: &Row) -> Result<ConversationRecord> {
    let state: ConversationState = serde_json::from_str(&text(row, 5)?)?;
    Ok(ConversationRecord {
        conversation_id: parse_uuid(&text(row, 0)?)?,
        tenant_id: text(row, 1)?,
        user_id: parse_uuid(&text(row, 2)?)?,
        agent: text(row, 3)?,
        title: opt_text(row, 4)?,
        state,
        created_at: from_ts(integer(row, 6)?),
        updated_at: from_ts(integer(row, 7)?),
    })
}

/// Columns: message_id, tenant_id, conversation_id, client_message_id,
/// role, content, token_count, metadata, created_at
pub fn to_message(row: &Row) -> Result<MessageRecord> {
    let role = text(row, 4)?;
    Ok(MessageRecord {
        message_id: parse_uuid(&text(row, 0)?)?,
        tenant_id: text(row, 1)?,
        conversation_id: parse_uuid(&text(row, 2)?)?,
        client_message_id: opt_text(row, 3)?,
        role: Role::parse(&role)
            .ok_or_else(|| Error::Storage(format!("unknown role in row: {role}")))?,
        content: text(row, 5)?,
        token_count: opt_integer(row, 6)?.map(|v| v as u32),
        metadata: serde_json::from_str(&text(row, 7)?)?,
        created_at: from_ts(integer(row, 8)?),
    })
}

/// Columns: query_id, user_id, conversation_id, query_hash, query_text,
/// intent, agent_used, response_source, confidence, latency_ms,
/// search_latency_ms, llm_latency_ms, input_tokens, output_tokens,
/// cost_usd, memories_used, memory_ids, enrichment_status, created_at
pub fn to_query(row: &Row) -> Result<QueryRecord> {
    let intent: Option<QueryIntent> = opt_text(row, 5)?
        .and_then(|s| serde_json::from_value(serde_json::Value::String(s)).ok());
    let memory_ids: Vec<String> = serde_json::from_str(&text(row, 16)?)?;
    Ok(QueryRecord {
        query_id: parse_uuid(&text(row, 0)?)?,
        user_id: parse_uuid(&text(row, 1)?)?,
        conversation_id: opt_text(row, 2)?.map(|s| parse_uuid(&s)).transpose()?,
        query_hash: text(row, 3)?,
        query_text: text(row, 4)?,
        intent,
        agent_used: opt_text(row, 6)?,
        response_source: text(row, 7)?,
        confidence: opt_real(row, 8)?,
        latency_ms: integer(row, 9)? as u64,
        search_latency_ms: integer(row, 10)? as u64,
        llm_latency_ms: integer(row, 11)? as u64,
        input_tokens: integer(row, 12)? as u64,
        output_tokens: integer(row, 13)? as u64,
        cost_usd: real(row, 14)?,
        memories_used: integer(row, 15)? as u64,
        memory_ids: memory_ids
            .iter()
            .map(|s| parse_uuid(s))
            .collect::<Result<Vec<_>>>()?,
        enrichment_status: text(row, 17)?,
        created_at: from_ts(integer(row, 18)?),
    })
}

/// Columns: feedback_id, query_id, user_id, rating, feedback_type,
/// response_source, comment, created_at
pub fn to_feedback(row: &Row) -> Result<FeedbackRecord> {
    let feedback_type = text(row, 4)?;
    Ok(FeedbackRecord {
        feedback_id: parse_uuid(&text(row, 0)?)?,
        query_id: parse_uuid(&text(row, 1)?)?,
        user_id: parse_uuid(&text(row, 2)?)?,
        rating: integer(row, 3)? as u8,
        feedback_type: FeedbackType::parse(&feedback_type).ok_or_else(|| {
            Error::Storage(format!("unknown feedback type in row: {feedback_type}"))
        })?,
        response_source: opt_text(row, 5)?,
        comment: opt_text(row, 6)?,
        created_at: from_ts(integer(row, 7)?),
    })
}

/// Columns: event_id, kind, source, operation, destination, item_count,
/// classification, metadata, timestamp
pub fn to_audit(row: &Row) -> Result<AuditEvent> {
    let kind: AuditKind =
        serde_json::from_value(serde_json::Value::String(text(row, 1)?))
            .map_err(|e| Error::Storage(format!("unknown audit kind: {e}")))?;
    let classification: DataClassification =
        serde_json::from_value(serde_json::Value::String(text(row, 6)?))
            .map_err(|e| Error::Storage(format!("unknown classification: {e}")))?;
    Ok(AuditEvent {
        event_id: parse_uuid(&text(row, 0)?)?,
        kind,
        source: text(row, 2)?,
        operation: text(row, 3)?,
        destination: opt_text(row, 4)?,
        item_count: integer(row, 5)? as u64,
        classification,
        metadata: serde_json::from_str(&text(row, 7)?)?,
        timestamp: from_ts(integer(row, 8)?),
    })
}

/// Columns: provider, user_id, access_ciphertext, refresh_ciphertext,
/// expiry, scopes, email, last_used_at
pub fn to_token(row: &Row) -> Result<OAuthTokenRecord> {
    Ok(OAuthTokenRecord {
        provider: text(row, 0)?,
        user_id: parse_uuid(&text(row, 1)?)?,
        access_ciphertext: text(row, 2)?,
        refresh_ciphertext: text(row, 3)?,
        expiry: from_ts(integer(row, 4)?),
        scopes: serde_json::from_str(&text(row, 5)?)?,
        email: opt_text(row, 6)?,
        last_used_at: opt_integer(row, 7)?.map(from_ts),
    })
}
