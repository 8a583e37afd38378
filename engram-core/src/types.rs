use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Validation Constants
// ============================================================================

/// Maximum length for memory content (1MB).
///
/// Prevents unbounded payloads from exhausting memory during encryption,
/// embedding, or storage.
pub const MAX_CONTENT_LEN: usize = 1_000_000;

/// Maximum number of tags on a single memory item.
pub const MAX_TAG_COUNT: usize = 64;

/// Maximum number of context sources per answer (hard cap on `context_limit`).
pub const MAX_CONTEXT_LIMIT: usize = 20;

/// Minimum valid feedback rating.
pub const MIN_RATING: u8 = 1;

/// Maximum valid feedback rating.
pub const MAX_RATING: u8 = 5;

// ============================================================================
// Closed enums
// ============================================================================

/// Durability / importance class for a memory item.
///
/// The tier feeds the composite retrieval score: `Long` items outrank
/// `Short` items at equal similarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum MemoryTier {
    /// Temporary, lower importance.
    #[default]
    Short,
    /// Medium-term, standard importance.
    Mid,
    /// Permanent, high importance.
    Long,
}

impl MemoryTier {
    /// Parse from the wire representation, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SHORT" => Some(Self::Short),
            "MID" => Some(Self::Mid),
            "LONG" => Some(Self::Long),
            _ => None,
        }
    }

    /// Importance multiplier used by the scorer (0.8 – 1.2).
    #[must_use]
    pub fn multiplier(self) -> f64 {
        match self {
            Self::Short => 0.8,
            Self::Mid => 1.0,
            Self::Long => 1.2,
        }
    }
}

impl fmt::Display for MemoryTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Short => write!(f, "SHORT"),
            Self::Mid => write!(f, "MID"),
            Self::Long => write!(f, "LONG"),
        }
    }
}

/// Privacy tier gating what may leave the local system.
///
/// Ordered from least to most restrictive. `LocalOnly` content never
/// reaches an external agent, regardless of the caller's privacy filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrivacyLevel {
    /// Safe to inject anywhere (docs, general knowledge, public code).
    Public,
    /// The user's own tools only (conversations, notes, personal context).
    #[default]
    Internal,
    /// Manual review required (sensitive discussions, private data).
    Confidential,
    /// Never leaves the local system (credentials, keys, secrets, PII).
    LocalOnly,
}

impl PrivacyLevel {
    /// Parse from the wire representation, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PUBLIC" => Some(Self::Public),
            "INTERNAL" => Some(Self::Internal),
            "CONFIDENTIAL" => Some(Self::Confidential),
            "LOCAL_ONLY" => Some(Self::LocalOnly),
            _ => None,
        }
    }
}

impl fmt::Display for PrivacyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public => write!(f, "PUBLIC"),
            Self::Internal => write!(f, "INTERNAL"),
            Self::Confidential => write!(f, "CONFIDENTIAL"),
            Self::LocalOnly => write!(f, "LOCAL_ONLY"),
        }
    }
}

/// Data classification attached to audit events.
///
/// Mirrors [`PrivacyLevel`] but lives in the audit vocabulary so the
/// audit trail stays stable if privacy tiers ever change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataClassification {
    Public,
    Internal,
    Confidential,
    LocalOnly,
}

impl From<PrivacyLevel> for DataClassification {
    fn from(level: PrivacyLevel) -> Self {
        match level {
            PrivacyLevel::Public => Self::Public,
            PrivacyLevel::Internal => Self::Internal,
            PrivacyLevel::Confidential => Self::Confidential,
            PrivacyLevel::LocalOnly => Self::LocalOnly,
        }
    }
}

/// Kind of audit event: where data entered, moved, or left the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Ingress,
    Transform,
    Egress,
}

impl fmt::Display for AuditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ingress => write!(f, "ingress"),
            Self::Transform => write!(f, "transform"),
            Self::Egress => write!(f, "egress"),
        }
    }
}

/// Explicit user feedback signal on an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackType {
    ThumbsUp,
    ThumbsDown,
    Regenerate,
}

impl FeedbackType {
    /// Parse from the wire representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "thumbs_up" => Some(Self::ThumbsUp),
            "thumbs_down" => Some(Self::ThumbsDown),
            "regenerate" => Some(Self::Regenerate),
            _ => None,
        }
    }
}

impl fmt::Display for FeedbackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ThumbsUp => write!(f, "thumbs_up"),
            Self::ThumbsDown => write!(f, "thumbs_down"),
            Self::Regenerate => write!(f, "regenerate"),
        }
    }
}

/// Coarse intent classification for an incoming query.
///
/// Used as metadata and to bias agent choice; never gates retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    Factual,
    Analysis,
    Creative,
    Research,
    MemoryQuery,
    #[default]
    General,
}

impl fmt::Display for QueryIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Factual => write!(f, "factual"),
            Self::Analysis => write!(f, "analysis"),
            Self::Creative => write!(f, "creative"),
            Self::Research => write!(f, "research"),
            Self::MemoryQuery => write!(f, "memory_query"),
            Self::General => write!(f, "general"),
        }
    }
}

/// How an answer was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    /// Answer generated by an agent on this request.
    FreshGeneration,
    /// Answer served from the semantic cache by vector similarity.
    SemanticCacheHit,
    /// Answer served from an exact prior match.
    CacheHit,
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FreshGeneration => write!(f, "fresh_generation"),
            Self::SemanticCacheHit => write!(f, "semantic_cache_hit"),
            Self::CacheHit => write!(f, "cache_hit"),
        }
    }
}

/// Role of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Parse from the wire representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::System => write!(f, "system"),
        }
    }
}

/// Access role of a platform user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Public,
    #[default]
    Member,
    Admin,
}

// ============================================================================
// Records
// ============================================================================

/// Denormalized feedback rollup stored on a memory item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FeedbackSummary {
    /// Total number of ratings received.
    pub total_ratings: u64,
    /// Average rating mapped to [-1, 1] (None until the first rating).
    pub avg_rating: Option<f64>,
    /// Thumbs-up count.
    pub thumbs_up: u64,
    /// Thumbs-down count.
    pub thumbs_down: u64,
    /// Regenerate count.
    pub regenerates: u64,
}

/// A platform user. Created explicitly; soft-deactivated, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub role: UserRole,
    pub password_hash: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One unit of recall: the canonical relational record of a stored memory.
///
/// The plaintext `content` is retained for search and indexing; the
/// encrypted form travels alongside it for at-rest protection of exports
/// and backups. `(user_id, content_hash)` is unique — a second create with
/// identical content is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    pub memory_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    /// SHA-256 hex of the content; dedup key.
    pub content_hash: String,
    /// Base64-wrapped AEAD ciphertext of the content.
    pub encrypted_content: String,
    /// Id of the subordinate vector object in the Raw collection.
    pub embedding_vector_id: Option<Uuid>,
    pub tier: MemoryTier,
    /// Free-form context label (project phase, ingestion batch, ...).
    pub phase: Option<String>,
    pub tags: Vec<String>,
    pub privacy_level: PrivacyLevel,
    /// Composite retrieval score in [0, 1].
    pub crs_score: f64,
    pub access_count: u64,
    pub last_accessed: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Free-form metadata bag; typed JSON at the boundary only.
    pub metadata: HashMap<String, Value>,
    pub feedback_summary: Option<FeedbackSummary>,
    /// Quality-gate confidence at storage time, if the item came from an answer.
    pub confidence_score: Option<f64>,
    pub flagged: bool,
    pub flagged_reason: Option<String>,
}

/// One row per query through the ask pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecord {
    pub query_id: Uuid,
    pub user_id: Uuid,
    pub conversation_id: Option<Uuid>,
    /// SHA-256 hex of the query text.
    pub query_hash: String,
    pub query_text: String,
    pub intent: Option<QueryIntent>,
    pub agent_used: Option<String>,
    /// Where the answer came from: pending | fresh_generation |
    /// semantic_cache_hit | error.
    pub response_source: String,
    pub confidence: Option<f64>,
    pub latency_ms: u64,
    pub search_latency_ms: u64,
    pub llm_latency_ms: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub memories_used: u64,
    /// Memory items that grounded the answer; feedback propagates to them.
    pub memory_ids: Vec<Uuid>,
    /// Downstream enrichment pipeline status (pending until processed).
    pub enrichment_status: String,
    pub created_at: DateTime<Utc>,
}

impl QueryRecord {
    /// Create a pending record for a freshly received query.
    #[must_use]
    pub fn pending(user_id: Uuid, conversation_id: Option<Uuid>, text: &str, hash: String) -> Self {
        Self {
            query_id: Uuid::new_v4(),
            user_id,
            conversation_id,
            query_hash: hash,
            query_text: text.to_string(),
            intent: None,
            agent_used: None,
            response_source: "pending".to_string(),
            confidence: None,
            latency_ms: 0,
            search_latency_ms: 0,
            llm_latency_ms: 0,
            input_tokens: 0,
            output_tokens: 0,
            cost_usd: 0.0,
            memories_used: 0,
            memory_ids: Vec::new(),
            enrichment_status: "pending".to_string(),
            created_at: Utc::now(),
        }
    }
}

/// An appended feedback row. Never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub feedback_id: Uuid,
    pub query_id: Uuid,
    pub user_id: Uuid,
    pub rating: u8,
    pub feedback_type: FeedbackType,
    pub response_source: Option<String>,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An append-only audit trail event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub kind: AuditKind,
    /// Originating subsystem (memory, gateway, jobs, ...).
    pub source: String,
    pub operation: String,
    /// Target system for transform/egress events.
    pub destination: Option<String>,
    pub item_count: u64,
    pub classification: DataClassification,
    pub metadata: Value,
    pub timestamp: DateTime<Utc>,
}

/// Encrypted-at-rest OAuth token pair for an external provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthTokenRecord {
    pub provider: String,
    pub user_id: Uuid,
    /// AEAD ciphertext, base64-wrapped.
    pub access_ciphertext: String,
    /// AEAD ciphertext, base64-wrapped.
    pub refresh_ciphertext: String,
    pub expiry: DateTime<Utc>,
    pub scopes: Vec<String>,
    pub email: Option<String>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Rolling per-conversation state stored in `conversations.state_json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ConversationState {
    /// Rolling conversation summary.
    #[serde(default)]
    pub summary: String,
    /// Entity disambiguation state.
    #[serde(default)]
    pub entities: HashMap<String, Value>,
    /// Topics currently under discussion, most recent last.
    #[serde(default)]
    pub topic_stack: Vec<String>,
    #[serde(default)]
    pub last_intent: Option<String>,
    #[serde(default = "default_summary_version")]
    pub summary_version: u32,
    #[serde(default)]
    pub turns_since_summary: u32,
}

fn default_summary_version() -> u32 {
    1
}

/// A conversation thread owned by one user within one tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub conversation_id: Uuid,
    pub tenant_id: String,
    pub user_id: Uuid,
    /// Agent handling this thread (claude, gpt, gemini, claude-code).
    pub agent: String,
    pub title: Option<String>,
    pub state: ConversationState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One turn in a conversation.
///
/// `(tenant_id, conversation_id, client_message_id)` is unique, which makes
/// retried appends idempotent: the first write wins and later calls return
/// the original message id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub message_id: Uuid,
    pub tenant_id: String,
    pub conversation_id: Uuid,
    pub client_message_id: Option<String>,
    pub role: Role,
    pub content: String,
    pub token_count: Option<u32>,
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
}

/// A persisted auto-tuning decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningLogRow {
    pub action: String,
    pub reason: String,
    pub old_value: String,
    pub new_value: String,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_parse_is_case_insensitive() {
        assert_eq!(MemoryTier::parse("long"), Some(MemoryTier::Long));
        assert_eq!(MemoryTier::parse("MID"), Some(MemoryTier::Mid));
        assert_eq!(MemoryTier::parse("bogus"), None);
    }

    #[test]
    fn privacy_roundtrips_through_display() {
        for level in [
            PrivacyLevel::Public,
            PrivacyLevel::Internal,
            PrivacyLevel::Confidential,
            PrivacyLevel::LocalOnly,
        ] {
            assert_eq!(PrivacyLevel::parse(&level.to_string()), Some(level));
        }
    }

    #[test]
    fn privacy_ordering_tracks_restrictiveness() {
        assert!(PrivacyLevel::Public < PrivacyLevel::Internal);
        assert!(PrivacyLevel::Internal < PrivacyLevel::Confidential);
        assert!(PrivacyLevel::Confidential < PrivacyLevel::LocalOnly);
    }

    #[test]
    fn feedback_type_wire_format() {
        assert_eq!(FeedbackType::parse("thumbs_up"), Some(FeedbackType::ThumbsUp));
        assert_eq!(FeedbackType::ThumbsDown.to_string(), "thumbs_down");
        assert_eq!(FeedbackType::parse("THUMBS_UP"), None);
    }
}
