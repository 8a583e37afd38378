//! Global constants for engram-core
//!
//! Centralizes the tunable numbers and string constants used throughout the
//! memory fabric so defaults live in one place.

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    // Embedding
    pub const EMBEDDING_DIMENSION: usize = 1536;
    pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
    pub const EMBEDDING_TIMEOUT: Duration = Duration::from_secs(10);

    // Agents
    pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
    pub const LLM_TIMEOUT: Duration = Duration::from_secs(120);
    pub const LLM_MAX_TOKENS: u32 = 4096;

    // Retrieval thresholds
    pub const RAW_SIMILARITY_THRESHOLD: f32 = 0.85;
    pub const KNOWLEDGE_SIMILARITY_THRESHOLD: f32 = 0.60;
    pub const RAW_SEARCH_LIMIT: usize = 5;
    pub const KNOWLEDGE_SEARCH_LIMIT: usize = 10;

    // Semantic cache
    pub const SEMANTIC_CACHE_THRESHOLD: f32 = 0.92;

    // Context assembly
    pub const DEFAULT_CONTEXT_LIMIT: usize = 10;
    pub const MAX_SOURCE_BLOCK_CHARS: usize = 50_000;

    // Conversation memory
    pub const MAX_RECENT_TURNS: usize = 10;
    pub const SUMMARY_THRESHOLD: u32 = 6;
    pub const SUMMARY_TURN_WINDOW: usize = 20;
    pub const SUMMARY_TURN_TRUNCATE: usize = 200;
    pub const TOPIC_STACK_CAP: usize = 10;

    // Scoring
    pub const RECENCY_HALF_LIFE_DAYS: f64 = 30.0;
    pub const MAX_ACCESS_COUNT: u64 = 100;

    // Compaction
    pub const MIN_ENTRIES_FOR_TOPIC: usize = 3;
    pub const MIN_TOPICS_FOR_DOMAIN: usize = 2;
    pub const SYNTHESIS_BUDGET_USD: f64 = 0.50;
    pub const MAX_ENTRIES_PER_BATCH: usize = 100;

    // Secret storage
    pub const TOKEN_KDF_ITERATIONS: u32 = 100_000;
    pub const TOKEN_REFRESH_BUFFER: Duration = Duration::from_secs(5 * 60);
}

/// HTTP boundary constants
pub mod api {
    /// Production CORS allows exactly the null origin (desktop shell).
    pub const PROD_ALLOWED_ORIGINS: &[&str] = &["null"];

    /// Development additionally allows local front-end hosts. Never wildcard.
    pub const DEV_ALLOWED_ORIGINS: &[&str] = &[
        "null",
        "http://localhost:3000",
        "http://localhost:8080",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:8080",
    ];

    pub const ALLOWED_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "OPTIONS"];
    pub const ALLOWED_HEADERS: &[&str] = &["Content-Type", "Authorization"];
}

/// Database table names
pub mod db {
    pub const TABLE_USERS: &str = "users";
    pub const TABLE_MEMORY_ITEMS: &str = "memory_items";
    pub const TABLE_CONVERSATIONS: &str = "conversations";
    pub const TABLE_MESSAGES: &str = "conversation_messages";
    pub const TABLE_QUERY_METRICS: &str = "query_metrics";
    pub const TABLE_FEEDBACK: &str = "query_feedback";
    pub const TABLE_AUDIT: &str = "audit_logs";
    pub const TABLE_OAUTH_TOKENS: &str = "oauth_tokens";
    pub const TABLE_TUNING_LOG: &str = "auto_tuning_log";
}
