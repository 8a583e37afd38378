//! Database schema definitions for the Turso relational backend

/// SQL to create the users table
pub const CREATE_USERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    user_id TEXT PRIMARY KEY NOT NULL,
    username TEXT NOT NULL UNIQUE,
    email TEXT NOT NULL UNIQUE,
    role TEXT NOT NULL,
    password_hash TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
)
"#;

/// SQL to create the memory_items table
///
/// `(user_id, content_hash)` is the dedup constraint: a second insert of
/// identical content for the same user is rejected by the store.
pub const CREATE_MEMORY_ITEMS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS memory_items (
    memory_id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    content TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    encrypted_content TEXT NOT NULL,
    embedding_vector_id TEXT,
    tier TEXT NOT NULL,
    phase TEXT,
    tags TEXT NOT NULL DEFAULT '[]',
    privacy_level TEXT NOT NULL,
    crs_score REAL NOT NULL DEFAULT 0,
    access_count INTEGER NOT NULL DEFAULT 0,
    last_accessed INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    feedback_summary TEXT,
    confidence_score REAL,
    flagged INTEGER NOT NULL DEFAULT 0,
    flagged_reason TEXT,
    UNIQUE(user_id, content_hash)
)
"#;

/// SQL to create the conversations table
pub const CREATE_CONVERSATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS conversations (
    conversation_id TEXT PRIMARY KEY NOT NULL,
    tenant_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    agent TEXT NOT NULL,
    title TEXT,
    state_json TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
)
"#;

/// SQL to create the conversation_messages table
///
/// `(tenant_id, conversation_id, client_message_id)` is the idempotency
/// constraint for retried appends; SQLite treats NULL client ids as
/// distinct, so unkeyed turns are unaffected.
pub const CREATE_MESSAGES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS conversation_messages (
    message_id TEXT PRIMARY KEY NOT NULL,
    tenant_id TEXT NOT NULL,
    conversation_id TEXT NOT NULL,
    client_message_id TEXT,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    token_count INTEGER,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL,
    UNIQUE(tenant_id, conversation_id, client_message_id)
)
"#;

/// SQL to create the query_metrics table
pub const CREATE_QUERY_METRICS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS query_metrics (
    query_id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    conversation_id TEXT,
    query_hash TEXT NOT NULL,
    query_text TEXT NOT NULL,
    intent TEXT,
    agent_used TEXT,
    response_source TEXT NOT NULL DEFAULT 'pending',
    confidence REAL,
    latency_ms INTEGER NOT NULL DEFAULT 0,
    search_latency_ms INTEGER NOT NULL DEFAULT 0,
    llm_latency_ms INTEGER NOT NULL DEFAULT 0,
    input_tokens INTEGER NOT NULL DEFAULT 0,
    output_tokens INTEGER NOT NULL DEFAULT 0,
    cost_usd REAL NOT NULL DEFAULT 0,
    memories_used INTEGER NOT NULL DEFAULT 0,
    memory_ids TEXT NOT NULL DEFAULT '[]',
    enrichment_status TEXT NOT NULL DEFAULT 'pending',
    created_at INTEGER NOT NULL
)
"#;

/// SQL to create the query_feedback table
pub const CREATE_FEEDBACK_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS query_feedback (
    feedback_id TEXT PRIMARY KEY NOT NULL,
    query_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    rating INTEGER NOT NULL,
    feedback_type TEXT NOT NULL,
    response_source TEXT,
    comment TEXT,
    created_at INTEGER NOT NULL
)
"#;

/// SQL to create the audit_logs table
pub const CREATE_AUDIT_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS audit_logs (
    event_id TEXT PRIMARY KEY NOT NULL,
    kind TEXT NOT NULL,
    source TEXT NOT NULL,
    operation TEXT NOT NULL,
    destination TEXT,
    item_count INTEGER NOT NULL DEFAULT 0,
    classification TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    timestamp INTEGER NOT NULL
)
"#;

/// SQL to create the oauth_tokens table
pub const CREATE_OAUTH_TOKENS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS oauth_tokens (
    provider TEXT NOT NULL,
    user_id TEXT NOT NULL,
    access_ciphertext TEXT NOT NULL,
    refresh_ciphertext TEXT NOT NULL,
    expiry INTEGER NOT NULL,
    scopes TEXT NOT NULL DEFAULT '[]',
    email TEXT,
    last_used_at INTEGER,
    PRIMARY KEY (provider, user_id)
)
"#;

/// SQL to create the auto_tuning_log table
pub const CREATE_TUNING_LOG_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS auto_tuning_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    action TEXT NOT NULL,
    reason TEXT NOT NULL,
    old_value TEXT NOT NULL,
    new_value TEXT NOT NULL,
    confidence REAL NOT NULL,
    created_at INTEGER NOT NULL
)
"#;

/// Index on memory items by owner for listing
pub const CREATE_MEMORY_USER_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_memory_items_user
ON memory_items(user_id, created_at DESC)
"#;

/// Index on messages by conversation for chronological reads
pub const CREATE_MESSAGES_CONVERSATION_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_messages_conversation
ON conversation_messages(conversation_id, created_at)
"#;

/// Index on feedback by recency for tuner windows
pub const CREATE_FEEDBACK_CREATED_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_feedback_created
ON query_feedback(created_at DESC)
"#;

/// Index on audit rows by recency
pub const CREATE_AUDIT_TIMESTAMP_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_audit_timestamp
ON audit_logs(timestamp DESC)
"#;

/// All statements, in creation order.
pub const ALL_STATEMENTS: &[&str] = &[
    CREATE_USERS_TABLE,
    CREATE_MEMORY_ITEMS_TABLE,
    CREATE_CONVERSATIONS_TABLE,
    CREATE_MESSAGES_TABLE,
    CREATE_QUERY_METRICS_TABLE,
    CREATE_FEEDBACK_TABLE,
    CREATE_AUDIT_TABLE,
    CREATE_OAUTH_TOKENS_TABLE,
    CREATE_TUNING_LOG_TABLE,
    CREATE_MEMORY_USER_INDEX,
    CREATE_MESSAGES_CONVERSATION_INDEX,
    CREATE_FEEDBACK_CREATED_INDEX,
    CREATE_AUDIT_TIMESTAMP_INDEX,
];
