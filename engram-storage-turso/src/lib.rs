//! # Engram Storage - Turso
//!
//! Turso/libSQL relational backend for the engram memory platform: the
//! durable, canonical record of users, memory items, conversations, query
//! metrics, feedback, audit rows, OAuth tokens and the tuning log.
//!
//! Concurrency control is the store's row constraints — the dedup
//! constraint on `(user_id, content_hash)` and the idempotency constraint
//! on `(tenant_id, conversation_id, client_message_id)` — with one short
//! transaction per business operation.
//!
//! ## Example
//!
//! ```no_run
//! use engram_storage_turso::TursoStore;
//!
//! # async fn example() -> engram_core::Result<()> {
//! let store = TursoStore::new("libsql://localhost:8080", "token").await?;
//! store.initialize_schema().await?;
//! # Ok(())
//! # }
//! ```

mod rows;
mod schema;
mod store;

use engram_core::error::{Error, Result};
use libsql::{Builder, Connection, Database};
use std::sync::Arc;
use tracing::{debug, info};

/// Turso-backed relational store.
pub struct TursoStore {
    db: Arc<Database>,
}

impl TursoStore {
    /// Connect to a Turso database.
    ///
    /// Remote connections use `libsql://` with a token; local `file:`
    /// paths and `:memory:` need no token.
    pub async fn new(url: &str, token: &str) -> Result<Self> {
        let db = if url == ":memory:" || url.starts_with("file:") {
            let path = url.strip_prefix("file:").unwrap_or(url);
            Builder::new_local(path)
                .build()
                .await
                .map_err(|e| Error::Storage(format!("failed to open local database: {e}")))?
        } else if url.starts_with("libsql://") {
            Builder::new_remote(url.to_string(), token.to_string())
                .build()
                .await
                .map_err(|e| Error::Storage(format!("failed to connect to remote database: {e}")))?
        } else {
            return Err(Error::InvalidInput(format!(
                "unsupported database URL scheme: {url}"
            )));
        };

        info!(url, "connected to turso");
        Ok(Self { db: Arc::new(db) })
    }

    /// Wrap an existing database handle (used by tests with tempfiles).
    #[must_use]
    pub fn from_database(db: Database) -> Self {
        Self { db: Arc::new(db) }
    }

    /// Create tables and indexes. Idempotent.
    pub async fn initialize_schema(&self) -> Result<()> {
        let conn = self.connection()?;
        for statement in schema::ALL_STATEMENTS {
            conn.execute(statement, ())
                .await
                .map_err(|e| Error::Storage(format!("schema creation failed: {e}")))?;
        }
        debug!("schema initialized");
        Ok(())
    }

    pub(crate) fn connection(&self) -> Result<Connection> {
        self.db
            .connect()
            .map_err(|e| Error::Storage(format!("failed to acquire connection: {e}")))
    }
}
