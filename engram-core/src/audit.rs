// ============================================================================
// Audit Logging Module
// ============================================================================
//!
//! Append-only trace of data movement for compliance and incident
//! investigation. Every event records where data entered (`ingress`), moved
//! internally (`transform`), or left the system (`egress`), with an item
//! count and the data classification of the most sensitive item involved.
//!
//! Writes are synchronous best-effort: a failed audit insert is logged at
//! `warn` and swallowed. Audit must never fail the business operation it
//! describes.

use crate::storage::RelationalStore;
use crate::types::{AuditEvent, AuditKind, DataClassification};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Best-effort audit trail writer.
#[derive(Clone)]
pub struct AuditLogger {
    store: Arc<dyn RelationalStore>,
}

impl AuditLogger {
    #[must_use]
    pub fn new(store: Arc<dyn RelationalStore>) -> Self {
        Self { store }
    }

    /// Record data entering the system.
    pub async fn log_ingress(
        &self,
        source: &str,
        operation: &str,
        item_count: u64,
        classification: DataClassification,
        metadata: Value,
    ) {
        self.write(AuditKind::Ingress, source, operation, None, item_count, classification, metadata)
            .await;
    }

    /// Record an internal transformation (e.g. memory row → vector object).
    pub async fn log_transform(
        &self,
        source: &str,
        operation: &str,
        destination: &str,
        item_count: u64,
        classification: DataClassification,
        metadata: Value,
    ) {
        self.write(
            AuditKind::Transform,
            source,
            operation,
            Some(destination.to_string()),
            item_count,
            classification,
            metadata,
        )
        .await;
    }

    /// Record data leaving the system (e.g. context sent to an agent).
    pub async fn log_egress(
        &self,
        source: &str,
        operation: &str,
        destination: &str,
        item_count: u64,
        classification: DataClassification,
        metadata: Value,
    ) {
        self.write(
            AuditKind::Egress,
            source,
            operation,
            Some(destination.to_string()),
            item_count,
            classification,
            metadata,
        )
        .await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn write(
        &self,
        kind: AuditKind,
        source: &str,
        operation: &str,
        destination: Option<String>,
        item_count: u64,
        classification: DataClassification,
        metadata: Value,
    ) {
        let event = AuditEvent {
            event_id: Uuid::new_v4(),
            kind,
            source: source.to_string(),
            operation: operation.to_string(),
            destination,
            item_count,
            classification,
            metadata,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.store.insert_audit(&event).await {
            warn!(kind = %event.kind, operation = %event.operation, error = %e,
                "audit write failed; continuing");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryRelationalStore;
    use serde_json::json;

    #[tokio::test]
    async fn events_are_appended_with_kind_and_destination() {
        let store = Arc::new(InMemoryRelationalStore::new());
        let audit = AuditLogger::new(store.clone());

        audit
            .log_transform("memory", "create", "weaviate", 1, DataClassification::Internal, json!({}))
            .await;
        audit
            .log_egress("gateway", "ask", "claude", 3, DataClassification::Public, json!({}))
            .await;

        let events = store.list_audit(10).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, AuditKind::Egress);
        assert_eq!(events[0].destination.as_deref(), Some("claude"));
        assert_eq!(events[1].kind, AuditKind::Transform);
        assert_eq!(events[1].item_count, 1);
    }
}
