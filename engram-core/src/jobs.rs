//! Scheduled background jobs
//!
//! An interval-based driver for the maintenance pipeline: knowledge
//! enrichment (hourly), topic compaction (daily), domain compaction
//! (weekly), score decay (daily), dedup sweep (weekly), retention cleanup
//! (weekly), vector reconciliation and the hourly auto-tuner cycle. Jobs
//! run on a background task set separate from request tasks.
//!
//! The driver is opt-out via `JOBS_ENABLED=false`. Every run is bracketed
//! by audit records carrying start/complete status and summary statistics;
//! one item's failure never aborts a run.

use crate::audit::AuditLogger;
use crate::compaction::KnowledgeCompactor;
use crate::enrichment::KnowledgeExtractor;
use crate::memory::MemoryService;
use crate::scoring::ContextScorer;
use crate::storage::RelationalStore;
use crate::tuner::AutoTuner;
use crate::types::{DataClassification, MemoryTier};
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// The closed set of scheduled jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Enrichment,
    TopicCompaction,
    DomainCompaction,
    ScoreDecay,
    DedupSweep,
    RetentionCleanup,
    VectorReconcile,
    AutoTune,
}

impl JobKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Enrichment => "enrichment",
            Self::TopicCompaction => "topic_compaction",
            Self::DomainCompaction => "domain_compaction",
            Self::ScoreDecay => "score_decay",
            Self::DedupSweep => "dedup_sweep",
            Self::RetentionCleanup => "retention_cleanup",
            Self::VectorReconcile => "vector_reconcile",
            Self::AutoTune => "auto_tune",
        }
    }
}

/// Intervals for each job family.
#[derive(Debug, Clone)]
pub struct JobsConfig {
    pub enabled: bool,
    pub enrichment_every: Duration,
    pub topic_compaction_every: Duration,
    pub domain_compaction_every: Duration,
    pub decay_every: Duration,
    pub dedup_every: Duration,
    pub retention_every: Duration,
    pub reconcile_every: Duration,
    pub tune_every: Duration,
    /// SHORT-tier items older than this are retired by retention cleanup.
    pub retention_short_days: i64,
    /// Batch size for full-table sweeps.
    pub sweep_batch: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            enrichment_every: Duration::from_secs(3600),
            topic_compaction_every: Duration::from_secs(24 * 3600),
            domain_compaction_every: Duration::from_secs(7 * 24 * 3600),
            decay_every: Duration::from_secs(24 * 3600),
            dedup_every: Duration::from_secs(7 * 24 * 3600),
            retention_every: Duration::from_secs(7 * 24 * 3600),
            reconcile_every: Duration::from_secs(6 * 3600),
            tune_every: Duration::from_secs(3600),
            retention_short_days: 90,
            sweep_batch: 10_000,
        }
    }
}

/// Background job driver.
pub struct JobScheduler {
    relational: Arc<dyn RelationalStore>,
    memory: Arc<MemoryService>,
    extractor: Arc<KnowledgeExtractor>,
    compactor: Arc<KnowledgeCompactor>,
    tuner: Arc<AutoTuner>,
    audit: AuditLogger,
    scorer: ContextScorer,
    config: JobsConfig,
}

impl JobScheduler {
    #[must_use]
    pub fn new(
        relational: Arc<dyn RelationalStore>,
        memory: Arc<MemoryService>,
        extractor: Arc<KnowledgeExtractor>,
        compactor: Arc<KnowledgeCompactor>,
        tuner: Arc<AutoTuner>,
        config: JobsConfig,
    ) -> Self {
        Self {
            audit: AuditLogger::new(Arc::clone(&relational)),
            relational,
            memory,
            extractor,
            compactor,
            tuner,
            scorer: ContextScorer::new(),
            config,
        }
    }

    /// Spawn one background loop per job family. Returns the handles so
    /// the owner can abort them at shutdown.
    pub fn start(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        if !self.config.enabled {
            info!("background jobs disabled by configuration");
            return Vec::new();
        }

        let schedule = [
            (JobKind::Enrichment, self.config.enrichment_every),
            (JobKind::TopicCompaction, self.config.topic_compaction_every),
            (JobKind::DomainCompaction, self.config.domain_compaction_every),
            (JobKind::ScoreDecay, self.config.decay_every),
            (JobKind::DedupSweep, self.config.dedup_every),
            (JobKind::RetentionCleanup, self.config.retention_every),
            (JobKind::VectorReconcile, self.config.reconcile_every),
            (JobKind::AutoTune, self.config.tune_every),
        ];

        schedule
            .into_iter()
            .map(|(kind, period)| {
                let scheduler = Arc::clone(&self);
                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(period);
                    // Consume the immediate first tick; jobs run after one
                    // full period, not at startup.
                    interval.tick().await;
                    loop {
                        interval.tick().await;
                        scheduler.run(kind).await;
                    }
                })
            })
            .collect()
    }

    /// Run one job now, bracketed by audit records.
    pub async fn run(&self, kind: JobKind) {
        self.audit
            .log_transform(
                "jobs",
                &format!("{}_start", kind.as_str()),
                "scheduler",
                0,
                DataClassification::Internal,
                json!({}),
            )
            .await;

        let stats = match kind {
            JobKind::Enrichment => self.run_enrichment().await,
            JobKind::TopicCompaction => self.run_topic_compaction().await,
            JobKind::DomainCompaction => self.run_domain_compaction().await,
            JobKind::ScoreDecay => self.run_decay().await,
            JobKind::DedupSweep => self.run_dedup().await,
            JobKind::RetentionCleanup => self.run_retention().await,
            JobKind::VectorReconcile => self.run_reconcile().await,
            JobKind::AutoTune => self.run_tuner().await,
        };

        self.audit
            .log_transform(
                "jobs",
                &format!("{}_complete", kind.as_str()),
                "scheduler",
                0,
                DataClassification::Internal,
                stats,
            )
            .await;
    }

    async fn users(&self) -> Vec<Uuid> {
        match self.relational.list_active_users().await {
            Ok(users) => users,
            Err(e) => {
                warn!(error = %e, "user listing failed; skipping per-user job bodies");
                Vec::new()
            }
        }
    }

    async fn run_enrichment(&self) -> serde_json::Value {
        let report = self.extractor.run_sweep(self.config.sweep_batch).await;
        json!({
            "status": "ok",
            "processed": report.processed,
            "extracted": report.extracted,
            "skipped": report.skipped,
            "errors": report.errors,
        })
    }

    async fn run_topic_compaction(&self) -> serde_json::Value {
        let mut topics = 0;
        let mut errors = 0;
        let mut cost = 0.0;
        for user in self.users().await {
            let report = self.compactor.compact_to_topics(&user.to_string()).await;
            topics += report.topics_created;
            errors += report.errors;
            cost += report.cost_usd;
        }
        json!({"status": "ok", "topics_created": topics, "errors": errors, "cost_usd": cost})
    }

    async fn run_domain_compaction(&self) -> serde_json::Value {
        let mut domains = 0;
        let mut errors = 0;
        for user in self.users().await {
            let report = self.compactor.compact_to_domains(&user.to_string()).await;
            domains += report.domains_created;
            errors += report.errors;
        }
        json!({"status": "ok", "domains_created": domains, "errors": errors})
    }

    async fn run_decay(&self) -> serde_json::Value {
        let report = self.memory.decay_scores(&self.scorer, self.config.sweep_batch).await;
        json!({
            "status": "ok",
            "scanned": report.scanned,
            "updated": report.updated,
            "errors": report.errors,
        })
    }

    /// Remove redundant `(user, content_hash)` rows that predate the
    /// unique constraint. Oldest row wins.
    async fn run_dedup(&self) -> serde_json::Value {
        let items = match self.relational.all_memories(self.config.sweep_batch).await {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "dedup scan failed");
                return json!({"status": "error"});
            }
        };

        let mut seen: HashMap<(Uuid, String), Uuid> = HashMap::new();
        let mut removed = 0;
        let mut errors = 0;
        for item in items {
            let key = (item.user_id, item.content_hash.clone());
            if seen.contains_key(&key) {
                match self.memory.delete(item.memory_id).await {
                    Ok(_) => removed += 1,
                    Err(e) => {
                        warn!(memory_id = %item.memory_id, error = %e, "dedup delete failed");
                        errors += 1;
                    }
                }
            } else {
                seen.insert(key, item.memory_id);
            }
        }
        json!({"status": "ok", "removed": removed, "errors": errors})
    }

    async fn run_retention(&self) -> serde_json::Value {
        let items = match self.relational.all_memories(self.config.sweep_batch).await {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "retention scan failed");
                return json!({"status": "error"});
            }
        };

        let cutoff = Utc::now() - ChronoDuration::days(self.config.retention_short_days);
        let mut removed = 0;
        let mut errors = 0;
        for item in items {
            if item.tier == MemoryTier::Short && item.created_at < cutoff {
                match self.memory.delete(item.memory_id).await {
                    Ok(_) => removed += 1,
                    Err(e) => {
                        warn!(memory_id = %item.memory_id, error = %e, "retention delete failed");
                        errors += 1;
                    }
                }
            }
        }
        json!({"status": "ok", "removed": removed, "errors": errors})
    }

    async fn run_reconcile(&self) -> serde_json::Value {
        let report = self.memory.reconcile_vectors(self.config.sweep_batch).await;
        json!({
            "status": "ok",
            "scanned": report.scanned,
            "repaired": report.repaired,
            "errors": report.errors,
        })
    }

    async fn run_tuner(&self) -> serde_json::Value {
        match self.tuner.run_cycle().await {
            Ok(Some(decision)) => json!({
                "status": "ok",
                "action": decision.action.as_str(),
                "reason": decision.reason,
            }),
            Ok(None) => json!({"status": "ok", "action": "none"}),
            Err(e) => {
                warn!(error = %e, "tuner cycle failed");
                json!({"status": "error", "error": e.to_string()})
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLogger as Audit;
    use crate::compaction::CompactionConfig;
    use crate::config::{RuntimeOverrides, Settings};
    use crate::crypto::EncryptionManager;
    use crate::embeddings::MockEmbeddingProvider;
    use crate::llm::MockLlmProvider;
    use crate::memory::CreateMemory;
    use crate::storage::{InMemoryRelationalStore, InMemoryVectorStore};
    use crate::types::AuditKind;

    struct Fixture {
        scheduler: Arc<JobScheduler>,
        relational: Arc<InMemoryRelationalStore>,
        memory: Arc<MemoryService>,
    }

    fn fixture() -> Fixture {
        let relational = Arc::new(InMemoryRelationalStore::new());
        let vectors = Arc::new(InMemoryVectorStore::new());
        let embedder = Arc::new(MockEmbeddingProvider::new());
        let memory = Arc::new(MemoryService::new(
            relational.clone(),
            vectors.clone(),
            embedder.clone(),
            Arc::new(EncryptionManager::generate()),
            Audit::new(relational.clone()),
        ));
        let extractor = Arc::new(KnowledgeExtractor::new(
            relational.clone(),
            vectors.clone(),
            embedder.clone(),
            Arc::new(MockLlmProvider::new()),
            "claude".to_string(),
        ));
        let compactor = Arc::new(KnowledgeCompactor::new(
            vectors,
            embedder,
            Arc::new(MockLlmProvider::new()),
            CompactionConfig::default(),
        ));
        let tuner = Arc::new(AutoTuner::new(
            relational.clone(),
            Arc::new(RuntimeOverrides::new()),
            Settings::default(),
        ));
        let scheduler = Arc::new(JobScheduler::new(
            relational.clone(),
            memory.clone(),
            extractor,
            compactor,
            tuner,
            JobsConfig::default(),
        ));
        Fixture { scheduler, relational, memory }
    }

    #[tokio::test]
    async fn runs_are_bracketed_by_audit_records() {
        let f = fixture();
        f.scheduler.run(JobKind::ScoreDecay).await;

        let events = f.relational.list_audit(10).await.unwrap();
        let ops: Vec<&str> = events.iter().map(|e| e.operation.as_str()).collect();
        assert!(ops.contains(&"score_decay_start"));
        assert!(ops.contains(&"score_decay_complete"));
        assert!(events.iter().all(|e| e.kind == AuditKind::Transform));
    }

    #[tokio::test]
    async fn decay_refreshes_stored_scores() {
        let f = fixture();
        let user = Uuid::new_v4();
        f.memory
            .create(CreateMemory::new(user, "decaying memory"))
            .await
            .unwrap()
            .unwrap();

        f.scheduler.run(JobKind::ScoreDecay).await;

        let items = f.relational.list_memories(user, 10, 0).await.unwrap();
        // Fresh item, neutral similarity: score moved off the initial 0.0.
        assert!(items[0].crs_score > 0.0);
    }

    #[tokio::test]
    async fn retention_removes_only_stale_short_items() {
        let f = fixture();
        let user = Uuid::new_v4();
        let id = f
            .memory
            .create(CreateMemory::new(user, "short-lived").with_tier(MemoryTier::Short))
            .await
            .unwrap()
            .unwrap();
        let keep = f
            .memory
            .create(CreateMemory::new(user, "long-lived").with_tier(MemoryTier::Long))
            .await
            .unwrap()
            .unwrap();

        // Age the short item past the cutoff.
        let mut item = f.relational.get_memory(id).await.unwrap().unwrap();
        item.created_at = Utc::now() - ChronoDuration::days(120);
        f.relational.update_memory(&item).await.unwrap();
        let mut old_long = f.relational.get_memory(keep).await.unwrap().unwrap();
        old_long.created_at = Utc::now() - ChronoDuration::days(120);
        f.relational.update_memory(&old_long).await.unwrap();

        f.scheduler.run(JobKind::RetentionCleanup).await;

        assert!(f.relational.get_memory(id).await.unwrap().is_none());
        assert!(f.relational.get_memory(keep).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn disabled_scheduler_spawns_nothing() {
        let relational = Arc::new(InMemoryRelationalStore::new());
        let vectors = Arc::new(InMemoryVectorStore::new());
        let embedder = Arc::new(MockEmbeddingProvider::new());
        let memory = Arc::new(MemoryService::new(
            relational.clone(),
            vectors.clone(),
            embedder.clone(),
            Arc::new(EncryptionManager::generate()),
            Audit::new(relational.clone()),
        ));
        let scheduler = Arc::new(JobScheduler::new(
            relational.clone(),
            memory,
            Arc::new(KnowledgeExtractor::new(
                relational.clone(),
                vectors.clone(),
                embedder.clone(),
                Arc::new(MockLlmProvider::new()),
                "claude".to_string(),
            )),
            Arc::new(KnowledgeCompactor::new(
                vectors,
                embedder,
                Arc::new(MockLlmProvider::new()),
                CompactionConfig::default(),
            )),
            Arc::new(AutoTuner::new(
                relational,
                Arc::new(RuntimeOverrides::new()),
                Settings::default(),
            )),
            JobsConfig { enabled: false, ..Default::default() },
        ));
        assert!(scheduler.start().is_empty());
    }
}
