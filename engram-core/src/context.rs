//! Application context
//!
//! Explicit wiring of the platform's services: stores, providers, crypto,
//! gateway, compactor, tuner and jobs, constructed once at startup and
//! passed by reference. Initialization order is deterministic; dropping
//! the context tears everything down in reverse.

use crate::audit::AuditLogger;
use crate::compaction::{CompactionConfig, KnowledgeCompactor};
use crate::config::{RuntimeOverrides, Settings};
use crate::crypto::EncryptionManager;
use crate::embeddings::EmbeddingProvider;
use crate::enrichment::KnowledgeExtractor;
use crate::error::Result;
use crate::feedback::FeedbackAggregator;
use crate::gateway::Gateway;
use crate::jobs::{JobScheduler, JobsConfig};
use crate::llm::LlmProvider;
use crate::memory::MemoryService;
use crate::storage::{RelationalStore, VectorStore};
use crate::tuner::AutoTuner;
use std::sync::Arc;

/// Fully wired application context.
pub struct AppContext {
    pub settings: Settings,
    pub overrides: Arc<RuntimeOverrides>,
    pub relational: Arc<dyn RelationalStore>,
    pub vectors: Arc<dyn VectorStore>,
    pub memory: Arc<MemoryService>,
    pub gateway: Arc<Gateway>,
    pub feedback: Arc<FeedbackAggregator>,
    pub extractor: Arc<KnowledgeExtractor>,
    pub compactor: Arc<KnowledgeCompactor>,
    pub tuner: Arc<AutoTuner>,
    pub jobs: Arc<JobScheduler>,
}

impl AppContext {
    /// Wire the platform from its leaf dependencies.
    ///
    /// The encryption key comes from `settings.encryption_key_b64` when
    /// present; otherwise a fresh key is generated (development only —
    /// stored ciphertext will not survive a restart).
    pub fn build(
        settings: Settings,
        relational: Arc<dyn RelationalStore>,
        vectors: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LlmProvider>,
    ) -> Result<Self> {
        let encryption = Arc::new(match &settings.encryption_key_b64 {
            Some(key) => EncryptionManager::from_base64_key(key)?,
            None => {
                tracing::warn!("no ENCRYPTION_KEY_B64 set; generated an ephemeral key");
                EncryptionManager::generate()
            }
        });

        let overrides = Arc::new(RuntimeOverrides::new());
        let audit = AuditLogger::new(Arc::clone(&relational));

        let memory = Arc::new(MemoryService::new(
            Arc::clone(&relational),
            Arc::clone(&vectors),
            Arc::clone(&embedder),
            encryption,
            audit,
        ));

        let gateway = Arc::new(Gateway::new(
            Arc::clone(&relational),
            Arc::clone(&vectors),
            Arc::clone(&embedder),
            Arc::clone(&llm),
            Arc::clone(&overrides),
            settings.clone(),
        ));

        let feedback = Arc::new(FeedbackAggregator::new(Arc::clone(&relational)));

        let extractor = Arc::new(KnowledgeExtractor::new(
            Arc::clone(&relational),
            Arc::clone(&vectors),
            Arc::clone(&embedder),
            Arc::clone(&llm),
            settings.default_model.clone(),
        ));

        let compactor = Arc::new(KnowledgeCompactor::new(
            Arc::clone(&vectors),
            Arc::clone(&embedder),
            llm,
            CompactionConfig {
                synthesis_budget_usd: settings.synthesis_budget_usd,
                llm_model: settings.default_model.clone(),
                ..Default::default()
            },
        ));

        let tuner = Arc::new(AutoTuner::new(
            Arc::clone(&relational),
            Arc::clone(&overrides),
            settings.clone(),
        ));

        let jobs = Arc::new(JobScheduler::new(
            Arc::clone(&relational),
            Arc::clone(&memory),
            Arc::clone(&extractor),
            Arc::clone(&compactor),
            Arc::clone(&tuner),
            JobsConfig { enabled: settings.jobs_enabled, ..Default::default() },
        ));

        Ok(Self {
            settings,
            overrides,
            relational,
            vectors,
            memory,
            gateway,
            feedback,
            extractor,
            compactor,
            tuner,
            jobs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::MockEmbeddingProvider;
    use crate::llm::MockLlmProvider;
    use crate::storage::{InMemoryRelationalStore, InMemoryVectorStore};

    #[tokio::test]
    async fn context_wires_end_to_end() {
        let context = AppContext::build(
            Settings::default(),
            Arc::new(InMemoryRelationalStore::new()),
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(MockEmbeddingProvider::new()),
            Arc::new(MockLlmProvider::new()),
        )
        .unwrap();

        let user = uuid::Uuid::new_v4();
        let id = context
            .memory
            .create(crate::memory::CreateMemory::new(user, "wired"))
            .await
            .unwrap();
        assert!(id.is_some());
    }
}
