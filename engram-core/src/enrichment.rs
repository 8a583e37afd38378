//! Knowledge extraction (enrichment)
//!
//! Every answered query leaves a metrics row with
//! `enrichment_status = pending`. This pipeline distills those answers
//! into the knowledge collection: an LLM call extracts the canonical
//! query, a compact answer summary, the topic cluster and related topics,
//! and the entry is embedded and written to the vector store. Knowledge
//! entries are created only here and by the compaction engine.
//!
//! Low-confidence answers are skipped (`enrichment_status = skipped`);
//! extraction failures leave the row pending for the next sweep. The run
//! returns statistics, never an error.

use crate::embeddings::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::llm::{extract_json, GenerationRequest, LlmProvider};
use crate::quality::CONFIDENCE_THRESHOLD;
use crate::storage::{Collection, RelationalStore, VectorStore};
use crate::types::QueryRecord;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Terminal enrichment states.
const STATUS_COMPLETED: &str = "completed";
const STATUS_SKIPPED: &str = "skipped";

/// Statistics from one enrichment sweep.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnrichmentReport {
    pub processed: usize,
    pub extracted: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Extracts distilled knowledge entries from answered queries.
pub struct KnowledgeExtractor {
    relational: Arc<dyn RelationalStore>,
    vectors: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LlmProvider>,
    model: String,
}

impl KnowledgeExtractor {
    #[must_use]
    pub fn new(
        relational: Arc<dyn RelationalStore>,
        vectors: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LlmProvider>,
        model: String,
    ) -> Self {
        Self { relational, vectors, embedder, llm, model }
    }

    /// Process up to `batch` pending queries.
    pub async fn run_sweep(&self, batch: usize) -> EnrichmentReport {
        let mut report = EnrichmentReport::default();

        let pending = match self.relational.list_pending_enrichment(batch).await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "enrichment scan failed");
                report.errors += 1;
                return report;
            }
        };

        for query in pending {
            report.processed += 1;

            // Low-confidence answers would pollute the knowledge base.
            if query.confidence.unwrap_or(0.0) < CONFIDENCE_THRESHOLD {
                if let Err(e) = self
                    .relational
                    .set_enrichment_status(query.query_id, STATUS_SKIPPED)
                    .await
                {
                    warn!(query_id = %query.query_id, error = %e, "skip mark failed");
                    report.errors += 1;
                } else {
                    report.skipped += 1;
                }
                continue;
            }

            match self.extract_one(&query).await {
                Ok(()) => {
                    if let Err(e) = self
                        .relational
                        .set_enrichment_status(query.query_id, STATUS_COMPLETED)
                        .await
                    {
                        warn!(query_id = %query.query_id, error = %e, "completion mark failed");
                        report.errors += 1;
                    } else {
                        report.extracted += 1;
                    }
                }
                Err(e) => {
                    // Left pending; the next sweep retries.
                    warn!(query_id = %query.query_id, error = %e, "extraction failed");
                    report.errors += 1;
                }
            }
        }

        info!(
            processed = report.processed,
            extracted = report.extracted,
            skipped = report.skipped,
            errors = report.errors,
            "enrichment sweep complete"
        );
        report
    }

    async fn extract_one(&self, query: &QueryRecord) -> Result<()> {
        let prompt = format!(
            "Distill this answered question into a reusable knowledge entry.\n\n\
             Question: {}\n\n\
             Respond as JSON with:\n\
             1. \"canonical_query\": the question rephrased in its most general form\n\
             2. \"answer_summary\": a 1-2 sentence factual summary of the answer\n\
             3. \"topic_cluster\": a single lowercase topic slug\n\
             4. \"related_topics\": up to five related topic slugs\n\
             5. \"extraction_confidence\": your confidence in the extraction, 0.0-1.0\n",
            query.query_text
        );

        let request = GenerationRequest::new(prompt, self.model.clone()).with_max_tokens(600);
        let completion = self.llm.generate(&request).await?;

        let parsed = extract_json(&completion.text)
            .ok_or_else(|| Error::Llm("extraction response carried no JSON object".into()))?;

        let canonical = parsed["canonical_query"]
            .as_str()
            .unwrap_or(&query.query_text)
            .to_string();
        let summary = parsed["answer_summary"].as_str().unwrap_or_default().to_string();
        if summary.is_empty() {
            return Err(Error::Llm("extraction produced an empty answer summary".into()));
        }

        let embedding = self.embedder.embed(&format!("{canonical}\n{summary}")).await?;
        let properties = json!({
            "canonical_query": canonical,
            "answer_summary": summary,
            "topic_cluster": parsed["topic_cluster"].as_str().unwrap_or("general"),
            "primary_intent": query.intent.map(|i| i.to_string()).unwrap_or_default(),
            "related_topics": parsed["related_topics"].clone(),
            "extraction_confidence": parsed["extraction_confidence"].as_f64().unwrap_or(0.5),
            "user_id": query.user_id.to_string(),
            "created_at": Utc::now().to_rfc3339(),
        });
        self.vectors.insert(Collection::Knowledge, embedding.vector, properties).await?;

        debug!(query_id = %query.query_id, "knowledge entry extracted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::content_hash;
    use crate::embeddings::MockEmbeddingProvider;
    use crate::llm::MockLlmProvider;
    use crate::storage::{InMemoryRelationalStore, InMemoryVectorStore};
    use uuid::Uuid;

    fn extractor(
        relational: Arc<InMemoryRelationalStore>,
        vectors: Arc<InMemoryVectorStore>,
        llm: Arc<dyn LlmProvider>,
    ) -> KnowledgeExtractor {
        KnowledgeExtractor::new(
            relational,
            vectors,
            Arc::new(MockEmbeddingProvider::new()),
            llm,
            "claude".to_string(),
        )
    }

    async fn seed_query(
        store: &InMemoryRelationalStore,
        confidence: f64,
        response_source: &str,
    ) -> Uuid {
        let mut record = QueryRecord::pending(
            Uuid::new_v4(),
            None,
            "What is a pod in Kubernetes?",
            content_hash("What is a pod in Kubernetes?"),
        );
        record.response_source = response_source.to_string();
        record.confidence = Some(confidence);
        store.insert_query(&record).await.unwrap();
        record.query_id
    }

    fn extraction_llm() -> Arc<MockLlmProvider> {
        Arc::new(MockLlmProvider::with_response(
            r#"{"canonical_query": "What is a Kubernetes pod?",
                "answer_summary": "The smallest deployable unit in Kubernetes.",
                "topic_cluster": "kubernetes",
                "related_topics": ["containers"],
                "extraction_confidence": 0.92}"#,
        ))
    }

    #[tokio::test]
    async fn confident_answers_become_knowledge_entries() {
        let relational = Arc::new(InMemoryRelationalStore::new());
        let vectors = Arc::new(InMemoryVectorStore::new());
        let query_id = seed_query(&relational, 0.95, "fresh_generation").await;

        let report = extractor(relational.clone(), vectors.clone(), extraction_llm())
            .run_sweep(10)
            .await;

        assert_eq!(report.extracted, 1);
        assert_eq!(vectors.count(Collection::Knowledge).await.unwrap(), 1);

        let entries = vectors.list(Collection::Knowledge, 10, None).await.unwrap();
        assert_eq!(entries[0].properties["topic_cluster"], "kubernetes");

        let query = relational.get_query(query_id).await.unwrap().unwrap();
        assert_eq!(query.enrichment_status, "completed");
    }

    #[tokio::test]
    async fn low_confidence_answers_are_skipped() {
        let relational = Arc::new(InMemoryRelationalStore::new());
        let vectors = Arc::new(InMemoryVectorStore::new());
        let query_id = seed_query(&relational, 0.5, "fresh_generation").await;

        let report = extractor(relational.clone(), vectors.clone(), extraction_llm())
            .run_sweep(10)
            .await;

        assert_eq!(report.skipped, 1);
        assert_eq!(report.extracted, 0);
        assert_eq!(vectors.count(Collection::Knowledge).await.unwrap(), 0);
        let query = relational.get_query(query_id).await.unwrap().unwrap();
        assert_eq!(query.enrichment_status, "skipped");
    }

    #[tokio::test]
    async fn cached_and_errored_queries_are_ignored() {
        let relational = Arc::new(InMemoryRelationalStore::new());
        let vectors = Arc::new(InMemoryVectorStore::new());
        seed_query(&relational, 0.95, "semantic_cache_hit").await;
        seed_query(&relational, 0.95, "error").await;

        let report = extractor(relational, vectors, extraction_llm()).run_sweep(10).await;
        assert_eq!(report.processed, 0);
    }

    #[tokio::test]
    async fn extraction_failure_leaves_the_row_pending() {
        let relational = Arc::new(InMemoryRelationalStore::new());
        let vectors = Arc::new(InMemoryVectorStore::new());
        let query_id = seed_query(&relational, 0.95, "fresh_generation").await;

        let report = extractor(
            relational.clone(),
            vectors,
            Arc::new(MockLlmProvider::failing()),
        )
        .run_sweep(10)
        .await;

        assert_eq!(report.errors, 1);
        let query = relational.get_query(query_id).await.unwrap().unwrap();
        assert_eq!(query.enrichment_status, "pending");
    }
}
