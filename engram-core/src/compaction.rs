//! Knowledge compaction
//!
//! Log-structured consolidation of knowledge from volatile to stable
//! levels:
//!
//! - Level 1 (Raw): individual Q&A pairs, high detail
//! - Level 2 (Knowledge): extracted facts
//! - Level 3 (Topics): synthesized topic summaries
//! - Level 4 (Domains): cross-topic domain maps
//!
//! The level 2→3 pass clusters knowledge entries by primary topic and
//! synthesizes each sufficiently large cluster with an LLM call; the 3→4
//! pass synthesizes one domain map when enough topic summaries exist. Each
//! run is budgeted in dollars: synthesis stops cleanly when the budget is
//! spent. Individual synthesis failures increment an error counter and
//! skip to the next cluster — a run returns statistics, never an error.

use crate::constants::defaults;
use crate::embeddings::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::llm::{extract_json, GenerationRequest, LlmProvider};
use crate::storage::{Collection, SearchFilter, VectorStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Configuration for one compaction run.
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// Minimum knowledge entries to form a topic summary.
    pub min_entries_for_topic: usize,
    /// Minimum topic summaries to form a domain map.
    pub min_topics_for_domain: usize,
    /// Max LLM spend per run, in USD.
    pub synthesis_budget_usd: f64,
    /// Max entries fetched per run.
    pub max_entries_per_batch: usize,
    /// Synthesis model.
    pub llm_model: String,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            min_entries_for_topic: defaults::MIN_ENTRIES_FOR_TOPIC,
            min_topics_for_domain: defaults::MIN_TOPICS_FOR_DOMAIN,
            synthesis_budget_usd: defaults::SYNTHESIS_BUDGET_USD,
            max_entries_per_batch: defaults::MAX_ENTRIES_PER_BATCH,
            llm_model: defaults::DEFAULT_MODEL.to_string(),
        }
    }
}

/// A synthesized topic summary (level 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicSummary {
    pub id: Uuid,
    pub topic_slug: String,
    pub summary_text: String,
    pub user_id: String,
    /// Main concepts mapped to related concepts.
    pub entity_map: HashMap<String, Vec<String>>,
    /// Number of source entries in the cluster.
    pub knowledge_depth: usize,
    pub knowledge_gaps: Vec<String>,
    pub source_entry_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// A synthesized domain map (level 4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainMap {
    pub id: Uuid,
    pub domain_name: String,
    pub user_id: String,
    /// Topic relationship topology.
    pub topology: Value,
    pub cross_topic_relationships: Vec<String>,
    pub strengths: Vec<String>,
    pub gaps: Vec<String>,
    pub emerging_themes: Vec<String>,
    pub source_topic_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Statistics from a level 2→3 run.
#[derive(Debug, Clone, Default)]
pub struct TopicCompactionReport {
    pub topics_created: usize,
    pub entries_processed: usize,
    pub clusters_found: usize,
    pub cost_usd: f64,
    pub budget_remaining_usd: f64,
    pub errors: usize,
    pub budget_exhausted: bool,
}

/// Statistics from a level 3→4 run.
#[derive(Debug, Clone, Default)]
pub struct DomainCompactionReport {
    pub domains_created: usize,
    pub topics_processed: usize,
    pub cost_usd: f64,
    pub errors: usize,
}

/// One fetched knowledge entry, pre-clustering.
#[derive(Debug, Clone)]
struct KnowledgeEntry {
    id: String,
    content: String,
    topic: String,
}

/// Compacts knowledge from level 2 → 3 → 4.
pub struct KnowledgeCompactor {
    vectors: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LlmProvider>,
    config: CompactionConfig,
}

impl KnowledgeCompactor {
    #[must_use]
    pub fn new(
        vectors: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LlmProvider>,
        config: CompactionConfig,
    ) -> Self {
        Self { vectors, embedder, llm, config }
    }

    /// Compact knowledge entries into topic summaries (level 2 → 3).
    pub async fn compact_to_topics(&self, user_id: &str) -> TopicCompactionReport {
        let mut report = TopicCompactionReport {
            budget_remaining_usd: self.config.synthesis_budget_usd,
            ..Default::default()
        };

        let entries = match self.fetch_knowledge_entries(user_id).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "knowledge fetch failed; empty compaction run");
                report.errors += 1;
                return report;
            }
        };
        report.entries_processed = entries.len();

        let clusters = cluster_by_topic(entries);
        let compactable: Vec<(&String, &Vec<KnowledgeEntry>)> = clusters
            .iter()
            .filter(|(_, entries)| entries.len() >= self.config.min_entries_for_topic)
            .collect();
        report.clusters_found = compactable.len();

        for (topic, cluster) in compactable {
            if report.cost_usd >= self.config.synthesis_budget_usd {
                info!(
                    cost = report.cost_usd,
                    budget = self.config.synthesis_budget_usd,
                    "synthesis budget reached; stopping run"
                );
                report.budget_exhausted = true;
                break;
            }

            match self.synthesize_topic(topic, cluster, user_id, &mut report.cost_usd).await {
                Ok(summary) => {
                    if let Err(e) = self.save_topic_summary(&summary).await {
                        warn!(topic = %topic, error = %e, "failed to save topic summary");
                        report.errors += 1;
                    } else {
                        report.topics_created += 1;
                    }
                }
                Err(e) => {
                    warn!(topic = %topic, error = %e, "topic synthesis failed; skipping");
                    report.errors += 1;
                }
            }
        }

        report.budget_remaining_usd =
            (self.config.synthesis_budget_usd - report.cost_usd).max(0.0);
        info!(
            topics = report.topics_created,
            clusters = report.clusters_found,
            cost = report.cost_usd,
            errors = report.errors,
            "topic compaction complete"
        );
        report
    }

    /// Compact topic summaries into a domain map (level 3 → 4).
    pub async fn compact_to_domains(&self, user_id: &str) -> DomainCompactionReport {
        let mut report = DomainCompactionReport::default();

        let filter = SearchFilter::new().with_equals("user_id", user_id);
        let topics = match self.vectors.list(Collection::Topics, 50, Some(filter)).await {
            Ok(objects) => objects,
            Err(e) => {
                warn!(error = %e, "topic fetch failed; empty domain run");
                report.errors += 1;
                return report;
            }
        };
        report.topics_processed = topics.len();

        if topics.len() < self.config.min_topics_for_domain {
            debug!(
                topics = topics.len(),
                needed = self.config.min_topics_for_domain,
                "not enough topics for a domain map"
            );
            return report;
        }

        let descriptions: Vec<(String, String, String)> = topics
            .iter()
            .take(10)
            .map(|t| {
                (
                    t.properties["topic_slug"].as_str().unwrap_or_default().to_string(),
                    t.properties["summary_text"].as_str().unwrap_or_default().to_string(),
                    t.id.to_string(),
                )
            })
            .collect();

        match self.synthesize_domain(&descriptions, user_id, &mut report.cost_usd).await {
            Ok(domain) => {
                if let Err(e) = self.save_domain_map(&domain).await {
                    warn!(domain = %domain.domain_name, error = %e, "failed to save domain map");
                    report.errors += 1;
                } else {
                    report.domains_created += 1;
                }
            }
            Err(e) => {
                warn!(error = %e, "domain synthesis failed");
                report.errors += 1;
            }
        }

        report
    }

    async fn fetch_knowledge_entries(&self, user_id: &str) -> Result<Vec<KnowledgeEntry>> {
        let filter = SearchFilter::new().with_equals("user_id", user_id);
        let objects = self
            .vectors
            .list(Collection::Knowledge, self.config.max_entries_per_batch, Some(filter))
            .await?;

        Ok(objects
            .into_iter()
            .filter_map(|object| {
                let topic = object.properties["topic_cluster"].as_str()?.to_string();
                if topic.is_empty() {
                    return None;
                }
                let canonical =
                    object.properties["canonical_query"].as_str().unwrap_or_default();
                let summary = object.properties["answer_summary"].as_str().unwrap_or_default();
                Some(KnowledgeEntry {
                    id: object.id.to_string(),
                    content: format!("{canonical}\n{summary}"),
                    topic,
                })
            })
            .collect())
    }

    async fn synthesize_topic(
        &self,
        topic: &str,
        cluster: &[KnowledgeEntry],
        user_id: &str,
        run_cost: &mut f64,
    ) -> Result<TopicSummary> {
        let combined: String = cluster
            .iter()
            .take(20)
            .map(|e| format!("- {}\n", truncate(&e.content, 500)))
            .collect();

        let prompt = format!(
            "Synthesize the following knowledge about \"{topic}\" into a coherent summary.\n\n\
             Knowledge entries:\n{combined}\n\
             Respond as JSON with:\n\
             1. \"summary\": a 2-3 sentence synthesis of the key knowledge\n\
             2. \"entity_map\": a dict mapping main concepts to related concepts\n\
             3. \"knowledge_gaps\": topics that seem incomplete or missing\n"
        );

        let request = GenerationRequest::new(prompt, self.config.llm_model.clone())
            .with_max_tokens(1000);
        let completion = self.llm.generate(&request).await?;
        *run_cost += completion.cost_usd.max(0.001);

        let parsed = extract_json(&completion.text)
            .ok_or_else(|| Error::Llm("synthesis response carried no JSON object".into()))?;

        let entity_map = parsed["entity_map"]
            .as_object()
            .map(|map| {
                map.iter()
                    .map(|(k, v)| {
                        let related = v
                            .as_array()
                            .map(|a| {
                                a.iter().filter_map(|x| x.as_str().map(String::from)).collect()
                            })
                            .unwrap_or_default();
                        (k.clone(), related)
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(TopicSummary {
            id: Uuid::new_v4(),
            topic_slug: topic.to_string(),
            summary_text: parsed["summary"].as_str().unwrap_or_default().to_string(),
            user_id: user_id.to_string(),
            entity_map,
            knowledge_depth: cluster.len(),
            knowledge_gaps: string_list(&parsed["knowledge_gaps"]),
            source_entry_ids: cluster.iter().map(|e| e.id.clone()).collect(),
            created_at: Utc::now(),
        })
    }

    async fn synthesize_domain(
        &self,
        topics: &[(String, String, String)],
        user_id: &str,
        run_cost: &mut f64,
    ) -> Result<DomainMap> {
        let descriptions: String = topics
            .iter()
            .map(|(slug, summary, _)| format!("- {slug}: {}\n", truncate(summary, 200)))
            .collect();

        let prompt = format!(
            "Analyze these topic summaries and identify the overarching domain and \
             relationships.\n\nTopics:\n{descriptions}\n\
             Respond as JSON with:\n\
             1. \"domain_name\": a descriptive name for this knowledge domain\n\
             2. \"topology\": a dict showing how topics relate to each other\n\
             3. \"cross_topic_relationships\": insights connecting topics\n\
             4. \"strengths\": well-covered areas\n\
             5. \"gaps\": areas needing more knowledge\n\
             6. \"emerging_themes\": patterns or themes across topics\n"
        );

        let request = GenerationRequest::new(prompt, self.config.llm_model.clone())
            .with_max_tokens(1500);
        let completion = self.llm.generate(&request).await?;
        *run_cost += completion.cost_usd.max(0.002);

        let parsed = extract_json(&completion.text)
            .ok_or_else(|| Error::Llm("domain response carried no JSON object".into()))?;

        Ok(DomainMap {
            id: Uuid::new_v4(),
            domain_name: parsed["domain_name"]
                .as_str()
                .unwrap_or("Unknown Domain")
                .to_string(),
            user_id: user_id.to_string(),
            topology: parsed["topology"].clone(),
            cross_topic_relationships: string_list(&parsed["cross_topic_relationships"]),
            strengths: string_list(&parsed["strengths"]),
            gaps: string_list(&parsed["gaps"]),
            emerging_themes: string_list(&parsed["emerging_themes"]),
            source_topic_ids: topics.iter().map(|(_, _, id)| id.clone()).collect(),
            created_at: Utc::now(),
        })
    }

    async fn save_topic_summary(&self, summary: &TopicSummary) -> Result<()> {
        let embedding = self.embedder.embed(&summary.summary_text).await?;
        let properties = json!({
            "topic_slug": summary.topic_slug.clone(),
            "summary_text": summary.summary_text.clone(),
            "user_id": summary.user_id.clone(),
            "entity_map": serde_json::to_string(&summary.entity_map)?,
            "knowledge_depth": summary.knowledge_depth,
            "knowledge_gaps": summary.knowledge_gaps.clone(),
            "source_entry_ids": summary.source_entry_ids.clone(),
            "created_at": summary.created_at.to_rfc3339(),
        });
        self.vectors.insert(Collection::Topics, embedding.vector, properties).await?;
        Ok(())
    }

    async fn save_domain_map(&self, domain: &DomainMap) -> Result<()> {
        let text = format!("{}\n{}", domain.domain_name, domain.emerging_themes.join(", "));
        let embedding = self.embedder.embed(&text).await?;
        let properties = json!({
            "domain_name": domain.domain_name.clone(),
            "user_id": domain.user_id.clone(),
            "topology": serde_json::to_string(&domain.topology)?,
            "cross_topic_relationships": domain.cross_topic_relationships.clone(),
            "strengths": domain.strengths.clone(),
            "gaps": domain.gaps.clone(),
            "emerging_themes": domain.emerging_themes.clone(),
            "source_topic_ids": domain.source_topic_ids.clone(),
            "created_at": domain.created_at.to_rfc3339(),
        });
        self.vectors.insert(Collection::Domains, embedding.vector, properties).await?;
        Ok(())
    }
}

fn cluster_by_topic(entries: Vec<KnowledgeEntry>) -> HashMap<String, Vec<KnowledgeEntry>> {
    let mut clusters: HashMap<String, Vec<KnowledgeEntry>> = HashMap::new();
    for entry in entries {
        clusters.entry(entry.topic.clone()).or_default().push(entry);
    }
    clusters
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default()
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::MockEmbeddingProvider;
    use crate::llm::MockLlmProvider;
    use crate::storage::{InMemoryVectorStore, VectorStore};

    async fn seed_knowledge(vectors: &InMemoryVectorStore, user: &str, topic: &str, n: usize) {
        let embedder = MockEmbeddingProvider::new();
        for i in 0..n {
            vectors
                .insert(
                    Collection::Knowledge,
                    embedder.embedding_for(&format!("{topic}-{i}")),
                    json!({
                        "canonical_query": format!("What about {topic} {i}?"),
                        "answer_summary": format!("Fact {i} about {topic}."),
                        "topic_cluster": topic,
                        "primary_intent": "factual",
                        "user_id": user,
                        "extraction_confidence": 0.9,
                        "created_at": Utc::now().to_rfc3339(),
                    }),
                )
                .await
                .unwrap();
        }
    }

    fn synthesis_llm() -> Arc<MockLlmProvider> {
        Arc::new(MockLlmProvider::with_response(
            r#"{"summary": "Kubernetes orchestrates containers across nodes.",
                "entity_map": {"kubernetes": ["pods", "nodes"]},
                "knowledge_gaps": ["networking"]}"#,
        ))
    }

    #[tokio::test]
    async fn small_clusters_are_skipped() {
        let vectors = Arc::new(InMemoryVectorStore::new());
        seed_knowledge(&vectors, "u1", "kubernetes", 2).await;

        let compactor = KnowledgeCompactor::new(
            vectors.clone(),
            Arc::new(MockEmbeddingProvider::new()),
            synthesis_llm(),
            CompactionConfig::default(),
        );
        let report = compactor.compact_to_topics("u1").await;

        assert_eq!(report.clusters_found, 0);
        assert_eq!(report.topics_created, 0);
        assert_eq!(vectors.count(Collection::Topics).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn qualifying_cluster_produces_topic_summary() {
        let vectors = Arc::new(InMemoryVectorStore::new());
        seed_knowledge(&vectors, "u1", "kubernetes", 3).await;

        let compactor = KnowledgeCompactor::new(
            vectors.clone(),
            Arc::new(MockEmbeddingProvider::new()),
            synthesis_llm(),
            CompactionConfig::default(),
        );
        let report = compactor.compact_to_topics("u1").await;

        assert_eq!(report.clusters_found, 1);
        assert_eq!(report.topics_created, 1);
        assert_eq!(report.errors, 0);
        assert!(report.cost_usd > 0.0);

        let topics = vectors.list(Collection::Topics, 10, None).await.unwrap();
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].properties["topic_slug"], "kubernetes");
        assert_eq!(topics[0].properties["knowledge_depth"], 3);
    }

    #[tokio::test]
    async fn budget_stops_the_run_cleanly() {
        let vectors = Arc::new(InMemoryVectorStore::new());
        seed_knowledge(&vectors, "u1", "kubernetes", 3).await;
        seed_knowledge(&vectors, "u1", "docker", 3).await;
        seed_knowledge(&vectors, "u1", "terraform", 3).await;

        let config = CompactionConfig {
            // One synthesis call (min cost 0.001) exhausts this budget.
            synthesis_budget_usd: 0.001,
            ..Default::default()
        };
        let compactor = KnowledgeCompactor::new(
            vectors.clone(),
            Arc::new(MockEmbeddingProvider::new()),
            synthesis_llm(),
            config,
        );
        let report = compactor.compact_to_topics("u1").await;

        assert!(report.budget_exhausted);
        assert_eq!(report.topics_created, 1);
        assert!(report.cost_usd >= 0.001);
    }

    #[tokio::test]
    async fn synthesis_failure_is_counted_not_raised() {
        let vectors = Arc::new(InMemoryVectorStore::new());
        seed_knowledge(&vectors, "u1", "kubernetes", 3).await;

        let compactor = KnowledgeCompactor::new(
            vectors.clone(),
            Arc::new(MockEmbeddingProvider::new()),
            Arc::new(MockLlmProvider::failing()),
            CompactionConfig::default(),
        );
        let report = compactor.compact_to_topics("u1").await;

        assert_eq!(report.errors, 1);
        assert_eq!(report.topics_created, 0);
    }

    #[tokio::test]
    async fn domain_map_requires_enough_topics() {
        let vectors = Arc::new(InMemoryVectorStore::new());
        let embedder = Arc::new(MockEmbeddingProvider::new());

        // One topic summary: below the domain threshold.
        vectors
            .insert(
                Collection::Topics,
                embedder.embedding_for("kubernetes"),
                json!({"topic_slug": "kubernetes", "summary_text": "s", "user_id": "u1"}),
            )
            .await
            .unwrap();

        let domain_llm = Arc::new(MockLlmProvider::with_response(
            r#"{"domain_name": "Container Infrastructure",
                "topology": {"docker": {"relates_to": ["kubernetes"]}},
                "cross_topic_relationships": ["containers run on pods"],
                "strengths": ["basics"], "gaps": ["security"],
                "emerging_themes": ["cloud native"]}"#,
        ));
        let compactor = KnowledgeCompactor::new(
            vectors.clone(),
            embedder.clone(),
            domain_llm,
            CompactionConfig::default(),
        );

        let report = compactor.compact_to_domains("u1").await;
        assert_eq!(report.domains_created, 0);

        vectors
            .insert(
                Collection::Topics,
                embedder.embedding_for("docker"),
                json!({"topic_slug": "docker", "summary_text": "s", "user_id": "u1"}),
            )
            .await
            .unwrap();

        let report = compactor.compact_to_domains("u1").await;
        assert_eq!(report.domains_created, 1);
        let domains = vectors.list(Collection::Domains, 10, None).await.unwrap();
        assert_eq!(domains[0].properties["domain_name"], "Container Infrastructure");
    }
}
