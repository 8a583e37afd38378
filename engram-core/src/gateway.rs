//! Query orchestration
//!
//! [`Gateway::ask`] drives the end-to-end pipeline: persist the query,
//! load thread context, classify intent, embed once, probe the semantic
//! cache, retrieve and rank on miss, gate by privacy, assemble the prompt,
//! invoke the selected agent under a deadline, validate the answer, append
//! turns, write metrics back and cache validated fresh generations.
//!
//! Failure policy: internal errors never cross the request boundary.
//! Embedding, retrieval or agent failures degrade to a safe "unable to
//! answer" response with `response_source = error`; the analytics record
//! what happened. Dropping the returned future cancels the in-flight agent
//! call; relational writes already committed remain.

use crate::audit::AuditLogger;
use crate::config::{RuntimeOverrides, Settings};
use crate::constants::defaults;
use crate::conversation::{ConversationMemory, ThreadContext};
use crate::crypto::content_hash;
use crate::embeddings::EmbeddingProvider;
use crate::error::Result;
use crate::intent;
use crate::llm::{GenerationRequest, LlmProvider};
use crate::quality::{AnswerSource, QualityResult, QualityValidator, SourceKind};
use crate::retrieval::{DualRetriever, KnowledgeHit, RawHit, SearchParams};
use crate::scoring::{ContextScorer, ScoreInputs};
use crate::semantic_cache::SemanticCache;
use crate::storage::{RelationalStore, VectorStore};
use crate::types::{
    CacheStatus, PrivacyLevel, QueryIntent, QueryRecord, Role, MAX_CONTEXT_LIMIT,
};
use chrono::Utc;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Safe answer returned when generation fails.
const DEGRADED_ANSWER: &str = "I'm unable to answer at this time. Please try again.";

/// Capacity of the in-process query-embedding cache.
const EMBEDDING_CACHE_ENTRIES: usize = 1024;

/// One ask request.
#[derive(Debug, Clone)]
pub struct AskRequest {
    pub question: String,
    pub user_id: Uuid,
    pub tenant_id: String,
    pub conversation_id: Option<Uuid>,
    /// Manual agent override; wins over tuner routing.
    pub manual_agent: Option<String>,
    pub bypass_cache: bool,
    /// Context-source cap; clamped to [1, 20].
    pub context_limit: Option<usize>,
    /// Privacy levels the caller accepts in context. `LocalOnly` is
    /// ignored here — it never egresses regardless.
    pub privacy_filter: Vec<PrivacyLevel>,
    /// Verbatim file context attached to the prompt.
    pub file_context: Option<String>,
    /// Also search the cross-source insights collection.
    pub cross_source_enabled: bool,
    /// Idempotency key for the user turn.
    pub client_message_id: Option<String>,
}

impl AskRequest {
    #[must_use]
    pub fn new(question: impl Into<String>, user_id: Uuid, tenant_id: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            user_id,
            tenant_id: tenant_id.into(),
            conversation_id: None,
            manual_agent: None,
            bypass_cache: false,
            context_limit: None,
            privacy_filter: vec![
                PrivacyLevel::Public,
                PrivacyLevel::Internal,
                PrivacyLevel::Confidential,
            ],
            file_context: None,
            cross_source_enabled: false,
            client_message_id: None,
        }
    }
}

/// Per-request analytics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analytics {
    pub query_id: Uuid,
    pub total_latency_ms: u64,
    pub search_latency_ms: u64,
    pub llm_latency_ms: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub est_cost_usd: f64,
    pub privacy_filter: Vec<String>,
    pub memories_searched: u64,
    pub memories_filtered: u64,
    pub memories_used: u64,
    pub cache_hit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_similarity: Option<f32>,
}

/// One timed pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStage {
    pub stage: String,
    pub elapsed_ms: u64,
}

/// The complete ask result.
#[derive(Debug, Clone)]
pub struct AskResponse {
    pub answer: String,
    pub sources: Vec<AnswerSource>,
    pub confidence: f64,
    pub query_id: Uuid,
    pub analytics: Analytics,
    pub agent_used: String,
    pub intent_detected: QueryIntent,
    pub cache_status: CacheStatus,
    pub quality: QualityResult,
    pub pipeline: Vec<PipelineStage>,
}

/// A ranked, privacy-tagged context candidate.
struct ContextCandidate {
    id: Uuid,
    /// Backing relational row, when one exists.
    source_id: Option<Uuid>,
    title: String,
    text: String,
    similarity: f32,
    privacy_level: PrivacyLevel,
    crs: f64,
}

/// End-to-end query orchestrator.
pub struct Gateway {
    relational: Arc<dyn RelationalStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LlmProvider>,
    retriever: DualRetriever,
    cache: SemanticCache,
    conversations: ConversationMemory,
    validator: QualityValidator,
    scorer: ContextScorer,
    overrides: Arc<RuntimeOverrides>,
    settings: Settings,
    audit: AuditLogger,
    /// Repeat questions skip the embedding round-trip entirely.
    embedding_cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl Gateway {
    #[must_use]
    pub fn new(
        relational: Arc<dyn RelationalStore>,
        vectors: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LlmProvider>,
        overrides: Arc<RuntimeOverrides>,
        settings: Settings,
    ) -> Self {
        let capacity = NonZeroUsize::new(EMBEDDING_CACHE_ENTRIES).unwrap_or(NonZeroUsize::MIN);
        Self {
            retriever: DualRetriever::new(Arc::clone(&vectors)),
            cache: SemanticCache::new(vectors),
            conversations: ConversationMemory::new(Arc::clone(&relational)),
            validator: QualityValidator::new(),
            scorer: ContextScorer::new(),
            audit: AuditLogger::new(Arc::clone(&relational)),
            relational,
            embedder,
            llm,
            overrides,
            settings,
            embedding_cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Embed the query, serving repeats from the in-process LRU cache.
    async fn embed_query(&self, question: &str) -> Result<Vec<f32>> {
        if let Some(vector) = self.embedding_cache.lock().get(question).cloned() {
            debug!("query embedding served from cache");
            return Ok(vector);
        }
        let embedding = self.embedder.embed(question).await?;
        self.embedding_cache
            .lock()
            .put(question.to_string(), embedding.vector.clone());
        Ok(embedding.vector)
    }

    /// Answer a question through the full pipeline.
    ///
    /// Only validation errors (empty question) surface as `Err`; every
    /// backend failure degrades gracefully.
    pub async fn ask(&self, request: AskRequest) -> Result<AskResponse> {
        let started = Instant::now();
        let mut pipeline = Vec::new();

        if request.question.trim().is_empty() {
            return Err(crate::error::Error::InvalidInput("question must not be empty".into()));
        }

        let context_limit = request
            .context_limit
            .unwrap_or_else(|| self.overrides.context_limit(self.settings.context_limit))
            .clamp(1, MAX_CONTEXT_LIMIT);

        // 1. Persist the query row up front; everything else refers to it.
        let mut record = QueryRecord::pending(
            request.user_id,
            None,
            &request.question,
            content_hash(&request.question),
        );
        let query_id = record.query_id;
        self.relational.insert_query(&record).await?;
        mark(&mut pipeline, "persist_query", started);

        // 2. Thread context.
        let agent = self.select_agent(&request);
        let conversation_id = self
            .conversations
            .get_or_create(&request.tenant_id, request.user_id, request.conversation_id, &agent)
            .await?;
        record.conversation_id = Some(conversation_id);
        let thread = self
            .conversations
            .load_context(&request.tenant_id, conversation_id, defaults::MAX_RECENT_TURNS)
            .await?;
        mark(&mut pipeline, "load_context", started);

        // 3. Intent is metadata; it never gates retrieval.
        let intent_detected = intent::classify(&request.question);
        record.intent = Some(intent_detected);
        mark(&mut pipeline, "classify_intent", started);

        // 4. Embed once; the vector serves both the cache probe and retrieval.
        let query_vector = match self.embed_query(&request.question).await {
            Ok(vector) => vector,
            Err(e) => {
                warn!(error = %e, "query embedding failed; degrading");
                return self
                    .degraded_response(
                        request,
                        record,
                        conversation_id,
                        intent_detected,
                        agent,
                        pipeline,
                        started,
                    )
                    .await;
            }
        };
        mark(&mut pipeline, "embed_query", started);

        // 5. Semantic cache probe.
        let cache_enabled = !request.bypass_cache
            && self.overrides.semantic_cache_enabled(self.settings.semantic_cache_enabled);
        if cache_enabled {
            if let Some(hit) = self.cache.lookup(&query_vector).await {
                mark(&mut pipeline, "cache_hit", started);
                return self
                    .cached_response(
                        request,
                        record,
                        conversation_id,
                        intent_detected,
                        hit,
                        pipeline,
                        started,
                    )
                    .await;
            }
        }
        mark(&mut pipeline, "cache_miss", started);

        // 6. Dual retrieval and ranking.
        let search_started = Instant::now();
        let user_key = request.user_id.to_string();
        let (raw_hits, mut knowledge_hits) = self
            .retriever
            .search(&query_vector, &user_key, &SearchParams::default())
            .await;
        if request.cross_source_enabled {
            let insights = self
                .retriever
                .search_insights(
                    &query_vector,
                    &user_key,
                    defaults::KNOWLEDGE_SEARCH_LIMIT,
                    defaults::KNOWLEDGE_SIMILARITY_THRESHOLD,
                )
                .await;
            knowledge_hits.extend(insights);
        }
        let search_latency_ms = search_started.elapsed().as_millis() as u64;
        let memories_searched = (raw_hits.len() + knowledge_hits.len()) as u64;
        mark(&mut pipeline, "retrieve", started);

        let mut candidates = self.rank(raw_hits, knowledge_hits);
        candidates.truncate(context_limit);

        // 7. Privacy gate. LOCAL_ONLY never reaches an external agent.
        let before = candidates.len();
        candidates.retain(|c| {
            if c.privacy_level == PrivacyLevel::LocalOnly {
                warn!(item = %c.id, "dropping LOCAL_ONLY item from external context");
                return false;
            }
            request.privacy_filter.contains(&c.privacy_level)
        });
        let memories_filtered = (before - candidates.len()) as u64;
        mark(&mut pipeline, "privacy_filter", started);

        // 8. Prompt assembly.
        let (system, prompt) =
            build_prompt(&request.question, thread.as_ref(), &candidates, request.file_context.as_deref());
        mark(&mut pipeline, "assemble_prompt", started);

        // 9–10. Agent invocation under a deadline.
        let generation = GenerationRequest::new(prompt, agent.clone()).with_system(system);
        let llm_started = Instant::now();
        let completion = match tokio::time::timeout(
            defaults::LLM_TIMEOUT,
            self.llm.generate(&generation),
        )
        .await
        {
            Ok(Ok(completion)) => Some(completion),
            Ok(Err(e)) => {
                warn!(error = %e, "agent call failed; degrading");
                None
            }
            Err(_) => {
                warn!(agent = %agent, "agent call timed out; degrading");
                None
            }
        };
        let llm_latency_ms = llm_started.elapsed().as_millis() as u64;
        mark(&mut pipeline, "generate", started);

        let generated = completion.is_some();
        let (answer, input_tokens, output_tokens, cost_usd) = match completion {
            Some(c) => (c.text, c.input_tokens, c.output_tokens, c.cost_usd),
            None => (DEGRADED_ANSWER.to_string(), 0, 0, 0.0),
        };

        // 11. Quality gate.
        let sources = answer_sources(&candidates, thread.as_ref());
        let quality = self.validator.score(&answer, &sources);
        mark(&mut pipeline, "validate", started);

        // 12. Turn appends (idempotent) and rolling summary upkeep.
        self.append_turns(&request, conversation_id, &answer).await;
        mark(&mut pipeline, "append_turns", started);

        // 13. Metrics write-back.
        record.agent_used = Some(agent.clone());
        record.response_source =
            if generated { "fresh_generation".to_string() } else { "error".to_string() };
        record.confidence = Some(quality.confidence);
        record.latency_ms = started.elapsed().as_millis() as u64;
        record.search_latency_ms = search_latency_ms;
        record.llm_latency_ms = llm_latency_ms;
        record.input_tokens = input_tokens;
        record.output_tokens = output_tokens;
        record.cost_usd = cost_usd;
        record.memories_used = candidates.len() as u64;
        record.memory_ids = candidates.iter().filter_map(|c| c.source_id).collect();
        if let Err(e) = self.relational.update_query(&record).await {
            warn!(query_id = %query_id, error = %e, "query metrics write-back failed");
        }

        // 14. Cache validated fresh generations.
        if generated && quality.should_store {
            if let Err(e) = self
                .cache
                .store(
                    &request.question,
                    &answer,
                    &agent,
                    &request.user_id.to_string(),
                    query_vector,
                )
                .await
            {
                warn!(error = %e, "semantic cache store failed");
            }
        }

        // 15. Egress audit: context left the system toward the agent.
        let classification = candidates
            .iter()
            .map(|c| c.privacy_level)
            .max()
            .unwrap_or(PrivacyLevel::Public);
        self.audit
            .log_egress(
                "gateway",
                "ask",
                &agent,
                candidates.len() as u64,
                classification.into(),
                json!({"query_id": query_id.to_string(), "intent": intent_detected.to_string()}),
            )
            .await;
        mark(&mut pipeline, "finalize", started);

        info!(
            query_id = %query_id,
            agent = %agent,
            memories_used = candidates.len(),
            confidence = quality.confidence,
            "ask complete"
        );

        Ok(AskResponse {
            answer,
            sources,
            confidence: quality.confidence,
            query_id,
            analytics: Analytics {
                query_id,
                total_latency_ms: record.latency_ms,
                search_latency_ms,
                llm_latency_ms,
                input_tokens,
                output_tokens,
                est_cost_usd: cost_usd,
                privacy_filter: request.privacy_filter.iter().map(ToString::to_string).collect(),
                memories_searched,
                memories_filtered,
                memories_used: candidates.len() as u64,
                cache_hit: false,
                cache_similarity: None,
            },
            agent_used: agent,
            intent_detected,
            cache_status: CacheStatus::FreshGeneration,
            quality,
            pipeline,
        })
    }

    /// Agent choice: manual override → tuner routing → configured default.
    fn select_agent(&self, request: &AskRequest) -> String {
        request
            .manual_agent
            .clone()
            .unwrap_or_else(|| self.overrides.default_model(&self.settings.default_model))
    }

    fn rank(&self, raw: Vec<RawHit>, knowledge: Vec<KnowledgeHit>) -> Vec<ContextCandidate> {
        let now = Utc::now();
        let mut candidates: Vec<ContextCandidate> = Vec::with_capacity(raw.len() + knowledge.len());

        for hit in raw {
            let crs = self.scorer.score(
                &ScoreInputs {
                    similarity: f64::from(hit.similarity),
                    created_at: hit.created_at.unwrap_or(now),
                    tier: crate::types::MemoryTier::Mid,
                    feedback: None,
                    access_count: 0,
                },
                now,
            );
            let text = if hit.summarized_answer.is_empty() {
                hit.canonical_query.clone()
            } else {
                format!("Q: {}\nA: {}", hit.canonical_query, hit.summarized_answer)
            };
            candidates.push(ContextCandidate {
                id: hit.id,
                source_id: hit.source_id,
                title: hit.canonical_query,
                text,
                similarity: hit.similarity,
                privacy_level: hit.privacy_level,
                crs,
            });
        }

        for hit in knowledge {
            let crs = self.scorer.score(
                &ScoreInputs {
                    similarity: f64::from(hit.similarity),
                    created_at: now,
                    tier: crate::types::MemoryTier::Mid,
                    feedback: None,
                    access_count: 0,
                },
                now,
            );
            candidates.push(ContextCandidate {
                id: hit.id,
                source_id: None,
                title: if hit.topic_cluster.is_empty() {
                    "knowledge".to_string()
                } else {
                    hit.topic_cluster.clone()
                },
                text: hit.content,
                similarity: hit.similarity,
                // Knowledge entries are distilled, de-identified facts.
                privacy_level: PrivacyLevel::Public,
                crs,
            });
        }

        candidates.sort_by(|a, b| b.crs.total_cmp(&a.crs));
        candidates
    }

    async fn append_turns(&self, request: &AskRequest, conversation_id: Uuid, answer: &str) {
        let user_turn = self
            .conversations
            .append_turn(
                &request.tenant_id,
                conversation_id,
                Role::User,
                &request.question,
                request.client_message_id.as_deref(),
                None,
                None,
            )
            .await;
        if let Err(e) = user_turn {
            warn!(error = %e, "failed to append user turn");
        }

        let assistant_turn = self
            .conversations
            .append_turn(
                &request.tenant_id,
                conversation_id,
                Role::Assistant,
                answer,
                None,
                None,
                None,
            )
            .await;
        if let Err(e) = assistant_turn {
            warn!(error = %e, "failed to append assistant turn");
        }

        if let Err(e) = self
            .conversations
            .update_summary_if_needed(&request.tenant_id, conversation_id, false)
            .await
        {
            warn!(error = %e, "rolling summary update failed");
        }
    }

    /// Serve a semantic cache hit: zero cost, zero memories searched.
    #[allow(clippy::too_many_arguments)]
    async fn cached_response(
        &self,
        request: AskRequest,
        mut record: QueryRecord,
        conversation_id: Uuid,
        intent_detected: QueryIntent,
        hit: crate::semantic_cache::CacheHit,
        pipeline: Vec<PipelineStage>,
        started: Instant,
    ) -> Result<AskResponse> {
        let answer = hit.answer_summary.clone();
        let agent = if hit.original_agent.is_empty() {
            self.select_agent(&request)
        } else {
            hit.original_agent.clone()
        };

        self.append_turns(&request, conversation_id, &answer).await;
        self.cache.record_hit(&hit);

        let sources = vec![AnswerSource {
            kind: SourceKind::Document,
            source_id: Some(hit.id.to_string()),
            title: hit.canonical_query.clone(),
            score: f64::from(hit.similarity),
        }];
        let quality = self.validator.score(&answer, &sources);

        record.agent_used = Some(agent.clone());
        record.response_source = "semantic_cache_hit".to_string();
        record.confidence = Some(quality.confidence);
        record.latency_ms = started.elapsed().as_millis() as u64;
        record.memories_used = 0;
        if let Err(e) = self.relational.update_query(&record).await {
            warn!(query_id = %record.query_id, error = %e, "query metrics write-back failed");
        }

        debug!(query_id = %record.query_id, similarity = hit.similarity, "semantic cache hit");

        Ok(AskResponse {
            answer,
            sources,
            confidence: quality.confidence,
            query_id: record.query_id,
            analytics: Analytics {
                query_id: record.query_id,
                total_latency_ms: record.latency_ms,
                search_latency_ms: 0,
                llm_latency_ms: 0,
                input_tokens: 0,
                output_tokens: 0,
                est_cost_usd: 0.0,
                privacy_filter: request.privacy_filter.iter().map(ToString::to_string).collect(),
                memories_searched: 0,
                memories_filtered: 0,
                memories_used: 0,
                cache_hit: true,
                cache_similarity: Some(hit.similarity),
            },
            agent_used: agent,
            intent_detected,
            cache_status: CacheStatus::SemanticCacheHit,
            quality,
            pipeline,
        })
    }

    /// Degraded response when the pipeline cannot even search.
    #[allow(clippy::too_many_arguments)]
    async fn degraded_response(
        &self,
        request: AskRequest,
        mut record: QueryRecord,
        conversation_id: Uuid,
        intent_detected: QueryIntent,
        agent: String,
        pipeline: Vec<PipelineStage>,
        started: Instant,
    ) -> Result<AskResponse> {
        let answer = DEGRADED_ANSWER.to_string();
        self.append_turns(&request, conversation_id, &answer).await;

        let quality = self.validator.score(&answer, &[]);
        record.agent_used = Some(agent.clone());
        record.response_source = "error".to_string();
        record.confidence = Some(quality.confidence);
        record.latency_ms = started.elapsed().as_millis() as u64;
        if let Err(e) = self.relational.update_query(&record).await {
            warn!(query_id = %record.query_id, error = %e, "query metrics write-back failed");
        }

        Ok(AskResponse {
            answer,
            sources: Vec::new(),
            confidence: quality.confidence,
            query_id: record.query_id,
            analytics: Analytics {
                query_id: record.query_id,
                total_latency_ms: record.latency_ms,
                search_latency_ms: 0,
                llm_latency_ms: 0,
                input_tokens: 0,
                output_tokens: 0,
                est_cost_usd: 0.0,
                privacy_filter: request.privacy_filter.iter().map(ToString::to_string).collect(),
                memories_searched: 0,
                memories_filtered: 0,
                memories_used: 0,
                cache_hit: false,
                cache_similarity: None,
            },
            agent_used: agent,
            intent_detected,
            cache_status: CacheStatus::FreshGeneration,
            quality,
            pipeline,
        })
    }
}

fn mark(pipeline: &mut Vec<PipelineStage>, stage: &str, started: Instant) {
    pipeline.push(PipelineStage {
        stage: stage.to_string(),
        elapsed_ms: started.elapsed().as_millis() as u64,
    });
}

/// Build the system preamble and user prompt from thread context, ranked
/// sources and optional file context.
fn build_prompt(
    question: &str,
    thread: Option<&ThreadContext>,
    candidates: &[ContextCandidate],
    file_context: Option<&str>,
) -> (String, String) {
    let system = "You are a personal memory assistant. Synthesize across the provided \
                  sources; prefer grounded statements over speculation and cite which \
                  source supports each claim."
        .to_string();

    let mut prompt = String::new();

    if let Some(thread) = thread {
        if !thread.summary.is_empty() {
            prompt.push_str("Conversation summary:\n");
            prompt.push_str(&thread.summary);
            prompt.push_str("\n\n");
        }
        if !thread.recent_turns.is_empty() {
            prompt.push_str("Recent turns:\n");
            for turn in &thread.recent_turns {
                prompt.push_str(&format!("{}: {}\n", turn.role, turn.content));
            }
            prompt.push('\n');
        }
    }

    for (index, candidate) in candidates.iter().enumerate() {
        let mut block = candidate.text.clone();
        if block.len() > defaults::MAX_SOURCE_BLOCK_CHARS {
            block.truncate(floor_char_boundary(&block, defaults::MAX_SOURCE_BLOCK_CHARS));
        }
        prompt.push_str(&format!(
            "Source {} ({}, similarity {:.2}):\n{}\n\n",
            index + 1,
            candidate.title,
            candidate.similarity,
            block
        ));
    }

    if let Some(file_context) = file_context {
        prompt.push_str("Attached file context:\n");
        prompt.push_str(file_context);
        prompt.push_str("\n\n");
    }

    prompt.push_str("Question: ");
    prompt.push_str(question);
    (system, prompt)
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn answer_sources(candidates: &[ContextCandidate], thread: Option<&ThreadContext>) -> Vec<AnswerSource> {
    if !candidates.is_empty() {
        return candidates
            .iter()
            .map(|c| AnswerSource {
                kind: SourceKind::Document,
                source_id: Some(c.id.to_string()),
                title: c.title.clone(),
                score: f64::from(c.similarity),
            })
            .collect();
    }
    if thread.is_some_and(|t| !t.recent_turns.is_empty()) {
        return vec![AnswerSource {
            kind: SourceKind::Conversation,
            source_id: None,
            title: "conversation history".to_string(),
            score: 0.0,
        }];
    }
    Vec::new()
}
