//! End-to-end pipeline scenarios against the in-memory backends.

use engram_core::config::Settings;
use engram_core::context::AppContext;
use engram_core::embeddings::MockEmbeddingProvider;
use engram_core::feedback::FeedbackSubmission;
use engram_core::gateway::AskRequest;
use engram_core::llm::MockLlmProvider;
use engram_core::memory::CreateMemory;
use engram_core::storage::{
    Collection, InMemoryRelationalStore, InMemoryVectorStore, RelationalStore, VectorStore,
};
use engram_core::types::{CacheStatus, FeedbackType, PrivacyLevel};
use std::sync::Arc;
use uuid::Uuid;

fn build_context() -> AppContext {
    AppContext::build(
        Settings::default(),
        Arc::new(InMemoryRelationalStore::new()),
        Arc::new(InMemoryVectorStore::new()),
        Arc::new(MockEmbeddingProvider::new()),
        Arc::new(MockLlmProvider::new()),
    )
    .unwrap()
}

/// Insert a raw Q&A vector aligned with `question`'s embedding, so the
/// generated answer is grounded in a document source.
async fn seed_grounding(context: &AppContext, user: Uuid, question: &str) {
    let embedder = MockEmbeddingProvider::new();
    context
        .vectors
        .insert(
            Collection::Raw,
            embedder.embedding_for(question),
            serde_json::json!({
                "content": format!("Q: {question}\nA: a previously stored grounded answer"),
                "agent": "claude",
                "source_type": "memory_item",
                "privacy_level": "INTERNAL",
                "user_id": user.to_string(),
                "source_id": Uuid::new_v4().to_string(),
                "created_at": chrono::Utc::now().to_rfc3339(),
            }),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn create_then_duplicate_then_list() {
    let context = build_context();
    let user = Uuid::new_v4();

    let first = context
        .memory
        .create(CreateMemory::new(user, "The capital of France is Paris."))
        .await
        .unwrap();
    assert!(first.is_some());

    let second = context
        .memory
        .create(CreateMemory::new(user, "The capital of France is Paris."))
        .await
        .unwrap();
    assert!(second.is_none());

    let items = context.memory.list(user, 10, 0).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(
        items[0].content_hash,
        engram_core::content_hash("The capital of France is Paris.")
    );
}

#[tokio::test]
async fn ask_flow_stores_then_serves_from_cache() {
    let context = build_context();
    let user = Uuid::new_v4();

    // Ground the first answer so the quality gate accepts it into the cache.
    seed_grounding(&context, user, "What is engram?").await;

    let first = context
        .gateway
        .ask(AskRequest::new("What is engram?", user, "default"))
        .await
        .unwrap();
    assert_eq!(first.cache_status, CacheStatus::FreshGeneration);
    assert!(first.quality.should_store);

    let second = context
        .gateway
        .ask(AskRequest::new("What is engram?", user, "default"))
        .await
        .unwrap();
    assert_eq!(second.cache_status, CacheStatus::SemanticCacheHit);
    assert_eq!(second.answer, first.answer);
    assert_eq!(second.analytics.est_cost_usd, 0.0);
    assert_eq!(second.analytics.memories_searched, 0);
    assert!(second.analytics.cache_similarity.unwrap() >= 0.92);
}

#[tokio::test]
async fn feedback_round_trip_updates_grounding_memory() {
    let context = build_context();
    let user = Uuid::new_v4();

    let memory_id = context
        .memory
        .create(CreateMemory::new(user, "Q: deploy steps?\nA: tag, build, release."))
        .await
        .unwrap()
        .unwrap();

    let response = context
        .gateway
        .ask(AskRequest::new("Q: deploy steps?\nA: tag, build, release.", user, "default"))
        .await
        .unwrap();
    assert!(response.analytics.memories_used >= 1);

    let outcome = context
        .feedback
        .submit(FeedbackSubmission {
            query_id: response.query_id,
            user_id: user,
            rating: 5,
            feedback_type: FeedbackType::ThumbsUp,
            response_source: None,
            comment: None,
        })
        .await
        .unwrap();
    assert_eq!(outcome.summary.thumbs_up, 1);

    let item = context.relational.get_memory(memory_id).await.unwrap().unwrap();
    let summary = item.feedback_summary.expect("feedback should reach the memory item");
    assert_eq!(summary.total_ratings, 1);
}

#[tokio::test]
async fn local_only_memories_stay_local() {
    let context = build_context();
    let user = Uuid::new_v4();

    let secret = format!("Q: my key?\nA: sk-{}", "a".repeat(40));
    context.memory.create(CreateMemory::new(user, secret.clone())).await.unwrap();

    let mut request = AskRequest::new(secret, user, "default");
    request.bypass_cache = true;
    let response = context.gateway.ask(request).await.unwrap();

    // The perfectly matching item was found, then withheld from egress.
    assert_eq!(response.analytics.memories_filtered, 1);
    assert_eq!(response.analytics.memories_used, 0);
    assert!(response.sources.iter().all(|s| {
        s.source_id.as_deref() != Some(&response.query_id.to_string())
    }));
}

#[tokio::test]
async fn answered_queries_enrich_into_knowledge() {
    let llm = Arc::new(MockLlmProvider::new());
    let context = AppContext::build(
        Settings::default(),
        Arc::new(InMemoryRelationalStore::new()),
        Arc::new(InMemoryVectorStore::new()),
        Arc::new(MockEmbeddingProvider::new()),
        llm.clone(),
    )
    .unwrap();
    let user = Uuid::new_v4();

    seed_grounding(&context, user, "What is a pod?").await;
    let response = context
        .gateway
        .ask(AskRequest::new("What is a pod?", user, "default"))
        .await
        .unwrap();
    assert!(response.quality.should_store);

    // The extraction call is the next generation the model serves.
    llm.push_response(
        r#"{"canonical_query": "What is a Kubernetes pod?",
            "answer_summary": "The smallest deployable unit in Kubernetes.",
            "topic_cluster": "kubernetes",
            "related_topics": ["containers"],
            "extraction_confidence": 0.9}"#,
    );
    let report = context.extractor.run_sweep(10).await;
    assert_eq!(report.extracted, 1);
    assert_eq!(context.vectors.count(Collection::Knowledge).await.unwrap(), 1);

    let record = context.relational.get_query(response.query_id).await.unwrap().unwrap();
    assert_eq!(record.enrichment_status, "completed");
}

#[tokio::test]
async fn deleted_memory_disappears_from_both_stores() {
    let context = build_context();
    let user = Uuid::new_v4();

    let id = context
        .memory
        .create(CreateMemory::new(user, "ephemeral note").with_privacy(PrivacyLevel::Internal))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(context.vectors.count(Collection::Raw).await.unwrap(), 1);
    assert!(context.memory.delete(id).await.unwrap());
    assert_eq!(context.vectors.count(Collection::Raw).await.unwrap(), 0);
    assert!(context.memory.get(id).await.unwrap().is_none());
}
