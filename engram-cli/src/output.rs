//! Human-readable and JSON rendering

use engram_core::gateway::AskResponse;
use engram_core::types::MemoryItem;

pub fn print_ask_response(response: &AskResponse) {
    println!("{}", response.answer);
    println!();
    println!(
        "agent: {}  intent: {}  cache: {}  confidence: {:.2}",
        response.agent_used,
        response.intent_detected,
        response.cache_status,
        response.confidence
    );
    println!(
        "latency: {}ms (search {}ms, llm {}ms)  cost: ${:.4}  sources: {}",
        response.analytics.total_latency_ms,
        response.analytics.search_latency_ms,
        response.analytics.llm_latency_ms,
        response.analytics.est_cost_usd,
        response.analytics.memories_used,
    );
    for (index, source) in response.sources.iter().enumerate() {
        println!("  [{}] {} (score {:.2})", index + 1, source.title, source.score);
    }
}

pub fn ask_response_json(response: &AskResponse) -> String {
    serde_json::json!({
        "answer": response.answer,
        "sources": response.sources,
        "confidence": response.confidence,
        "query_id": response.query_id.to_string(),
        "analytics": response.analytics,
        "agent_used": response.agent_used,
        "intent_detected": response.intent_detected.to_string(),
        "cache_status": response.cache_status.to_string(),
        "quality_validation": response.quality,
        "pipeline": response.pipeline,
    })
    .to_string()
}

pub fn print_memory_list(items: &[MemoryItem]) {
    if items.is_empty() {
        println!("no memories");
        return;
    }
    for item in items {
        let preview: String = item.content.chars().take(60).collect();
        println!(
            "{}  [{} {}]  {}{}",
            item.memory_id,
            item.tier,
            item.privacy_level,
            preview,
            if item.content.chars().count() > 60 { "…" } else { "" },
        );
    }
}
