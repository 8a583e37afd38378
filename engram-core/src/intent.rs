//! Cheap query intent classification
//!
//! A keyword heuristic over the query text. The result is metadata: it
//! biases agent choice and lands in analytics, but never gates retrieval.

use crate::types::QueryIntent;

/// Classify a query into a coarse intent bucket.
#[must_use]
pub fn classify(query: &str) -> QueryIntent {
    let lower = query.to_lowercase();

    let any = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if any(&["remember", "did i", "what did we", "last time", "my notes", "recall"]) {
        return QueryIntent::MemoryQuery;
    }
    if any(&["research", "find sources", "survey", "state of the art", "literature"]) {
        return QueryIntent::Research;
    }
    if any(&["write a", "compose", "draft", "poem", "story", "brainstorm"]) {
        return QueryIntent::Creative;
    }
    if any(&["why", "compare", "analyze", "analyse", "trade-off", "tradeoff", "evaluate", "pros and cons"]) {
        return QueryIntent::Analysis;
    }
    if any(&["what is", "what's", "who is", "when did", "where is", "how many", "define"]) {
        return QueryIntent::Factual;
    }
    QueryIntent::General
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_shapes() {
        assert_eq!(classify("What is ACMS?"), QueryIntent::Factual);
        assert_eq!(classify("Compare redb and sled for caching"), QueryIntent::Analysis);
        assert_eq!(classify("Write a haiku about Rust"), QueryIntent::Creative);
        assert_eq!(classify("Research the state of the art in RAG"), QueryIntent::Research);
        assert_eq!(classify("What did we decide about auth last time?"), QueryIntent::MemoryQuery);
        assert_eq!(classify("ship it"), QueryIntent::General);
    }

    #[test]
    fn memory_recall_outranks_factual_phrasing() {
        // "what did we" contains no factual trigger ahead of the memory check.
        assert_eq!(classify("what did we say about pricing"), QueryIntent::MemoryQuery);
    }
}
