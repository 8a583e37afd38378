//! Answer quality gate
//!
//! Prevents low-quality generated answers from polluting the memory fabric.
//! Scoring:
//!
//! ```text
//! confidence = source_trust * 0.4 + completeness * 0.2 + certainty * 0.4
//! ```
//!
//! Answers at or above 0.8 are stored; everything below is flagged with the
//! primary causes. Empty or whitespace-only answers short-circuit to 0.

use serde::{Deserialize, Serialize};

/// Storage decision threshold.
pub const CONFIDENCE_THRESHOLD: f64 = 0.8;

/// Minimum length (chars) for a complete answer.
const COMPLETENESS_THRESHOLD: usize = 100;

const SOURCE_TRUST_HIGH: f64 = 1.0;
const SOURCE_TRUST_MEDIUM: f64 = 0.7;
const SOURCE_TRUST_LOW: f64 = 0.3;

const WEIGHT_SOURCE_TRUST: f64 = 0.4;
const WEIGHT_COMPLETENESS: f64 = 0.2;
const WEIGHT_CERTAINTY: f64 = 0.4;

/// Hedging phrases; each match costs 0.2 certainty down to a 0.3 floor.
const UNCERTAINTY_PHRASES: &[&str] = &[
    "might",
    "could",
    "possibly",
    "perhaps",
    "maybe",
    "i'm not sure",
    "i don't know",
    "i don't have access",
    "i cannot",
    "i'm unable",
    "uncertain",
    "unclear",
    "not certain",
];

/// Kind of source that grounded an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Grounded in a stored document or memory item.
    Document,
    /// Grounded in conversation history.
    Conversation,
    /// Produced by an API call without grounding.
    ApiCall,
}

/// A source reference carried through validation and into the response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerSource {
    pub kind: SourceKind,
    /// Identifier of the backing record, when one exists.
    pub source_id: Option<String>,
    /// Display title or canonical query.
    pub title: String,
    /// Similarity or score that selected this source.
    pub score: f64,
}

/// Result of quality validation with the component breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityResult {
    /// Overall confidence in [0, 1].
    pub confidence: f64,
    /// True iff `confidence >= 0.8`.
    pub should_store: bool,
    pub source_trust: f64,
    pub completeness: f64,
    pub certainty: f64,
    /// Reasons when rejected, `None` when stored.
    pub flagged_reason: Option<String>,
}

/// Validates generated answers before they are cached or stored.
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityValidator;

impl QualityValidator {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Score an answer against its sources.
    #[must_use]
    pub fn score(&self, answer: &str, sources: &[AnswerSource]) -> QualityResult {
        if answer.trim().is_empty() {
            return QualityResult {
                confidence: 0.0,
                should_store: false,
                source_trust: 0.0,
                completeness: 0.0,
                certainty: 0.0,
                flagged_reason: Some("empty_or_whitespace_response (confidence=0.00)".to_string()),
            };
        }

        let source_trust = source_trust(sources);
        let completeness = completeness(answer);
        let certainty = certainty(answer);

        let confidence = (source_trust * WEIGHT_SOURCE_TRUST
            + completeness * WEIGHT_COMPLETENESS
            + certainty * WEIGHT_CERTAINTY)
            .clamp(0.0, 1.0);

        let should_store = confidence >= CONFIDENCE_THRESHOLD;
        let flagged_reason = if should_store {
            None
        } else {
            Some(flagged_reason(confidence, source_trust, completeness, certainty))
        };

        QualityResult {
            confidence,
            should_store,
            source_trust,
            completeness,
            certainty,
            flagged_reason,
        }
    }
}

/// Documents beat conversation history beats nothing.
fn source_trust(sources: &[AnswerSource]) -> f64 {
    if sources.is_empty() {
        return SOURCE_TRUST_LOW;
    }
    if sources.iter().any(|s| s.kind == SourceKind::Document) {
        return SOURCE_TRUST_HIGH;
    }
    if sources.iter().any(|s| s.kind == SourceKind::Conversation) {
        return SOURCE_TRUST_MEDIUM;
    }
    SOURCE_TRUST_LOW
}

fn completeness(answer: &str) -> f64 {
    if answer.trim().len() >= COMPLETENESS_THRESHOLD {
        1.0
    } else {
        0.5
    }
}

/// `max(0.3, 1 - 0.2 * hedging_matches)`.
fn certainty(answer: &str) -> f64 {
    let lower = answer.to_lowercase();
    let count = UNCERTAINTY_PHRASES
        .iter()
        .filter(|phrase| lower.contains(*phrase))
        .count();
    (1.0 - 0.2 * count as f64).max(0.3)
}

fn flagged_reason(confidence: f64, source_trust: f64, completeness: f64, certainty: f64) -> String {
    let mut reasons = Vec::new();
    if source_trust <= SOURCE_TRUST_LOW {
        reasons.push("no_sources_or_low_trust");
    }
    if certainty < 0.6 {
        reasons.push("uncertainty_detected");
    }
    if completeness < 1.0 {
        reasons.push("incomplete_response");
    }
    if reasons.is_empty() {
        reasons.push("low_confidence");
    }
    format!("{} (confidence={confidence:.2})", reasons.join(", "))
}
