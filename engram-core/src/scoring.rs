//! Context Retrieval Score (CRS)
//!
//! Multi-signal ranking for retrieved memories based on:
//! - Semantic similarity (match quality against the query)
//! - Recency (exponential time decay)
//! - Tier (durability/importance class)
//! - Feedback (accumulated user ratings)
//! - Frequency (access count)
//!
//! The composite score is clamped to [0, 1] and is strictly increasing in
//! similarity and non-increasing in age when the other inputs are fixed.

use crate::constants::defaults::{MAX_ACCESS_COUNT, RECENCY_HALF_LIFE_DAYS};
use crate::types::{FeedbackSummary, MemoryTier};
use chrono::{DateTime, Utc};

/// Weights for the five ranking signals.
#[derive(Debug, Clone)]
pub struct ScoringWeights {
    /// Semantic similarity weight (how well content matches the query)
    pub semantic: f64,
    /// Recency weight (how recent the memory is)
    pub recency: f64,
    /// Tier weight (importance class)
    pub tier: f64,
    /// Feedback weight (user ratings)
    pub feedback: f64,
    /// Frequency weight (access count)
    pub frequency: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            semantic: 0.40,  // 40% - Most important
            recency: 0.20,   // 20% - Moderately important
            tier: 0.20,      // 20% - Moderately important
            feedback: 0.10,  // 10% - Somewhat important
            frequency: 0.10, // 10% - Somewhat important
        }
    }
}

impl ScoringWeights {
    /// Renormalize so the weights sum to 1.0.
    pub fn normalize(&mut self) {
        let total = self.semantic + self.recency + self.tier + self.feedback + self.frequency;
        if total > 0.0 {
            self.semantic /= total;
            self.recency /= total;
            self.tier /= total;
            self.feedback /= total;
            self.frequency /= total;
        }
    }
}

/// Inputs for one item's score.
#[derive(Debug, Clone)]
pub struct ScoreInputs<'a> {
    /// Similarity in [0, 1] (`1 - distance` from the vector store).
    pub similarity: f64,
    pub created_at: DateTime<Utc>,
    pub tier: MemoryTier,
    pub feedback: Option<&'a FeedbackSummary>,
    pub access_count: u64,
}

/// Five-factor scorer with reconfigurable weights.
#[derive(Debug, Clone, Default)]
pub struct ContextScorer {
    weights: ScoringWeights,
}

impl ContextScorer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a scorer with custom weights; they are renormalized to sum 1.0.
    #[must_use]
    pub fn with_weights(mut weights: ScoringWeights) -> Self {
        weights.normalize();
        Self { weights }
    }

    /// Compute the composite score at time `now`, clamped to [0, 1].
    #[must_use]
    pub fn score(&self, inputs: &ScoreInputs<'_>, now: DateTime<Utc>) -> f64 {
        let semantic = inputs.similarity.clamp(0.0, 1.0);
        let recency = recency_score(inputs.created_at, now);
        let tier = tier_score(inputs.tier);
        let feedback = feedback_score(inputs.feedback);
        let frequency = frequency_score(inputs.access_count);

        let crs = semantic * self.weights.semantic
            + recency * self.weights.recency
            + tier * self.weights.tier
            + feedback * self.weights.feedback
            + frequency * self.weights.frequency;

        crs.clamp(0.0, 1.0)
    }
}

/// Exponential recency decay with a 30-day half-life.
///
/// `score = exp(-days_old / (half_life / ln 2))`: 1.0 now, 0.5 at 30 days.
/// The subtraction is over `DateTime<Utc>` so timezone drift cannot occur;
/// future timestamps clamp to 1.0.
#[must_use]
pub fn recency_score(created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let days_old = (now - created_at).num_seconds() as f64 / 86_400.0;
    if days_old <= 0.0 {
        return 1.0;
    }
    let decay_constant = RECENCY_HALF_LIFE_DAYS / std::f64::consts::LN_2;
    (-days_old / decay_constant).exp().clamp(0.0, 1.0)
}

/// Map the tier multiplier range [0.8, 1.2] linearly onto [0, 1].
#[must_use]
pub fn tier_score(tier: MemoryTier) -> f64 {
    ((tier.multiplier() - 0.8) / 0.4).clamp(0.0, 1.0)
}

/// Feedback score from the denormalized summary; 0.5 is neutral.
///
/// An explicit average rating in [-1, 1] maps to [0, 1] directly. Otherwise
/// the up/down ratio is dampened by sample size (full confidence at 10+
/// ratings) so a single thumbs-up cannot dominate.
#[must_use]
pub fn feedback_score(summary: Option<&FeedbackSummary>) -> f64 {
    let Some(summary) = summary else { return 0.5 };

    if let Some(avg) = summary.avg_rating {
        return ((avg + 1.0) / 2.0).clamp(0.0, 1.0);
    }

    let total = summary.thumbs_up + summary.thumbs_down;
    if total == 0 {
        return 0.5;
    }
    let positive_ratio = summary.thumbs_up as f64 / total as f64;
    let confidence = (total as f64 / 10.0).min(1.0);
    (0.5 + (positive_ratio - 0.5) * confidence).clamp(0.0, 1.0)
}

/// Log-scaled access frequency, capped at 100 accesses.
#[must_use]
pub fn frequency_score(access_count: u64) -> f64 {
    if access_count == 0 {
        return 0.0;
    }
    let capped = access_count.min(MAX_ACCESS_COUNT) as f64;
    let max_log = (MAX_ACCESS_COUNT as f64 + 1.0).log10();
    ((capped + 1.0).log10() / max_log).clamp(0.0, 1.0)
}
