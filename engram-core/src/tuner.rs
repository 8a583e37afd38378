//! Feedback-driven auto-tuning
//!
//! Periodically analyzes accumulated feedback and adjusts runtime behavior
//! through the [`RuntimeOverrides`] map. Three analyzers run in priority
//! order; the first that fires wins the cycle:
//!
//! 1. **Cache quality** — disable the semantic cache when cache-sourced
//!    answers average below 3.0 stars over 30 days (n ≥ 5).
//! 2. **Model routing** — switch the default model when another model
//!    outrates the configured one by more than 0.5 stars (n ≥ 3 each).
//! 3. **Context limits** — widen or narrow the context window when more
//!    than 20% of comments say "too few" / "too many" (n ≥ 5), bounded to
//!    [5, 20].
//!
//! Applied decisions mutate the override map (never the on-disk
//! configuration) and append a row to the tuning log. The log write is
//! required: a failure surfaces to the job wrapper, though the in-memory
//! override still applies.

use crate::config::{keys, RuntimeOverrides, Settings};
use crate::error::Result;
use crate::storage::RelationalStore;
use crate::types::TuningLogRow;
use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Analysis window for all three rules.
const WINDOW_DAYS: i64 = 30;

/// Minimum cache-feedback sample before the cache rule may fire.
const MIN_CACHE_SAMPLES: u64 = 5;

/// Minimum per-model sample for the routing rule.
const MIN_MODEL_SAMPLES: u64 = 3;

/// Rating advantage required to switch models.
const MODEL_SWITCH_MARGIN: f64 = 0.5;

/// Complaint share required to adjust the context limit.
const COMPLAINT_THRESHOLD_PCT: f64 = 20.0;

/// One tuning decision.
#[derive(Debug, Clone, PartialEq)]
pub struct TuningDecision {
    pub action: TuningAction,
    pub reason: String,
    pub old_value: String,
    pub new_value: String,
    pub confidence: f64,
}

/// The closed set of actions the tuner may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuningAction {
    DisableSemanticCache,
    SwitchModel,
    ReduceContextLimit,
    IncreaseContextLimit,
}

impl TuningAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DisableSemanticCache => "disable_semantic_cache",
            Self::SwitchModel => "switch_model",
            Self::ReduceContextLimit => "reduce_context_limit",
            Self::IncreaseContextLimit => "increase_context_limit",
        }
    }
}

/// Analyzes feedback and applies configuration overrides.
pub struct AutoTuner {
    store: Arc<dyn RelationalStore>,
    overrides: Arc<RuntimeOverrides>,
    settings: Settings,
}

impl AutoTuner {
    #[must_use]
    pub fn new(
        store: Arc<dyn RelationalStore>,
        overrides: Arc<RuntimeOverrides>,
        settings: Settings,
    ) -> Self {
        Self { store, overrides, settings }
    }

    /// Run one analysis cycle; apply and log the first firing rule.
    ///
    /// Returns the applied decision, or `None` when nothing fired.
    pub async fn run_cycle(&self) -> Result<Option<TuningDecision>> {
        let Some(decision) = self.analyze().await? else {
            debug!("no tuning action needed");
            return Ok(None);
        };
        self.apply(&decision).await?;
        Ok(Some(decision))
    }

    /// Analyzers in priority order; first one that fires wins.
    pub async fn analyze(&self) -> Result<Option<TuningDecision>> {
        if let Some(decision) = self.analyze_cache_quality().await? {
            return Ok(Some(decision));
        }
        if let Some(decision) = self.analyze_model_routing().await? {
            return Ok(Some(decision));
        }
        self.analyze_context_limits().await
    }

    async fn analyze_cache_quality(&self) -> Result<Option<TuningDecision>> {
        let since = Utc::now() - Duration::days(WINDOW_DAYS);
        let Some(stats) = self.store.avg_rating_by_source("semantic_cache_hit", since).await?
        else {
            return Ok(None);
        };

        debug!(avg = stats.avg_rating, n = stats.count, "cache quality");
        if stats.avg_rating < 3.0 && stats.count >= MIN_CACHE_SAMPLES {
            return Ok(Some(TuningDecision {
                action: TuningAction::DisableSemanticCache,
                reason: format!(
                    "cache quality below threshold: {:.2}/5.0 (n={})",
                    stats.avg_rating, stats.count
                ),
                old_value: "true".to_string(),
                new_value: "false".to_string(),
                confidence: (stats.count as f64 / 10.0).min(1.0),
            }));
        }
        Ok(None)
    }

    async fn analyze_model_routing(&self) -> Result<Option<TuningDecision>> {
        let since = Utc::now() - Duration::days(WINDOW_DAYS);
        let ratings = self.store.ratings_by_model(since, MIN_MODEL_SAMPLES).await?;
        if ratings.len() < 2 {
            return Ok(None);
        }

        let best = &ratings[0];
        let current_model = self.overrides.default_model(&self.settings.default_model);
        let Some(current) = ratings.iter().find(|r| r.model == current_model) else {
            return Ok(None);
        };

        if best.model != current_model
            && best.avg_rating - current.avg_rating > MODEL_SWITCH_MARGIN
        {
            return Ok(Some(TuningDecision {
                action: TuningAction::SwitchModel,
                reason: format!(
                    "{} rated {:.2} vs {} {:.2}",
                    best.model, best.avg_rating, current_model, current.avg_rating
                ),
                old_value: current_model,
                new_value: best.model.clone(),
                confidence: (best.count as f64 / 20.0).min(1.0),
            }));
        }
        Ok(None)
    }

    async fn analyze_context_limits(&self) -> Result<Option<TuningDecision>> {
        let since = Utc::now() - Duration::days(WINDOW_DAYS);
        let counts = self.store.comment_counts(since).await?;
        if counts.total == 0 {
            return Ok(None);
        }

        let too_many_pct = counts.too_many as f64 / counts.total as f64 * 100.0;
        let too_few_pct = counts.too_few as f64 / counts.total as f64 * 100.0;
        let current = self.overrides.context_limit(self.settings.context_limit);

        if too_many_pct > COMPLAINT_THRESHOLD_PCT && counts.too_many >= 5 {
            let new_limit = current.saturating_sub(2).max(5);
            return Ok(Some(TuningDecision {
                action: TuningAction::ReduceContextLimit,
                reason: format!(
                    "{too_many_pct:.1}% of feedback says too many sources (n={})",
                    counts.too_many
                ),
                old_value: current.to_string(),
                new_value: new_limit.to_string(),
                confidence: (counts.too_many as f64 / 10.0).min(1.0),
            }));
        }
        if too_few_pct > COMPLAINT_THRESHOLD_PCT && counts.too_few >= 5 {
            let new_limit = (current + 2).min(20);
            return Ok(Some(TuningDecision {
                action: TuningAction::IncreaseContextLimit,
                reason: format!(
                    "{too_few_pct:.1}% of feedback says too few sources (n={})",
                    counts.too_few
                ),
                old_value: current.to_string(),
                new_value: new_limit.to_string(),
                confidence: (counts.too_few as f64 / 10.0).min(1.0),
            }));
        }
        Ok(None)
    }

    /// Apply a decision to the override map and persist it to the log.
    async fn apply(&self, decision: &TuningDecision) -> Result<()> {
        info!(
            action = decision.action.as_str(),
            reason = %decision.reason,
            confidence = decision.confidence,
            "applying tuning decision"
        );

        match decision.action {
            TuningAction::DisableSemanticCache => {
                self.overrides.set(keys::SEMANTIC_CACHE_ENABLED, json!(false));
                warn!("semantic cache disabled due to low ratings");
            }
            TuningAction::SwitchModel => {
                self.overrides.set(keys::DEFAULT_MODEL, json!(decision.new_value));
            }
            TuningAction::ReduceContextLimit | TuningAction::IncreaseContextLimit => {
                let limit: u64 = decision.new_value.parse().unwrap_or(10);
                self.overrides.set(keys::CONTEXT_LIMIT, json!(limit));
            }
        }

        // The log row is part of the contract, not advisory.
        self.store
            .insert_tuning_decision(&TuningLogRow {
                action: decision.action.as_str().to_string(),
                reason: decision.reason.clone(),
                old_value: decision.old_value.clone(),
                new_value: decision.new_value.clone(),
                confidence: decision.confidence,
                created_at: Utc::now(),
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryRelationalStore;
    use crate::types::{FeedbackRecord, FeedbackType, QueryRecord};
    use uuid::Uuid;

    async fn seed_feedback(
        store: &InMemoryRelationalStore,
        agent: &str,
        response_source: &str,
        rating: u8,
        comment: Option<&str>,
    ) {
        let mut query =
            QueryRecord::pending(Uuid::new_v4(), None, "q", crate::crypto::content_hash("q"));
        query.agent_used = Some(agent.to_string());
        query.response_source = response_source.to_string();
        store.insert_query(&query).await.unwrap();

        store
            .insert_feedback(&FeedbackRecord {
                feedback_id: Uuid::new_v4(),
                query_id: query.query_id,
                user_id: Uuid::new_v4(),
                rating,
                feedback_type: if rating >= 3 {
                    FeedbackType::ThumbsUp
                } else {
                    FeedbackType::ThumbsDown
                },
                response_source: Some(response_source.to_string()),
                comment: comment.map(String::from),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    fn tuner(store: Arc<InMemoryRelationalStore>) -> (AutoTuner, Arc<RuntimeOverrides>) {
        let overrides = Arc::new(RuntimeOverrides::new());
        (AutoTuner::new(store, overrides.clone(), Settings::default()), overrides)
    }

    #[tokio::test]
    async fn bad_cache_ratings_disable_the_cache() {
        let store = Arc::new(InMemoryRelationalStore::new());
        for _ in 0..5 {
            seed_feedback(&store, "claude", "semantic_cache_hit", 2, None).await;
        }
        let (tuner, overrides) = tuner(store);

        let decision = tuner.run_cycle().await.unwrap().unwrap();
        assert_eq!(decision.action, TuningAction::DisableSemanticCache);
        assert!((decision.confidence - 0.5).abs() < 1e-9);
        assert!(!overrides.semantic_cache_enabled(true));
    }

    #[tokio::test]
    async fn small_samples_never_fire() {
        let store = Arc::new(InMemoryRelationalStore::new());
        for _ in 0..4 {
            seed_feedback(&store, "claude", "semantic_cache_hit", 1, None).await;
        }
        let (tuner, _) = tuner(store);
        assert!(tuner.run_cycle().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clearly_better_model_wins_routing() {
        let store = Arc::new(InMemoryRelationalStore::new());
        let current = Settings::default().default_model;
        for _ in 0..3 {
            seed_feedback(&store, &current, "fresh_generation", 3, None).await;
        }
        for _ in 0..3 {
            seed_feedback(&store, "gpt-4o", "fresh_generation", 5, None).await;
        }
        let (tuner, overrides) = tuner(store);

        let decision = tuner.run_cycle().await.unwrap().unwrap();
        assert_eq!(decision.action, TuningAction::SwitchModel);
        assert_eq!(decision.new_value, "gpt-4o");
        assert_eq!(overrides.default_model(&current), "gpt-4o");
    }

    #[tokio::test]
    async fn narrow_margin_keeps_the_current_model() {
        let store = Arc::new(InMemoryRelationalStore::new());
        let current = Settings::default().default_model;
        for _ in 0..3 {
            seed_feedback(&store, &current, "fresh_generation", 4, None).await;
        }
        for _ in 0..3 {
            seed_feedback(&store, "gpt-4o", "fresh_generation", 4, None).await;
        }
        let (tuner, _) = tuner(store);
        assert!(tuner.run_cycle().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn too_many_complaints_reduce_the_context_limit() {
        let store = Arc::new(InMemoryRelationalStore::new());
        for _ in 0..5 {
            seed_feedback(&store, "claude", "fresh_generation", 3, Some("too many sources")).await;
        }
        for _ in 0..3 {
            seed_feedback(&store, "claude", "fresh_generation", 4, Some("fine")).await;
        }
        let (tuner, overrides) = tuner(store);

        let decision = tuner.run_cycle().await.unwrap().unwrap();
        assert_eq!(decision.action, TuningAction::ReduceContextLimit);
        assert_eq!(overrides.context_limit(10), 8);
    }

    #[tokio::test]
    async fn limits_are_bounded_to_five_and_twenty() {
        let store = Arc::new(InMemoryRelationalStore::new());
        for _ in 0..6 {
            seed_feedback(&store, "claude", "fresh_generation", 3, Some("too few sources")).await;
        }
        let (tuner, overrides) = tuner(store.clone());
        overrides.set(keys::CONTEXT_LIMIT, json!(20));

        let decision = tuner.run_cycle().await.unwrap().unwrap();
        assert_eq!(decision.action, TuningAction::IncreaseContextLimit);
        // Already at the ceiling: the bound holds.
        assert_eq!(decision.new_value, "20");
        assert_eq!(overrides.context_limit(10), 20);
    }

    #[tokio::test]
    async fn first_firing_rule_wins_the_cycle() {
        let store = Arc::new(InMemoryRelationalStore::new());
        // Both the cache rule and the comment rule would fire.
        for _ in 0..5 {
            seed_feedback(&store, "claude", "semantic_cache_hit", 1, Some("too many sources")).await;
        }
        let (tuner, _) = tuner(store);

        let decision = tuner.run_cycle().await.unwrap().unwrap();
        assert_eq!(decision.action, TuningAction::DisableSemanticCache);
    }
}
