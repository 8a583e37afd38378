//! Feedback aggregation
//!
//! Ratings are appended, never mutated; duplicate submissions accumulate.
//! After each append the denormalized summary for the target query is
//! recomputed and written onto every memory item that grounded the answer,
//! so the retrieval scorer sees fresh feedback without a join.
//!
//! The stored query row is the source of truth for `response_source`; a
//! caller-supplied value only backfills a row that has none.

use crate::error::{Error, Result};
use crate::storage::RelationalStore;
use crate::types::{FeedbackRecord, FeedbackSummary, FeedbackType, MAX_RATING, MIN_RATING};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One feedback submission.
#[derive(Debug, Clone)]
pub struct FeedbackSubmission {
    pub query_id: Uuid,
    pub user_id: Uuid,
    /// Star rating, 1..=5.
    pub rating: u8,
    pub feedback_type: FeedbackType,
    /// Caller's view of where the answer came from; used only to backfill.
    pub response_source: Option<String>,
    pub comment: Option<String>,
}

/// Result of a submission: the appended row and the fresh rollup.
#[derive(Debug, Clone)]
pub struct FeedbackOutcome {
    pub feedback_id: Uuid,
    pub summary: FeedbackSummary,
}

/// Records ratings and maintains denormalized summaries.
pub struct FeedbackAggregator {
    store: Arc<dyn RelationalStore>,
}

impl FeedbackAggregator {
    #[must_use]
    pub fn new(store: Arc<dyn RelationalStore>) -> Self {
        Self { store }
    }

    /// Validate and append a feedback row, then refresh the rollup.
    ///
    /// Fails with [`Error::InvalidInput`] on an out-of-range rating and
    /// [`Error::NotFound`] for an unknown query id.
    pub async fn submit(&self, submission: FeedbackSubmission) -> Result<FeedbackOutcome> {
        if !(MIN_RATING..=MAX_RATING).contains(&submission.rating) {
            return Err(Error::InvalidInput(format!(
                "rating must be {MIN_RATING}..={MAX_RATING}, got {}",
                submission.rating
            )));
        }

        let query = self
            .store
            .get_query(submission.query_id)
            .await?
            .ok_or(Error::NotFound(submission.query_id))?;

        // The stored row wins; the caller's value only fills a blank.
        let response_source = if query.response_source == "pending" {
            submission.response_source.clone()
        } else {
            Some(query.response_source.clone())
        };

        let record = FeedbackRecord {
            feedback_id: Uuid::new_v4(),
            query_id: submission.query_id,
            user_id: submission.user_id,
            rating: submission.rating,
            feedback_type: submission.feedback_type,
            response_source,
            comment: submission.comment,
            created_at: Utc::now(),
        };
        self.store.insert_feedback(&record).await?;

        let summary = self.recompute_summary(submission.query_id).await?;

        // Propagate the rollup to every memory that grounded the answer.
        for memory_id in &query.memory_ids {
            if let Err(e) = self.store.update_feedback_summary(*memory_id, &summary).await {
                warn!(memory_id = %memory_id, error = %e, "feedback rollup write failed");
            }
        }

        info!(
            query_id = %submission.query_id,
            rating = submission.rating,
            total = summary.total_ratings,
            "feedback recorded"
        );
        Ok(FeedbackOutcome { feedback_id: record.feedback_id, summary })
    }

    async fn recompute_summary(&self, query_id: Uuid) -> Result<FeedbackSummary> {
        let rows = self.store.list_feedback_for_query(query_id).await?;
        let mut summary = FeedbackSummary::default();
        let mut rating_sum = 0.0;

        for row in &rows {
            summary.total_ratings += 1;
            rating_sum += f64::from(row.rating);
            match row.feedback_type {
                FeedbackType::ThumbsUp => summary.thumbs_up += 1,
                FeedbackType::ThumbsDown => summary.thumbs_down += 1,
                FeedbackType::Regenerate => summary.regenerates += 1,
            }
        }

        if summary.total_ratings > 0 {
            // Map the 1..5 star average onto [-1, 1] for the scorer.
            let avg_stars = rating_sum / summary.total_ratings as f64;
            summary.avg_rating = Some((avg_stars - 3.0) / 2.0);
        }

        debug!(query_id = %query_id, total = summary.total_ratings, "summary recomputed");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::tests_support::memory_item;
    use crate::storage::InMemoryRelationalStore;
    use crate::types::QueryRecord;

    async fn seed_query(store: &InMemoryRelationalStore, memory_ids: Vec<Uuid>) -> Uuid {
        let mut record =
            QueryRecord::pending(Uuid::new_v4(), None, "q", crate::crypto::content_hash("q"));
        record.response_source = "fresh_generation".to_string();
        record.memory_ids = memory_ids;
        store.insert_query(&record).await.unwrap();
        record.query_id
    }

    fn submission(query_id: Uuid, rating: u8, feedback_type: FeedbackType) -> FeedbackSubmission {
        FeedbackSubmission {
            query_id,
            user_id: Uuid::new_v4(),
            rating,
            feedback_type,
            response_source: None,
            comment: None,
        }
    }

    #[tokio::test]
    async fn ratings_accumulate_into_the_summary() {
        let store = Arc::new(InMemoryRelationalStore::new());
        let query_id = seed_query(&store, Vec::new()).await;
        let aggregator = FeedbackAggregator::new(store.clone());

        let outcome = aggregator
            .submit(submission(query_id, 5, FeedbackType::ThumbsUp))
            .await
            .unwrap();
        assert_eq!(outcome.summary.total_ratings, 1);
        assert_eq!(outcome.summary.thumbs_up, 1);
        assert!((outcome.summary.avg_rating.unwrap() - 1.0).abs() < 1e-9);

        let outcome = aggregator
            .submit(submission(query_id, 1, FeedbackType::ThumbsDown))
            .await
            .unwrap();
        assert_eq!(outcome.summary.total_ratings, 2);
        assert_eq!(outcome.summary.thumbs_down, 1);
        // (5 + 1) / 2 = 3 stars → neutral 0.0.
        assert!(outcome.summary.avg_rating.unwrap().abs() < 1e-9);
    }

    #[tokio::test]
    async fn summary_propagates_to_grounding_memories() {
        let store = Arc::new(InMemoryRelationalStore::new());
        let user = Uuid::new_v4();
        let item = memory_item(user, "grounding memory");
        store.insert_memory(&item).await.unwrap();
        let query_id = seed_query(&store, vec![item.memory_id]).await;

        let aggregator = FeedbackAggregator::new(store.clone());
        aggregator
            .submit(submission(query_id, 4, FeedbackType::ThumbsUp))
            .await
            .unwrap();

        let stored = store.get_memory(item.memory_id).await.unwrap().unwrap();
        let summary = stored.feedback_summary.unwrap();
        assert_eq!(summary.total_ratings, 1);
        assert_eq!(summary.thumbs_up, 1);
    }

    #[tokio::test]
    async fn out_of_range_rating_is_rejected() {
        let store = Arc::new(InMemoryRelationalStore::new());
        let query_id = seed_query(&store, Vec::new()).await;
        let aggregator = FeedbackAggregator::new(store);

        for rating in [0u8, 6] {
            let result = aggregator
                .submit(submission(query_id, rating, FeedbackType::ThumbsUp))
                .await;
            assert!(matches!(result, Err(Error::InvalidInput(_))));
        }
    }

    #[tokio::test]
    async fn unknown_query_is_not_found() {
        let store = Arc::new(InMemoryRelationalStore::new());
        let aggregator = FeedbackAggregator::new(store);
        let result = aggregator
            .submit(submission(Uuid::new_v4(), 3, FeedbackType::Regenerate))
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn stored_response_source_wins_over_caller() {
        let store = Arc::new(InMemoryRelationalStore::new());
        let query_id = seed_query(&store, Vec::new()).await;
        let aggregator = FeedbackAggregator::new(store.clone());

        let mut s = submission(query_id, 5, FeedbackType::ThumbsUp);
        s.response_source = Some("semantic_cache".to_string());
        aggregator.submit(s).await.unwrap();

        let rows = store.list_feedback_for_query(query_id).await.unwrap();
        assert_eq!(rows[0].response_source.as_deref(), Some("fresh_generation"));
    }

    #[tokio::test]
    async fn duplicate_submissions_accumulate() {
        let store = Arc::new(InMemoryRelationalStore::new());
        let query_id = seed_query(&store, Vec::new()).await;
        let aggregator = FeedbackAggregator::new(store.clone());

        for _ in 0..3 {
            aggregator
                .submit(submission(query_id, 5, FeedbackType::ThumbsUp))
                .await
                .unwrap();
        }
        let rows = store.list_feedback_for_query(query_id).await.unwrap();
        assert_eq!(rows.len(), 3);
    }
}
