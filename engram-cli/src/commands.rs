//! Command implementations

use crate::output;
use anyhow::{bail, Context};
use engram_core::context::AppContext;
use engram_core::feedback::FeedbackSubmission;
use engram_core::gateway::AskRequest;
use engram_core::jobs::JobKind;
use engram_core::memory::CreateMemory;
use engram_core::types::{FeedbackType, MemoryTier, PrivacyLevel};
use uuid::Uuid;

/// Executes CLI commands against a wired application context.
pub struct Runner {
    context: AppContext,
    json: bool,
}

impl Runner {
    #[must_use]
    pub fn new(context: AppContext, json: bool) -> Self {
        Self { context, json }
    }

    pub async fn remember(
        &self,
        content: String,
        user: Uuid,
        tags: Option<String>,
        tier: &str,
        privacy: Option<&str>,
    ) -> anyhow::Result<()> {
        let tier = MemoryTier::parse(tier)
            .with_context(|| format!("unknown tier: {tier} (expected SHORT, MID, or LONG)"))?;
        let privacy = privacy
            .map(|p| {
                PrivacyLevel::parse(p).with_context(|| format!("unknown privacy level: {p}"))
            })
            .transpose()?;

        let mut request = CreateMemory::new(user, content).with_tier(tier);
        if let Some(tags) = tags {
            request = request.with_tags(tags.split(',').map(|t| t.trim().to_string()).collect());
        }
        if let Some(privacy) = privacy {
            request = request.with_privacy(privacy);
        }

        match self.context.memory.create(request).await? {
            Some(id) => {
                if self.json {
                    println!("{}", serde_json::json!({ "memory_id": id.to_string() }));
                } else {
                    println!("stored {id}");
                }
            }
            None => {
                if self.json {
                    println!("{}", serde_json::json!({ "memory_id": null, "duplicate": true }));
                } else {
                    println!("duplicate: already stored");
                }
            }
        }
        Ok(())
    }

    pub async fn ask(
        &self,
        question: String,
        user: Uuid,
        tenant: String,
        agent: Option<String>,
        bypass_cache: bool,
    ) -> anyhow::Result<()> {
        let mut request = AskRequest::new(question, user, tenant);
        request.manual_agent = agent;
        request.bypass_cache = bypass_cache;

        let response = self.context.gateway.ask(request).await?;
        if self.json {
            println!("{}", output::ask_response_json(&response));
        } else {
            output::print_ask_response(&response);
        }
        Ok(())
    }

    pub async fn forget(&self, memory_id: Uuid) -> anyhow::Result<()> {
        if self.context.memory.delete(memory_id).await? {
            println!("deleted {memory_id}");
        } else {
            bail!("memory {memory_id} not found");
        }
        Ok(())
    }

    pub async fn list(&self, user: Uuid, limit: usize, offset: usize) -> anyhow::Result<()> {
        let items = self.context.memory.list(user, limit, offset).await?;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&items)?);
        } else {
            output::print_memory_list(&items);
        }
        Ok(())
    }

    pub async fn feedback(
        &self,
        query_id: Uuid,
        user: Uuid,
        rating: u8,
        kind: &str,
        comment: Option<String>,
    ) -> anyhow::Result<()> {
        let feedback_type = FeedbackType::parse(kind).with_context(|| {
            format!("unknown feedback type: {kind} (expected thumbs_up, thumbs_down, regenerate)")
        })?;

        let outcome = self
            .context
            .feedback
            .submit(FeedbackSubmission {
                query_id,
                user_id: user,
                rating,
                feedback_type,
                response_source: None,
                comment,
            })
            .await?;

        if self.json {
            println!(
                "{}",
                serde_json::json!({
                    "feedback_id": outcome.feedback_id.to_string(),
                    "updated_summary": outcome.summary,
                })
            );
        } else {
            println!(
                "recorded ({} ratings, avg {:.2})",
                outcome.summary.total_ratings,
                outcome.summary.avg_rating.unwrap_or(0.0)
            );
        }
        Ok(())
    }

    pub async fn run_job(&self, job: &str) -> anyhow::Result<()> {
        let kind = match job {
            "enrichment" => JobKind::Enrichment,
            "topic_compaction" => JobKind::TopicCompaction,
            "domain_compaction" => JobKind::DomainCompaction,
            "score_decay" => JobKind::ScoreDecay,
            "dedup_sweep" => JobKind::DedupSweep,
            "retention_cleanup" => JobKind::RetentionCleanup,
            "vector_reconcile" => JobKind::VectorReconcile,
            "auto_tune" => JobKind::AutoTune,
            other => bail!("unknown job: {other}"),
        };
        self.context.jobs.run(kind).await;
        println!("{job} complete");
        Ok(())
    }
}
