use anyhow::Context;
use clap::{Parser, Subcommand};
use engram_core::config::Settings;
use engram_core::context::AppContext;
use engram_core::embeddings::MockEmbeddingProvider;
use engram_core::llm::MockLlmProvider;
use engram_core::storage::{InMemoryRelationalStore, InMemoryVectorStore};
use std::sync::Arc;

mod commands;
mod output;

use commands::Runner;

#[derive(Parser)]
#[command(name = "engram")]
#[command(about = "Command-line interface for the engram memory platform")]
#[command(version, long_about = None)]
struct Cli {
    /// Database URL (libsql://host, file:path, or :memory:)
    #[arg(long, env = "ENGRAM_DB_URL", default_value = ":memory:")]
    db_url: String,

    /// Database auth token (remote connections only)
    #[arg(long, env = "ENGRAM_DB_TOKEN", default_value = "")]
    db_token: String,

    /// Print results as JSON instead of human-readable text
    #[arg(long)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a memory
    #[command(alias = "rem")]
    Remember {
        /// Memory content
        content: String,
        /// Owning user id
        #[arg(long)]
        user: uuid::Uuid,
        /// Comma-separated tags
        #[arg(long)]
        tags: Option<String>,
        /// Memory tier (SHORT, MID, LONG)
        #[arg(long, default_value = "SHORT")]
        tier: String,
        /// Explicit privacy level; auto-detected when omitted
        #[arg(long)]
        privacy: Option<String>,
    },
    /// Ask a question through the full pipeline
    Ask {
        question: String,
        #[arg(long)]
        user: uuid::Uuid,
        /// Tenant label
        #[arg(long, default_value = "default")]
        tenant: String,
        /// Manual agent override
        #[arg(long)]
        agent: Option<String>,
        /// Skip the semantic cache
        #[arg(long)]
        bypass_cache: bool,
    },
    /// Delete a memory
    Forget {
        memory_id: uuid::Uuid,
    },
    /// List a user's memories
    List {
        #[arg(long)]
        user: uuid::Uuid,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Rate an answer
    Feedback {
        query_id: uuid::Uuid,
        #[arg(long)]
        user: uuid::Uuid,
        /// Star rating, 1..=5
        #[arg(long)]
        rating: u8,
        /// thumbs_up, thumbs_down, or regenerate
        #[arg(long, default_value = "thumbs_up")]
        kind: String,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Run a background job once
    Jobs {
        /// enrichment, topic_compaction, domain_compaction, score_decay,
        /// dedup_sweep, retention_cleanup, vector_reconcile, or auto_tune
        job: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let context = build_context(&cli).await.context("failed to initialize")?;
    let runner = Runner::new(context, cli.json);

    match cli.command {
        Commands::Remember { content, user, tags, tier, privacy } => {
            runner.remember(content, user, tags, &tier, privacy.as_deref()).await
        }
        Commands::Ask { question, user, tenant, agent, bypass_cache } => {
            runner.ask(question, user, tenant, agent, bypass_cache).await
        }
        Commands::Forget { memory_id } => runner.forget(memory_id).await,
        Commands::List { user, limit, offset } => runner.list(user, limit, offset).await,
        Commands::Feedback { query_id, user, rating, kind, comment } => {
            runner.feedback(query_id, user, rating, &kind, comment).await
        }
        Commands::Jobs { job } => runner.run_job(&job).await,
    }
}

/// Wire the application context from settings and CLI flags.
///
/// The vector store falls back to the in-memory implementation when no
/// `VECTOR_HOST` is configured; same for the relational store with the
/// default `:memory:` URL. Remote providers need the respective API keys.
async fn build_context(cli: &Cli) -> anyhow::Result<AppContext> {
    let settings = Settings::from_env();

    let relational: Arc<dyn engram_core::storage::RelationalStore> = if cli.db_url == ":memory:" {
        Arc::new(InMemoryRelationalStore::new())
    } else {
        let store = engram_storage_turso::TursoStore::new(&cli.db_url, &cli.db_token).await?;
        store.initialize_schema().await?;
        Arc::new(store)
    };

    let vectors: Arc<dyn engram_core::storage::VectorStore> =
        if std::env::var("VECTOR_HOST").is_ok() {
            let store = engram_storage_weaviate::WeaviateStore::new(
                &settings.vector_host,
                settings.vector_port,
            )?;
            store.assert_collections().await?;
            Arc::new(store)
        } else {
            Arc::new(InMemoryVectorStore::new())
        };

    // Provider wiring is deployment-specific; the CLI defaults to the
    // deterministic local providers so every command works offline.
    let embedder = Arc::new(MockEmbeddingProvider::new());
    let llm = Arc::new(MockLlmProvider::new());

    Ok(AppContext::build(settings, relational, vectors, embedder, llm)?)
}
