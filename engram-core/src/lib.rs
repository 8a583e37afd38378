#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_docs_in_private_items)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # Engram Core
//!
//! The memory fabric and query orchestration core of the engram recall
//! platform. It ingests heterogeneous content, stores it with privacy
//! classification and content-addressed deduplication, and answers
//! natural-language queries by combining semantic retrieval, a semantic
//! answer cache, and a pluggable LLM backend.
//!
//! ## Core Concepts
//!
//! - **Memory items**: encrypted, embedded, privacy-tagged units of recall
//! - **Dual retrieval**: concurrent search over raw Q&A and distilled knowledge
//! - **CRS**: five-factor composite retrieval score in [0, 1]
//! - **Semantic cache**: vector-similar canonical-answer lookup
//! - **Compaction**: rollup of knowledge into topics and domain maps
//! - **Auto-tuning**: feedback-driven runtime configuration overrides
//!
//! ## Module Organization
//!
//! ### Primary APIs
//! - [`gateway`]: the end-to-end `ask` pipeline
//! - [`memory`]: the dual-store write path
//! - [`retrieval`]: parallel cache + knowledge search
//! - [`compaction`]: level 2→3→4 knowledge rollups
//!
//! ### Support Modules
//! - [`types`]: common types used across the system
//! - [`storage`]: relational and vector store abstractions
//! - [`crypto`] / [`privacy`] / [`secrets`]: hashing, AEAD, classification
//! - [`scoring`] / [`quality`]: ranking and the answer quality gate
//! - [`conversation`]: rolling thread context
//! - [`tuner`] / [`jobs`] / [`audit`]: background behavior
//!
//! ## Quick Start
//!
//! ```no_run
//! use engram_core::config::Settings;
//! use engram_core::context::AppContext;
//! use engram_core::embeddings::MockEmbeddingProvider;
//! use engram_core::gateway::AskRequest;
//! use engram_core::llm::MockLlmProvider;
//! use engram_core::memory::CreateMemory;
//! use engram_core::storage::{InMemoryRelationalStore, InMemoryVectorStore};
//! use std::sync::Arc;
//! use uuid::Uuid;
//!
//! #[tokio::main]
//! async fn main() -> engram_core::Result<()> {
//!     let context = AppContext::build(
//!         Settings::from_env(),
//!         Arc::new(InMemoryRelationalStore::new()),
//!         Arc::new(InMemoryVectorStore::new()),
//!         Arc::new(MockEmbeddingProvider::new()),
//!         Arc::new(MockLlmProvider::new()),
//!     )?;
//!
//!     let user = Uuid::new_v4();
//!     let _memory_id = context
//!         .memory
//!         .create(CreateMemory::new(user, "The deploy runs from the release branch."))
//!         .await?;
//!
//!     let response = context
//!         .gateway
//!         .ask(AskRequest::new("How do we deploy?", user, "default"))
//!         .await?;
//!     println!("{}", response.answer);
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod compaction;
pub mod config;
pub mod constants;
pub mod context;
pub mod conversation;
pub mod crypto;
pub mod embeddings;
pub mod enrichment;
pub mod error;
pub mod feedback;
pub mod gateway;
pub mod intent;
pub mod jobs;
pub mod llm;
pub mod memory;
pub mod privacy;
pub mod quality;
pub mod retrieval;
pub mod scoring;
pub mod secrets;
pub mod semantic_cache;
pub mod storage;
pub mod tuner;
pub mod types;
pub mod users;

// Re-export commonly used types
pub use audit::AuditLogger;
pub use config::{RuntimeOverrides, Settings};
pub use context::AppContext;
pub use conversation::{ConversationMemory, ThreadContext};
pub use crypto::{content_hash, EncryptionManager, KeyManager};
pub use enrichment::KnowledgeExtractor;
pub use error::{Error, Result};
pub use feedback::{FeedbackAggregator, FeedbackSubmission};
pub use gateway::{AskRequest, AskResponse, Gateway};
pub use memory::{CreateMemory, MemoryService, UpdateMemory};
pub use privacy::PrivacyDetector;
pub use quality::{QualityResult, QualityValidator};
pub use retrieval::{DualRetriever, SearchParams};
pub use scoring::{ContextScorer, ScoringWeights};
pub use semantic_cache::SemanticCache;
pub use storage::{Collection, RelationalStore, SearchFilter, VectorStore};
pub use tuner::AutoTuner;
pub use types::{
    CacheStatus, FeedbackType, MemoryItem, MemoryTier, PrivacyLevel, QueryIntent, Role,
};
pub use users::UserService;
