//! # docqa-rag
//!
//! Retrieval orchestration and streaming answer assembly for question
//! answering over a private document corpus.
//!
//! ## Overview
//!
//! A query flows through these stages:
//!
//! 1. [`QueryCache`] - bounded LRU cache with per-entry expiry; a hit skips everything below
//! 2. [`EmbeddingProvider`] - embeds the query
//! 3. [`SimilarityRanker`] - threshold-filtered passages, or a nearest-neighbour fallback
//! 4. [`PromptBuilder`] - one structured instruction prompt with four marked sections
//! 5. [`GenerationClient`] - bounded retry on rate limiting, bounded concurrency
//! 6. [`StreamAssembler`] - accumulates fragments, parses sections, persists and caches once
//!
//! [`ChatOrchestrator`] wires the stages together and owns no global state:
//! the cache, the [`IndexHandle`] and the [`MessageStore`] are injected.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use docqa_rag::{ChatOrchestrator, Corpus, IndexHandle, RagConfig};
//! use docqa_rag::nomic::NomicEmbeddingProvider;
//! use docqa_rag::openrouter::OpenRouterModel;
//!
//! let corpus = Corpus::load_snapshot("index/corpus.json").await?;
//! let orchestrator = ChatOrchestrator::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(Arc::new(NomicEmbeddingProvider::from_env()?))
//!     .model(Arc::new(OpenRouterModel::from_env()?))
//!     .index(Arc::new(IndexHandle::with_corpus(corpus)))
//!     .build()?;
//!
//! let reply = orchestrator.submit_query("Apa syarat wisuda?", None).await?;
//! ```
//!
//! ## Features
//!
//! - `nomic` - [`nomic::NomicEmbeddingProvider`]
//! - `openrouter` - [`openrouter::OpenRouterModel`]
//! - `full` - both

pub mod assembler;
pub mod cache;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod index;
pub mod orchestrator;
pub mod prompt;
pub mod ranker;
pub mod store;

#[cfg(feature = "nomic")]
pub mod nomic;
#[cfg(feature = "openrouter")]
pub mod openrouter;

pub use assembler::{AnswerContext, ReplyEvent, StreamAssembler, StreamState, parse_answer};
pub use cache::{CacheStats, QueryCache};
pub use config::{RagConfig, RagConfigBuilder};
pub use document::{CorpusChunk, RankProvenance, RankedResult, RetrievedChunk, StructuredAnswer};
pub use embedding::{EmbedMode, EmbeddingProvider};
pub use error::{RagError, Result};
pub use generation::{FragmentStream, GenerationClient, GenerativeModel, RetryPolicy};
pub use index::{Corpus, CorpusSnapshot, FlatL2Index, IndexHandle, Neighbor, VectorIndex};
pub use orchestrator::{
    ChatOrchestrator, ChatOrchestratorBuilder, ChatReply, HealthReport, ReplyOrigin,
    StreamingReply,
};
pub use prompt::{Prompt, PromptBuilder, QuestionKind};
pub use ranker::SimilarityRanker;
pub use store::{InMemoryMessageStore, MessageRecord, MessageStore, Role};
