//! Request orchestration: cache, retrieval, prompting, generation, assembly.
//!
//! # Example
//!
//! ```rust,ignore
//! use docqa_rag::{ChatOrchestrator, IndexHandle, RagConfig};
//!
//! let orchestrator = ChatOrchestrator::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(Arc::new(embedder))
//!     .model(Arc::new(model))
//!     .index(Arc::new(IndexHandle::with_corpus(corpus)))
//!     .build()?;
//!
//! let reply = orchestrator.submit_query("Apa syarat wisuda?", None).await?;
//! println!("{}", reply.answer.main_text);
//! ```

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use crate::assembler::{AnswerContext, ReplyEvent, StreamAssembler};
use crate::cache::{CacheStats, QueryCache};
use crate::config::RagConfig;
use crate::document::{RankProvenance, StructuredAnswer};
use crate::embedding::{EmbedMode, EmbeddingProvider};
use crate::error::{RagError, Result};
use crate::generation::{GenerationClient, GenerativeModel};
use crate::index::{Corpus, IndexHandle};
use crate::prompt::{Prompt, PromptBuilder};
use crate::ranker::SimilarityRanker;
use crate::store::{InMemoryMessageStore, MessageRecord, MessageStore, conversation_title};

const REPLY_CHANNEL_CAPACITY: usize = 64;

const GREETING_WORDS: [&str; 7] =
    ["halo", "hai", "hello", "hi", "selamat", "assalamualaikum", "permisi"];
const TEST_QUERIES: [&str; 2] = ["tes", "test"];

/// Canned reply to a greeting on a new conversation.
pub const GREETING_REPLY: &str = "Halo! Saya adalah Chatbot UNAND. Saya siap membantu Anda dengan \
     pertanyaan seputar peraturan kampus dan pemerintah. Silakan ajukan pertanyaan Anda!";

/// Canned reply to a connectivity test query.
pub const TEST_REPLY: &str = "Halo! Saya adalah chatbot Universitas Andalas yang siap membantu \
     Anda dengan informasi seputar peraturan akademik dan kebijakan universitas. Anda dapat \
     bertanya tentang berbagai topik seperti syarat kelulusan, sanksi akademik, peraturan studi, \
     dan informasi akademik lainnya. Silakan ajukan pertanyaan Anda!";

/// Reply when retrieval found no passage at all.
pub const NO_CONTEXT_REPLY: &str = "Maaf, saya tidak menemukan informasi relevan dalam dokumen \
     peraturan yang ada untuk pertanyaan Anda.";

/// Reply when the model returned nothing.
pub const EMPTY_COMPLETION_REPLY: &str =
    "Maaf, saya tidak dapat menghasilkan jawaban yang relevan saat ini.";

/// How an answer was obtained.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind", content = "retrieval")]
pub enum ReplyOrigin {
    /// Canned greeting; no retrieval or generation.
    Greeting,
    /// Served from the query cache.
    Cache,
    /// Retrieval returned nothing; canned reply.
    NoContext,
    /// Freshly generated from ranked passages.
    Generated(RankProvenance),
}

/// A buffered answer.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatReply {
    /// Conversation the answer was appended to.
    pub conversation_id: String,
    /// The persisted answer.
    pub answer: StructuredAnswer,
    /// How the answer was obtained.
    pub origin: ReplyOrigin,
}

impl ChatReply {
    /// Whether this is the canned greeting.
    pub fn is_greeting(&self) -> bool {
        self.origin == ReplyOrigin::Greeting
    }

    /// Whether the answer came from the query cache.
    pub fn from_cache(&self) -> bool {
        self.origin == ReplyOrigin::Cache
    }
}

/// A streamed answer: fragments, then the persisted [`StructuredAnswer`].
#[derive(Debug)]
pub struct StreamingReply {
    /// Conversation the answer is appended to.
    pub conversation_id: String,
    /// How the answer is being obtained.
    pub origin: ReplyOrigin,
    events: mpsc::Receiver<ReplyEvent>,
}

impl StreamingReply {
    /// Receive the next event; `None` after [`ReplyEvent::Completed`].
    pub async fn next_event(&mut self) -> Option<ReplyEvent> {
        self.events.recv().await
    }

    /// The events as a [`Stream`](futures::Stream).
    pub fn into_stream(self) -> ReceiverStream<ReplyEvent> {
        ReceiverStream::new(self.events)
    }

    fn ready(conversation_id: String, origin: ReplyOrigin, answer: StructuredAnswer) -> Self {
        let (tx, events) = mpsc::channel(2);
        let _ = tx.try_send(ReplyEvent::Fragment(answer.main_text.clone()));
        let _ = tx.try_send(ReplyEvent::Completed(answer));
        Self { conversation_id, origin, events }
    }
}

/// Readiness summary for health checks.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct HealthReport {
    /// A non-empty corpus is being served.
    pub index_loaded: bool,
    /// Passages in the served corpus.
    pub chunk_count: usize,
    /// Entries currently in the query cache.
    pub cache_size: usize,
}

/// Work left after the pre-generation steps.
enum Prepared {
    Answered(ChatReply),
    Generate { conversation_id: String, prompt: Prompt, provenance: RankProvenance },
}

/// Answers questions against the served corpus.
///
/// Construct one via [`ChatOrchestrator::builder()`]. All shared state (cache,
/// index handle, store) is injected, so several orchestrators may share it.
pub struct ChatOrchestrator {
    config: RagConfig,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    generation: Arc<GenerationClient>,
    index: Arc<IndexHandle>,
    cache: Arc<QueryCache>,
    store: Arc<dyn MessageStore>,
    ranker: SimilarityRanker,
    prompt_builder: PromptBuilder,
}

impl ChatOrchestrator {
    /// Create a new [`ChatOrchestratorBuilder`].
    pub fn builder() -> ChatOrchestratorBuilder {
        ChatOrchestratorBuilder::default()
    }

    /// Return a reference to the pipeline configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Return a reference to the shared query cache.
    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    /// Return a reference to the served index handle.
    pub fn index(&self) -> &Arc<IndexHandle> {
        &self.index
    }

    /// Return a reference to the message store.
    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Answer a query and return the complete answer.
    ///
    /// `conversation_id` of `None` starts a new conversation; its id is in
    /// the reply.
    ///
    /// # Errors
    ///
    /// - [`RagError::NotReady`] if no non-empty corpus is loaded.
    /// - [`RagError::ConversationNotFound`] for an unknown conversation id.
    /// - [`RagError::DimensionMismatch`] if the embedding model and the index
    ///   disagree.
    /// - [`RagError::UpstreamUnavailable`] once rate-limit retries are exhausted.
    /// - Embedding, generation and timeout failures of the collaborators.
    pub async fn submit_query(
        &self,
        query: &str,
        conversation_id: Option<&str>,
    ) -> Result<ChatReply> {
        let prepared = self.prepare(query, conversation_id).await?;
        let (conversation_id, prompt, provenance) = match prepared {
            Prepared::Answered(reply) => return Ok(reply),
            Prepared::Generate { conversation_id, prompt, provenance } => {
                (conversation_id, prompt, provenance)
            }
        };

        let mut text = self.generation.complete_buffered(&prompt.text).await?;
        if text.trim().is_empty() {
            warn!(conversation_id = %conversation_id, "model returned an empty completion");
            text = EMPTY_COMPLETION_REPLY.to_string();
        }

        let mut assembler = StreamAssembler::new(
            AnswerContext {
                query: query.to_string(),
                conversation_id: conversation_id.clone(),
                sources: prompt.sources,
            },
            self.store.clone(),
            self.cache.clone(),
        );
        assembler.push_fragment(&text);
        let answer = assembler.finish().await;

        Ok(ChatReply { conversation_id, answer, origin: ReplyOrigin::Generated(provenance) })
    }

    /// Answer a query incrementally.
    ///
    /// Generation runs on a spawned task that persists and caches the answer
    /// even if the returned [`StreamingReply`] is dropped early.
    ///
    /// # Errors
    ///
    /// As [`submit_query`](Self::submit_query), except that a failure after
    /// the stream opened is delivered inline and the partial answer is kept.
    pub async fn submit_query_streaming(
        &self,
        query: &str,
        conversation_id: Option<&str>,
    ) -> Result<StreamingReply> {
        let prepared = self.prepare(query, conversation_id).await?;
        let (conversation_id, prompt, provenance) = match prepared {
            Prepared::Answered(reply) => {
                return Ok(StreamingReply::ready(reply.conversation_id, reply.origin, reply.answer));
            }
            Prepared::Generate { conversation_id, prompt, provenance } => {
                (conversation_id, prompt, provenance)
            }
        };

        let fragments = self.generation.complete(&prompt.text).await?;
        let (tx, events) = mpsc::channel(REPLY_CHANNEL_CAPACITY);
        let assembler = StreamAssembler::new(
            AnswerContext {
                query: query.to_string(),
                conversation_id: conversation_id.clone(),
                sources: prompt.sources,
            },
            self.store.clone(),
            self.cache.clone(),
        )
        .with_idle_timeout(self.config.stream_idle_timeout);
        tokio::spawn(assembler.run(fragments, tx));

        Ok(StreamingReply {
            conversation_id,
            origin: ReplyOrigin::Generated(provenance),
            events,
        })
    }

    /// All messages of a conversation, oldest first.
    pub async fn messages(&self, conversation_id: &str) -> Result<Vec<MessageRecord>> {
        self.store.messages(conversation_id).await
    }

    /// Return the current cache occupancy and limits.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop every cached answer.
    pub fn clear_cache(&self) {
        self.cache.clear();
        info!("query cache cleared");
    }

    /// Serve a new corpus. Cached answers from the previous corpus are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::DimensionMismatch`] if the corpus was built with a
    /// different embedding dimensionality than the configured provider's.
    pub async fn reload_index(&self, corpus: Corpus) -> Result<()> {
        let expected = self.embedding_provider.dimensions();
        if corpus.dimensions() != expected {
            return Err(RagError::DimensionMismatch {
                query: expected,
                index: corpus.dimensions(),
            });
        }
        self.index.swap(corpus).await;
        self.cache.clear();
        Ok(())
    }

    /// Report whether queries can be served.
    pub async fn health(&self) -> HealthReport {
        let corpus = self.index.current().await;
        HealthReport {
            index_loaded: corpus.as_ref().is_some_and(|c| !c.is_empty()),
            chunk_count: corpus.as_ref().map_or(0, |c| c.len()),
            cache_size: self.cache.len(),
        }
    }

    /// Everything up to the model call.
    async fn prepare(&self, query: &str, conversation_id: Option<&str>) -> Result<Prepared> {
        let corpus = match self.index.current().await {
            Some(corpus) if !corpus.is_empty() => corpus,
            _ => {
                warn!("query rejected, no corpus loaded");
                return Err(RagError::NotReady(
                    "the document index is not loaded; try again later".into(),
                ));
            }
        };

        let (conversation_id, is_new) = self.open_conversation(query, conversation_id).await?;
        self.store.append(&conversation_id, MessageRecord::user(query)).await?;

        if let Some(greeting) = canned_greeting(query, is_new) {
            info!(conversation_id = %conversation_id, "greeting short-circuit");
            let answer = StructuredAnswer::plain(greeting);
            self.persist(&conversation_id, &answer).await;
            return Ok(Prepared::Answered(ChatReply {
                conversation_id,
                answer,
                origin: ReplyOrigin::Greeting,
            }));
        }

        if let Some(answer) = self.cache.get(query) {
            info!(conversation_id = %conversation_id, "answered from cache");
            self.persist(&conversation_id, &answer).await;
            return Ok(Prepared::Answered(ChatReply {
                conversation_id,
                answer,
                origin: ReplyOrigin::Cache,
            }));
        }

        let query_vector = self.embed_query(query).await?;
        if query_vector.len() != corpus.dimensions() {
            error!(
                query = query_vector.len(),
                index = corpus.dimensions(),
                "embedding dimensionality does not match the index"
            );
            return Err(RagError::DimensionMismatch {
                query: query_vector.len(),
                index: corpus.dimensions(),
            });
        }

        let ranked = self.ranker.rank(&corpus, &query_vector).await?;
        if ranked.is_empty() {
            info!(conversation_id = %conversation_id, "no passages retrieved");
            let answer = StructuredAnswer::plain(NO_CONTEXT_REPLY);
            self.persist(&conversation_id, &answer).await;
            return Ok(Prepared::Answered(ChatReply {
                conversation_id,
                answer,
                origin: ReplyOrigin::NoContext,
            }));
        }

        let prompt = self.prompt_builder.build(query, &ranked);
        debug!(
            conversation_id = %conversation_id,
            passages = ranked.len(),
            sources = prompt.sources.len(),
            kind = ?prompt.kind,
            provenance = ?ranked.provenance,
            model = self.generation.model_name(),
            "prompt assembled"
        );

        Ok(Prepared::Generate { conversation_id, prompt, provenance: ranked.provenance })
    }

    async fn open_conversation(
        &self,
        query: &str,
        conversation_id: Option<&str>,
    ) -> Result<(String, bool)> {
        match conversation_id {
            Some(id) => {
                if !self.store.conversation_exists(id).await? {
                    return Err(RagError::ConversationNotFound(id.to_string()));
                }
                Ok((id.to_string(), false))
            }
            None => {
                let id = self.store.create_conversation(&conversation_title(query)).await?;
                debug!(conversation_id = %id, "conversation created");
                Ok((id, true))
            }
        }
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let timeout = self.config.embedding_timeout;
        tokio::time::timeout(timeout, self.embedding_provider.embed(query, EmbedMode::Query))
            .await
            .map_err(|_| {
                error!(?timeout, "query embedding timed out");
                RagError::Timeout { operation: "query embedding", timeout }
            })?
    }

    async fn persist(&self, conversation_id: &str, answer: &StructuredAnswer) {
        let record = MessageRecord::assistant(answer);
        if let Err(e) = self.store.append(conversation_id, record).await {
            error!(conversation_id, error = %e, "failed to persist answer");
        }
    }
}

/// The canned reply for greetings (new conversations only) and test queries.
fn canned_greeting(query: &str, new_conversation: bool) -> Option<&'static str> {
    let normalized = query.trim().to_lowercase();
    if TEST_QUERIES.contains(&normalized.as_str()) {
        return Some(TEST_REPLY);
    }
    let greets = normalized
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| GREETING_WORDS.contains(&word));
    (new_conversation && greets).then_some(GREETING_REPLY)
}

/// Builder for constructing a [`ChatOrchestrator`].
///
/// `embedding_provider` and either `model` or `generation_client` are
/// required. The index handle defaults to an empty one, the cache is sized
/// from the config, and the store defaults to [`InMemoryMessageStore`].
#[derive(Default)]
pub struct ChatOrchestratorBuilder {
    config: Option<RagConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    model: Option<Arc<dyn GenerativeModel>>,
    generation: Option<Arc<GenerationClient>>,
    index: Option<Arc<IndexHandle>>,
    cache: Option<Arc<QueryCache>>,
    store: Option<Arc<dyn MessageStore>>,
}

impl ChatOrchestratorBuilder {
    /// Set the pipeline configuration. Defaults to [`RagConfig::default`].
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the embedding provider used for queries.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the generative model; it is wrapped in a [`GenerationClient`]
    /// configured from the pipeline config.
    pub fn model(mut self, model: Arc<dyn GenerativeModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// Set a preconfigured generation client, taking precedence over `model`.
    pub fn generation_client(mut self, client: Arc<GenerationClient>) -> Self {
        self.generation = Some(client);
        self
    }

    /// Set the index handle shared with the ingestion or reload path.
    pub fn index(mut self, index: Arc<IndexHandle>) -> Self {
        self.index = Some(index);
        self
    }

    /// Set a shared query cache instead of one sized from the config.
    pub fn cache(mut self, cache: Arc<QueryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Set the message store.
    pub fn store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Build the [`ChatOrchestrator`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the config is invalid or a
    /// required component is missing.
    pub fn build(self) -> Result<ChatOrchestrator> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let embedding_provider = self
            .embedding_provider
            .ok_or_else(|| RagError::ConfigError("embedding_provider is required".to_string()))?;
        let generation = match (self.generation, self.model) {
            (Some(client), _) => client,
            (None, Some(model)) => Arc::new(GenerationClient::from_config(model, &config)),
            (None, None) => {
                return Err(RagError::ConfigError(
                    "model or generation_client is required".to_string(),
                ));
            }
        };
        let cache = match self.cache {
            Some(cache) => cache,
            None => Arc::new(QueryCache::from_config(&config)?),
        };

        Ok(ChatOrchestrator {
            ranker: SimilarityRanker::from_config(&config),
            prompt_builder: PromptBuilder::new(),
            embedding_provider,
            generation,
            index: self.index.unwrap_or_default(),
            cache,
            store: self.store.unwrap_or_else(|| Arc::new(InMemoryMessageStore::new())),
            config,
        })
    }
}
