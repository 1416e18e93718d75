//! Error types for the `docqa-rag` crate.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while answering a query.
#[derive(Debug, Error)]
pub enum RagError {
    /// Missing credentials or inconsistent settings. Fatal at startup.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The vector index has not been loaded yet, or it holds no chunks.
    #[error("System not ready: {0}")]
    NotReady(String),

    /// The query embedding and the loaded index disagree on dimensionality.
    ///
    /// This means the index was built with a different embedding model and
    /// must be rebuilt; it is never reported as "no results".
    #[error(
        "Embedding dimension mismatch: query has {query} dimensions, index has {index}; \
         rebuild the index with the embedding model used for queries"
    )]
    DimensionMismatch {
        /// Dimensionality of the query vector.
        query: usize,
        /// Dimensionality of the vectors stored in the index.
        index: usize,
    },

    /// The generative model provider rejected the call because of rate limiting.
    #[error("Rate limited by {provider}: {message}")]
    RateLimited {
        /// The provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// Retries against the generative model were exhausted.
    #[error("Upstream model unavailable after {attempts} attempts; try again shortly")]
    UpstreamUnavailable {
        /// How many attempts were made.
        attempts: u32,
    },

    /// An upstream call did not finish within its bounded wait.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
        /// The configured bound.
        timeout: Duration,
    },

    /// An error occurred during embedding generation.
    #[error("Embedding error ({provider}): {message}")]
    EmbeddingError {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// A non rate-limit failure from the generative model provider.
    #[error("Generation error ({provider}): {message}")]
    GenerationError {
        /// The model provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// An error in the vector index or its chunk table.
    #[error("Index error: {0}")]
    IndexError(String),

    /// An error in the message store.
    #[error("Message store error: {0}")]
    StoreError(String),

    /// The requested conversation does not exist.
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),
}

impl RagError {
    /// Returns `true` when the error indicates upstream rate limiting.
    ///
    /// Typed [`RagError::RateLimited`] errors always qualify; other errors are
    /// inspected for the usual rate-limit indicators in their message, since
    /// OpenAI-compatible gateways often wrap a 429 inside a generic failure.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            RagError::RateLimited { .. } => true,
            RagError::GenerationError { message, .. } => mentions_rate_limit(message),
            _ => false,
        }
    }
}

fn mentions_rate_limit(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("429") || lower.contains("rate limit") || lower.contains("rate-limited")
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;
