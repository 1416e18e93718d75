//! Configuration for the question-answering pipeline.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::assembler::DEFAULT_STREAM_IDLE_TIMEOUT;
use crate::error::{RagError, Result};

/// Configuration parameters for retrieval, caching and generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagConfig {
    /// Number of nearest neighbours requested from the vector index.
    pub top_k: usize,
    /// Minimum similarity score for a passage to count as relevant.
    pub similarity_threshold: f32,
    /// Maximum number of relevant passages placed in the prompt.
    pub max_context: usize,
    /// Number of raw neighbours used when nothing meets the threshold.
    pub fallback_count: usize,
    /// Maximum number of cached answers.
    pub cache_max_size: usize,
    /// How long a cached answer stays valid.
    pub cache_ttl: Duration,
    /// Bounded wait for a single embedding call.
    pub embedding_timeout: Duration,
    /// Bounded wait for a single buffered generation attempt.
    pub generation_timeout: Duration,
    /// Attempt ceiling for rate-limited buffered generation calls.
    pub max_generation_attempts: u32,
    /// First backoff delay; doubled after every rate-limited attempt.
    pub retry_base_delay: Duration,
    /// Upper bound on concurrent calls to the generative model.
    pub max_concurrent_generations: usize,
    /// Longest silence tolerated between two streamed fragments.
    pub stream_idle_timeout: Duration,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            top_k: 8,
            similarity_threshold: 0.7,
            max_context: 5,
            fallback_count: 5,
            cache_max_size: 100,
            cache_ttl: Duration::from_secs(60 * 60),
            embedding_timeout: Duration::from_secs(30),
            generation_timeout: Duration::from_secs(120),
            max_generation_attempts: 3,
            retry_base_delay: Duration::from_millis(600),
            max_concurrent_generations: 4,
            stream_idle_timeout: DEFAULT_STREAM_IDLE_TIMEOUT,
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Check that the parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if:
    /// - `top_k`, `max_context`, `fallback_count`, `cache_max_size`,
    ///   `max_generation_attempts` or `max_concurrent_generations` is zero
    /// - `stream_idle_timeout` is zero
    /// - `similarity_threshold` is outside `[0, 1]`
    pub fn validate(&self) -> Result<()> {
        let counts = [
            ("top_k", self.top_k),
            ("max_context", self.max_context),
            ("fallback_count", self.fallback_count),
            ("cache_max_size", self.cache_max_size),
            ("max_generation_attempts", self.max_generation_attempts as usize),
            ("max_concurrent_generations", self.max_concurrent_generations),
        ];
        if let Some((name, _)) = counts.iter().find(|(_, value)| *value == 0) {
            return Err(RagError::ConfigError(format!("{name} must be greater than zero")));
        }
        if self.stream_idle_timeout.is_zero() {
            return Err(RagError::ConfigError(
                "stream_idle_timeout must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(RagError::ConfigError(format!(
                "similarity_threshold ({}) must be within [0, 1]",
                self.similarity_threshold
            )));
        }
        Ok(())
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the number of neighbours requested from the vector index.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the minimum similarity score for relevant passages.
    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.config.similarity_threshold = threshold;
        self
    }

    /// Set the maximum number of relevant passages used as context.
    pub fn max_context(mut self, max_context: usize) -> Self {
        self.config.max_context = max_context;
        self
    }

    /// Set how many raw neighbours the fallback path keeps.
    pub fn fallback_count(mut self, count: usize) -> Self {
        self.config.fallback_count = count;
        self
    }

    /// Set the query cache capacity.
    pub fn cache_max_size(mut self, size: usize) -> Self {
        self.config.cache_max_size = size;
        self
    }

    /// Set the query cache time-to-live.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttl = ttl;
        self
    }

    /// Set the embedding call timeout.
    pub fn embedding_timeout(mut self, timeout: Duration) -> Self {
        self.config.embedding_timeout = timeout;
        self
    }

    /// Set the per-attempt generation timeout.
    pub fn generation_timeout(mut self, timeout: Duration) -> Self {
        self.config.generation_timeout = timeout;
        self
    }

    /// Set the attempt ceiling for rate-limited generation calls.
    pub fn max_generation_attempts(mut self, attempts: u32) -> Self {
        self.config.max_generation_attempts = attempts;
        self
    }

    /// Set the initial retry backoff.
    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.config.retry_base_delay = delay;
        self
    }

    /// Set the concurrency limit for generative model calls.
    pub fn max_concurrent_generations(mut self, limit: usize) -> Self {
        self.config.max_concurrent_generations = limit;
        self
    }

    /// Set the longest wait for the next streamed fragment.
    pub fn stream_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.stream_idle_timeout = timeout;
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] under the conditions listed on
    /// [`RagConfig::validate`].
    pub fn build(self) -> Result<RagConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
