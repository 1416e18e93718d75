//! Generative model abstraction and the retrying, concurrency-bounded client.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use crate::config::RagConfig;
use crate::error::{RagError, Result};

/// A lazy, finite, non-restartable sequence of generated text fragments.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// A provider of text completions for a single prompt.
///
/// Implementations report rate limiting as [`RagError::RateLimited`]; every
/// other failure is treated as permanent for the current request.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// The model identifier, for logging.
    fn name(&self) -> &str;

    /// Generate the complete answer text.
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Start generating and return the fragments as they arrive.
    async fn stream(&self, prompt: &str) -> Result<FragmentStream>;
}

/// Retry and timeout limits for buffered generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each further one.
    pub base_delay: Duration,
    /// Bound on a single attempt (and on opening a stream).
    pub timeout: Duration,
}

impl RetryPolicy {
    /// Derive the policy from the pipeline configuration.
    pub fn from_config(config: &RagConfig) -> Self {
        Self {
            max_attempts: config.max_generation_attempts,
            base_delay: config.retry_base_delay,
            timeout: config.generation_timeout,
        }
    }
}

/// Calls a [`GenerativeModel`] with bounded retries and bounded concurrency.
pub struct GenerationClient {
    model: Arc<dyn GenerativeModel>,
    policy: RetryPolicy,
    permits: Arc<Semaphore>,
}

impl GenerationClient {
    /// Wrap a model with the given policy and concurrency limit.
    pub fn new(
        model: Arc<dyn GenerativeModel>,
        policy: RetryPolicy,
        max_concurrent: usize,
    ) -> Self {
        Self { model, policy, permits: Arc::new(Semaphore::new(max_concurrent.max(1))) }
    }

    /// Wrap a model using the limits from the pipeline configuration.
    pub fn from_config(model: Arc<dyn GenerativeModel>, config: &RagConfig) -> Self {
        Self::new(model, RetryPolicy::from_config(config), config.max_concurrent_generations)
    }

    /// The wrapped model's identifier.
    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    fn closed(&self) -> RagError {
        RagError::GenerationError {
            provider: self.model.name().to_string(),
            message: "generation client is shut down".into(),
        }
    }

    /// Generate a complete answer, retrying rate-limited attempts.
    ///
    /// # Errors
    ///
    /// - [`RagError::UpstreamUnavailable`] once every attempt was rate limited.
    /// - The first non rate-limit error (including [`RagError::Timeout`]),
    ///   returned without retrying.
    pub async fn complete_buffered(&self, prompt: &str) -> Result<String> {
        let _permit = self.permits.acquire().await.map_err(|_| self.closed())?;
        let model = self.model.name();
        let mut delay = self.policy.base_delay;

        for attempt in 1..=self.policy.max_attempts {
            debug!(model, attempt, max_attempts = self.policy.max_attempts, "generation attempt");

            let attempt_result =
                tokio::time::timeout(self.policy.timeout, self.model.complete(prompt)).await;
            let outcome = match attempt_result {
                Ok(outcome) => outcome,
                Err(_) => Err(RagError::Timeout {
                    operation: "generation",
                    timeout: self.policy.timeout,
                }),
            };

            match outcome {
                Ok(text) => return Ok(text),
                Err(e) if e.is_rate_limited() => {
                    if attempt == self.policy.max_attempts {
                        warn!(model, attempt, error = %e, "rate limited, giving up");
                        break;
                    }
                    warn!(
                        model,
                        attempt,
                        backoff_ms = delay.as_millis() as u64,
                        "rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                Err(e) => {
                    error!(model, attempt, error = %e, "generation failed");
                    return Err(e);
                }
            }
        }

        Err(RagError::UpstreamUnavailable { attempts: self.policy.max_attempts })
    }

    /// Open a fragment stream. Never retried.
    ///
    /// The concurrency permit is held until the returned stream is dropped.
    ///
    /// # Errors
    ///
    /// Returns the provider's error, or [`RagError::Timeout`] if the stream
    /// could not be opened within the policy timeout.
    pub async fn complete(&self, prompt: &str) -> Result<FragmentStream> {
        let permit = self.permits.clone().acquire_owned().await.map_err(|_| self.closed())?;

        let upstream = tokio::time::timeout(self.policy.timeout, self.model.stream(prompt))
            .await
            .map_err(|_| RagError::Timeout {
                operation: "opening generation stream",
                timeout: self.policy.timeout,
            })??;

        let stream = upstream.map(move |fragment| {
            let _held = &permit;
            fragment
        });
        Ok(Box::pin(stream))
    }
}
