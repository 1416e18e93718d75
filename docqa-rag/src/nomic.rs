//! Nomic embedding provider using the Nomic Atlas text-embedding API.
//!
//! This module is only available when the `nomic` feature is enabled.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::embedding::{EmbedMode, EmbeddingProvider};
use crate::error::{RagError, Result};

/// The default Nomic text-embedding endpoint.
const NOMIC_EMBEDDINGS_URL: &str = "https://api-atlas.nomic.ai/v1/embedding/text";

/// The default embedding model.
pub const DEFAULT_MODEL: &str = "nomic-embed-text-v1.5";

/// The dimensionality the corpus index is built with.
const DEFAULT_DIMENSIONS: usize = 768;

/// An [`EmbeddingProvider`] backed by the Nomic Atlas embedding API.
///
/// # Configuration
///
/// - `model` – defaults to `nomic-embed-text-v1.5`. A vendor-qualified name
///   such as `nomic-ai/nomic-embed-text-v1.5` is accepted; only the last path
///   segment is sent.
/// - `dimensions` – Matryoshka output size, defaults to 768.
/// - `api_key` – from the constructor or the `NOMIC_API_KEY` environment variable.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::nomic::NomicEmbeddingProvider;
///
/// let provider = NomicEmbeddingProvider::new("nk-...")?;
/// let embedding = provider.embed("syarat wisuda", EmbedMode::Query).await?;
/// ```
pub struct NomicEmbeddingProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimensions: usize,
    endpoint: String,
}

impl NomicEmbeddingProvider {
    /// Create a new provider with the given API key.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(RagError::ConfigError("NOMIC_API_KEY must not be empty".into()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model: DEFAULT_MODEL.into(),
            dimensions: DEFAULT_DIMENSIONS,
            endpoint: NOMIC_EMBEDDINGS_URL.into(),
        })
    }

    /// Create a new provider using the `NOMIC_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("NOMIC_API_KEY").map_err(|_| {
            RagError::ConfigError("NOMIC_API_KEY environment variable not set".into())
        })?;
        Self::new(api_key)
    }

    /// Set the model name.
    pub fn with_model(mut self, model: impl AsRef<str>) -> Self {
        let model = model.as_ref();
        self.model = model.rsplit('/').next().unwrap_or(model).to_string();
        self
    }

    /// Set the output dimensions.
    pub fn with_dimensions(mut self, dims: usize) -> Self {
        self.dimensions = dims;
        self
    }

    /// Point the provider at a different endpoint (proxies, tests).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn error(message: impl Into<String>) -> RagError {
        RagError::EmbeddingError { provider: "Nomic".into(), message: message.into() }
    }
}

fn task_type(mode: EmbedMode) -> &'static str {
    match mode {
        EmbedMode::Query => "search_query",
        EmbedMode::Document => "search_document",
    }
}

// ── Nomic API request/response types ───────────────────────────────

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    texts: Vec<&'a str>,
    task_type: &'static str,
    dimensionality: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    detail: serde_json::Value,
}

// ── EmbeddingProvider implementation ───────────────────────────────

#[async_trait]
impl EmbeddingProvider for NomicEmbeddingProvider {
    async fn embed(&self, text: &str, mode: EmbedMode) -> Result<Vec<f32>> {
        debug!(provider = "Nomic", text_len = text.len(), ?mode, "embedding single text");

        let results = self.embed_batch(&[text], mode).await?;
        results.into_iter().next().ok_or_else(|| Self::error("API returned empty response"))
    }

    async fn embed_batch(&self, texts: &[&str], mode: EmbedMode) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            provider = "Nomic",
            batch_size = texts.len(),
            model = %self.model,
            "embedding batch"
        );

        let request_body = EmbeddingRequest {
            model: &self.model,
            texts: texts.to_vec(),
            task_type: task_type(mode),
            dimensionality: self.dimensions,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| {
                error!(provider = "Nomic", error = %e, "request failed");
                Self::error(format!("request failed: {e}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.detail.to_string())
                .unwrap_or(body);

            error!(provider = "Nomic", %status, "API error");
            return Err(Self::error(format!("API returned {status}: {detail}")));
        }

        let embedding_response: EmbeddingResponse = response.json().await.map_err(|e| {
            error!(provider = "Nomic", error = %e, "failed to parse response");
            Self::error(format!("failed to parse response: {e}"))
        })?;

        if embedding_response.embeddings.len() != texts.len() {
            return Err(Self::error(format!(
                "API returned {} embeddings for {} inputs",
                embedding_response.embeddings.len(),
                texts.len()
            )));
        }

        Ok(embedding_response.embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
