//! OpenRouter chat-completions model (any OpenAI-compatible endpoint).
//!
//! This module is only available when the `openrouter` feature is enabled.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{StreamExt, future};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::{RagError, Result};
use crate::generation::{FragmentStream, GenerativeModel};

/// The OpenRouter API base.
pub const OPENROUTER_API_BASE: &str = "https://openrouter.ai/api/v1";

/// The model used when none is configured.
pub const DEFAULT_MODEL: &str = "tngtech/deepseek-r1t2-chimera:free";

const PROVIDER: &str = "OpenRouter";

/// A [`GenerativeModel`] speaking the OpenAI chat-completions protocol.
///
/// HTTP 429 responses, and error payloads carrying code 429, are reported as
/// [`RagError::RateLimited`].
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::openrouter::OpenRouterModel;
///
/// let model = OpenRouterModel::new("sk-or-...")?.with_model("openai/gpt-4o-mini");
/// let text = model.complete("Halo").await?;
/// ```
pub struct OpenRouterModel {
    client: reqwest::Client,
    api_key: String,
    model: String,
    api_base: String,
}

impl OpenRouterModel {
    /// Create a model client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(RagError::ConfigError("OPENROUTER_API_KEY must not be empty".into()));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model: DEFAULT_MODEL.into(),
            api_base: OPENROUTER_API_BASE.into(),
        })
    }

    /// Create a model client using the `OPENROUTER_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENROUTER_API_KEY").map_err(|_| {
            RagError::ConfigError("OPENROUTER_API_KEY environment variable not set".into())
        })?;
        Self::new(api_key)
    }

    /// Set the model identifier.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Use another OpenAI-compatible API base.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    async fn send(&self, prompt: &str, stream: bool) -> Result<reqwest::Response> {
        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage { role: "user", content: prompt }],
            stream,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(provider = PROVIDER, error = %e, "request failed");
                generation_error(format!("request failed: {e}"))
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<ErrorResponse>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);
        error!(provider = PROVIDER, %status, "API error");

        if status == StatusCode::TOO_MANY_REQUESTS {
            Err(RagError::RateLimited { provider: PROVIDER.into(), message: detail })
        } else {
            Err(generation_error(format!("API returned {status}: {detail}")))
        }
    }
}

fn generation_error(message: impl Into<String>) -> RagError {
    RagError::GenerationError { provider: PROVIDER.into(), message: message.into() }
}

impl ApiError {
    fn into_rag_error(self) -> RagError {
        let rate_limited = self
            .code
            .as_ref()
            .map(|code| code.as_u64() == Some(429) || code.as_str() == Some("429"))
            .unwrap_or(false);
        if rate_limited {
            RagError::RateLimited { provider: PROVIDER.into(), message: self.message }
        } else {
            generation_error(self.message)
        }
    }
}

// ── Chat-completions request/response types ────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: Option<AssistantMessage>,
}

#[derive(Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Deserialize, Default)]
struct Delta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
    code: Option<serde_json::Value>,
}

/// Decode one SSE `data:` payload into a fragment, if it carries text.
fn decode_chunk(data: &str) -> Option<Result<String>> {
    let chunk: ChatChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => return Some(Err(generation_error(format!("malformed stream chunk: {e}")))),
    };
    if let Some(error) = chunk.error {
        return Some(Err(error.into_rag_error()));
    }
    chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty())
        .map(Ok)
}

// ── GenerativeModel implementation ─────────────────────────────────

#[async_trait]
impl GenerativeModel for OpenRouterModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        debug!(provider = PROVIDER, model = %self.model, prompt_len = prompt.len(), "completion");

        let completion: ChatCompletion = self.send(prompt, false).await?.json().await.map_err(|e| {
            error!(provider = PROVIDER, error = %e, "failed to parse response");
            generation_error(format!("failed to parse response: {e}"))
        })?;

        if let Some(error) = completion.error {
            return Err(error.into_rag_error());
        }

        Ok(completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .unwrap_or_default())
    }

    async fn stream(&self, prompt: &str) -> Result<FragmentStream> {
        debug!(
            provider = PROVIDER,
            model = %self.model,
            prompt_len = prompt.len(),
            "streaming completion"
        );

        let response = self.send(prompt, true).await?;
        let fragments = response
            .bytes_stream()
            .eventsource()
            .take_while(|event| future::ready(!matches!(event, Ok(e) if e.data.trim() == "[DONE]")))
            .filter_map(|event| {
                future::ready(match event {
                    Ok(event) => decode_chunk(&event.data),
                    Err(e) => Some(Err(generation_error(format!("stream error: {e}")))),
                })
            });

        Ok(Box::pin(fragments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_delta_content() {
        let fragment = decode_chunk(r#"{"choices":[{"delta":{"content":"Halo"}}]}"#);
        assert_eq!(fragment.unwrap().unwrap(), "Halo");
    }

    #[test]
    fn skips_role_only_and_empty_deltas() {
        assert!(decode_chunk(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#).is_none());
        assert!(decode_chunk(r#"{"choices":[{"delta":{"content":""}}]}"#).is_none());
    }

    #[test]
    fn in_band_429_is_rate_limited() {
        let fragment = decode_chunk(r#"{"error":{"message":"slow down","code":429}}"#);
        let error = fragment.unwrap().unwrap_err();
        assert!(matches!(error, RagError::RateLimited { .. }));
    }

    #[test]
    fn malformed_chunk_is_an_error_item() {
        let fragment = decode_chunk("not json");
        assert!(matches!(fragment, Some(Err(RagError::GenerationError { .. }))));
    }
}
