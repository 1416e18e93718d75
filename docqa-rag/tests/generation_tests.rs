//! Retry, timeout and concurrency behaviour of the generation client.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use docqa_rag::error::{RagError, Result};
use docqa_rag::generation::{FragmentStream, GenerationClient, GenerativeModel, RetryPolicy};
use futures::StreamExt;
use tokio::time::Instant;

type Failure = fn() -> RagError;

/// Fails with the scripted errors, then answers.
struct ScriptedModel {
    failures: Vec<Failure>,
    calls: AtomicUsize,
    delay: Duration,
}

impl ScriptedModel {
    fn new(failures: Vec<Failure>) -> Self {
        Self { failures, calls: AtomicUsize::new(0), delay: Duration::ZERO }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn rate_limited() -> RagError {
    RagError::RateLimited { provider: "mock".into(), message: "429".into() }
}

fn wrapped_rate_limit() -> RagError {
    RagError::GenerationError {
        provider: "mock".into(),
        message: "upstream said: rate limit".into(),
    }
}

fn bad_request() -> RagError {
    RagError::GenerationError { provider: "mock".into(), message: "400 bad request".into() }
}

#[async_trait]
impl GenerativeModel for ScriptedModel {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        match self.failures.get(call) {
            Some(failure) => Err(failure()),
            None => Ok(format!("answer to {prompt}")),
        }
    }

    async fn stream(&self, _prompt: &str) -> Result<FragmentStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let fragments = vec![Ok("a".to_string()), Err(rate_limited()), Ok("never".to_string())];
        Ok(Box::pin(futures::stream::iter(fragments)))
    }
}

fn policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(600),
        timeout: Duration::from_secs(120),
    }
}

#[tokio::test(start_paused = true)]
async fn retries_rate_limits_with_doubling_backoff() {
    let model = Arc::new(ScriptedModel::new(vec![rate_limited as Failure, wrapped_rate_limit]));
    let client = GenerationClient::new(model.clone(), policy(), 4);
    let started = Instant::now();

    let text = client.complete_buffered("q").await.unwrap();

    assert_eq!(text, "answer to q");
    assert_eq!(model.calls(), 3);
    assert_eq!(started.elapsed(), Duration::from_millis(600 + 1200));
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_are_upstream_unavailable() {
    let model = Arc::new(ScriptedModel::new(vec![rate_limited as Failure; 5]));
    let client = GenerationClient::new(model.clone(), policy(), 4);

    let error = client.complete_buffered("q").await.unwrap_err();

    assert!(matches!(error, RagError::UpstreamUnavailable { attempts: 3 }));
    assert_eq!(model.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn other_failures_abort_without_retry() {
    let model = Arc::new(ScriptedModel::new(vec![bad_request as Failure]));
    let client = GenerationClient::new(model.clone(), policy(), 4);

    let error = client.complete_buffered("q").await.unwrap_err();

    assert!(matches!(error, RagError::GenerationError { .. }));
    assert_eq!(model.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn slow_attempts_time_out() {
    let mut model = ScriptedModel::new(Vec::new());
    model.delay = Duration::from_secs(300);
    let client = GenerationClient::new(Arc::new(model), policy(), 4);

    let error = client.complete_buffered("q").await.unwrap_err();

    assert!(matches!(error, RagError::Timeout { .. }));
}

#[tokio::test]
async fn streaming_surfaces_errors_inline_without_retry() {
    let model = Arc::new(ScriptedModel::new(Vec::new()));
    let client = GenerationClient::new(model.clone(), policy(), 4);

    let items: Vec<Result<String>> = client.complete("q").await.unwrap().collect().await;

    assert_eq!(items.len(), 3);
    assert_eq!(items[0].as_ref().unwrap(), "a");
    assert!(items[1].as_ref().unwrap_err().is_rate_limited());
    assert_eq!(model.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn open_streams_hold_a_concurrency_permit() {
    let model = Arc::new(ScriptedModel::new(Vec::new()));
    let client = Arc::new(GenerationClient::new(model.clone(), policy(), 1));

    let held = client.complete("first").await.unwrap();

    let waiting = {
        let client = client.clone();
        tokio::spawn(async move { client.complete_buffered("second").await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!waiting.is_finished());

    drop(held);
    let text = waiting.await.unwrap().unwrap();
    assert_eq!(text, "answer to second");
}
