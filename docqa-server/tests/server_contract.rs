use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use docqa_rag::{
    ChatOrchestrator, Corpus, CorpusChunk, EmbedMode, EmbeddingProvider, FlatL2Index,
    FragmentStream, GenerativeModel, IndexHandle, RagConfig, Result,
};
use docqa_server::{app_router, server::AppState};
use serde_json::{Value, json};

struct StubEmbedder;

#[async_trait]
impl EmbeddingProvider for StubEmbedder {
    async fn embed(&self, _text: &str, _mode: EmbedMode) -> Result<Vec<f32>> {
        Ok(vec![1.0, 0.0])
    }

    fn dimensions(&self) -> usize {
        2
    }
}

struct StubModel;

const REPLY: &str = "=== JAWABAN UTAMA ===\nWajib 144 SKS.\n=== KESIMPULAN ===\nRingkas.\n\
                     === SARAN PRAKTIS ===\n1. Cek KRS\n\
                     === SUMBER DOKUMEN ===\nDokumen: wisuda.docx";

#[async_trait]
impl GenerativeModel for StubModel {
    fn name(&self) -> &str {
        "stub"
    }

    async fn complete(&self, _prompt: &str) -> Result<String> {
        Ok(REPLY.to_string())
    }

    async fn stream(&self, _prompt: &str) -> Result<FragmentStream> {
        let fragments: Vec<Result<String>> =
            REPLY.split_inclusive('\n').map(|line| Ok(line.to_string())).collect();
        Ok(Box::pin(futures::stream::iter(fragments)))
    }
}

fn corpus() -> Corpus {
    let mut index = FlatL2Index::new(2);
    index.add(vec![1.0, 0.0]).expect("add vector");
    let chunks = vec![CorpusChunk { text: "Pasal 12".into(), source_id: "wisuda.docx".into() }];
    Corpus::new(Arc::new(index), chunks).expect("corpus")
}

async fn spawn_server(index: IndexHandle) -> (String, tokio::task::JoinHandle<()>) {
    let orchestrator = ChatOrchestrator::builder()
        .config(RagConfig::default())
        .embedding_provider(Arc::new(StubEmbedder))
        .model(Arc::new(StubModel))
        .index(Arc::new(index))
        .build()
        .expect("orchestrator");
    let app = app_router(AppState { orchestrator: Arc::new(orchestrator) });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener addr");

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server run");
    });

    (format!("http://{}", addr), handle)
}

#[tokio::test]
async fn health_reports_loaded_index() {
    let (base, handle) = spawn_server(IndexHandle::with_corpus(corpus())).await;

    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .expect("health response")
        .json()
        .await
        .expect("health json");

    assert_eq!(body["status"], "ok");
    assert_eq!(body["index_loaded"], true);
    assert_eq!(body["chunk_count"], 1);

    handle.abort();
}

#[tokio::test]
async fn greeting_returns_canned_answer_without_sources() {
    let (base, handle) = spawn_server(IndexHandle::with_corpus(corpus())).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/chat", base))
        .json(&json!({ "query": "halo" }))
        .send()
        .await
        .expect("chat response");
    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("chat json");
    assert_eq!(body["is_greeting"], true);
    assert_eq!(body["sources"], json!([]));
    assert_eq!(body["sources_count"], 0);
    assert!(body["response"].as_str().unwrap_or_default().starts_with("Halo!"));
    assert!(body["session_id"].as_str().is_some());

    handle.abort();
}

#[tokio::test]
async fn chat_answer_is_recorded_in_session_history() {
    let (base, handle) = spawn_server(IndexHandle::with_corpus(corpus())).await;
    let client = reqwest::Client::new();

    let body: Value = client
        .post(format!("{}/chat", base))
        .json(&json!({ "query": "Apa syarat wisuda?" }))
        .send()
        .await
        .expect("chat response")
        .json()
        .await
        .expect("chat json");
    assert_eq!(body["response"], "Wajib 144 SKS.");
    assert_eq!(body["summary"], "Ringkas.");
    assert_eq!(body["sources"], json!(["wisuda.docx"]));
    assert_eq!(body["sources_count"], 1);
    let session_id = body["session_id"].as_str().expect("session_id field");

    let history: Value = client
        .get(format!("{}/sessions/{}/messages", base, session_id))
        .send()
        .await
        .expect("history response")
        .json()
        .await
        .expect("history json");
    let messages = history.as_array().expect("message list");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[1]["role"], "assistant");
    assert_eq!(messages[1]["content"], "Wajib 144 SKS.");

    let stats: Value = client
        .get(format!("{}/cache/stats", base))
        .send()
        .await
        .expect("stats response")
        .json()
        .await
        .expect("stats json");
    assert_eq!(stats["size"], 1);
    assert_eq!(stats["max_size"], 100);

    let cleared =
        client.post(format!("{}/cache/clear", base)).send().await.expect("clear response");
    assert!(cleared.status().is_success());
    let stats: Value = client
        .get(format!("{}/cache/stats", base))
        .send()
        .await
        .expect("stats response")
        .json()
        .await
        .expect("stats json");
    assert_eq!(stats["size"], 0);

    handle.abort();
}

#[tokio::test]
async fn missing_index_is_service_unavailable() {
    let (base, handle) = spawn_server(IndexHandle::empty()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/chat", base))
        .json(&json!({ "query": "Apa syarat wisuda?" }))
        .send()
        .await
        .expect("chat response");

    assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json().await.expect("error json");
    assert!(body["error"].as_str().unwrap_or_default().contains("not ready"));

    handle.abort();
}

#[tokio::test]
async fn blank_messages_and_unknown_sessions_are_rejected() {
    let (base, handle) = spawn_server(IndexHandle::with_corpus(corpus())).await;
    let client = reqwest::Client::new();

    let blank = client
        .post(format!("{}/chat", base))
        .json(&json!({ "query": "   " }))
        .send()
        .await
        .expect("chat response");
    assert_eq!(blank.status(), reqwest::StatusCode::BAD_REQUEST);

    let unknown = client
        .post(format!("{}/chat", base))
        .json(&json!({ "query": "Apa syarat wisuda?", "session_id": "missing" }))
        .send()
        .await
        .expect("chat response");
    assert_eq!(unknown.status(), reqwest::StatusCode::NOT_FOUND);

    let history = client
        .get(format!("{}/sessions/missing/messages", base))
        .send()
        .await
        .expect("history response");
    assert_eq!(history.status(), reqwest::StatusCode::NOT_FOUND);

    handle.abort();
}

#[tokio::test]
async fn stream_endpoint_emits_session_tokens_and_done() {
    let (base, handle) = spawn_server(IndexHandle::with_corpus(corpus())).await;
    let client = reqwest::Client::new();

    let response = tokio::time::timeout(
        Duration::from_secs(3),
        client
            .post(format!("{}/chat/stream", base))
            .json(&json!({ "query": "Apa syarat wisuda?" }))
            .send(),
    )
    .await
    .expect("stream request timeout")
    .expect("stream response");

    assert!(response.status().is_success());
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_lowercase();
    assert!(
        content_type.contains("text/event-stream"),
        "unexpected content type: {content_type}"
    );

    let body = tokio::time::timeout(Duration::from_secs(3), response.text())
        .await
        .expect("stream body timeout")
        .expect("stream body");
    let session = body.find("event: session").expect("session event");
    let token = body.find("event: token").expect("token event");
    let done = body.find("event: done").expect("done event");
    assert!(session < token && token < done);
    assert!(body.contains("Wajib 144 SKS."));

    handle.abort();
}

#[tokio::test]
async fn legacy_message_field_is_accepted() {
    let (base, handle) = spawn_server(IndexHandle::with_corpus(corpus())).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/chat", base))
        .json(&json!({ "message": "Apa syarat wisuda?" }))
        .send()
        .await
        .expect("chat response");
    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("chat json");
    assert_eq!(body["response"], "Wajib 144 SKS.");
    assert_eq!(body["from_cache"], false);

    handle.abort();
}
