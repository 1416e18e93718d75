use std::{convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use async_stream::stream;
use axum::{
    Json, Router,
    extract::{Path, State},
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use docqa_rag::{ChatOrchestrator, MessageRecord, ReplyEvent, ReplyOrigin, StructuredAnswer};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_stream::StreamExt;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ChatOrchestrator>,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 8000 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    #[serde(alias = "message")]
    pub query: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<String>,
    pub sources: Vec<String>,
    pub sources_count: usize,
    pub from_cache: bool,
    pub is_greeting: bool,
}

impl ChatResponse {
    fn new(session_id: String, answer: StructuredAnswer, origin: ReplyOrigin) -> Self {
        Self {
            session_id,
            response: answer.main_text,
            summary: answer.summary,
            suggestions: answer.suggestions,
            sources_count: answer.sources.len(),
            sources: answer.sources,
            from_cache: origin == ReplyOrigin::Cache,
            is_greeting: origin == ReplyOrigin::Greeting,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/chat", post(chat))
        .route("/chat/stream", post(chat_stream))
        .route("/sessions/{session_id}/messages", get(session_messages))
        .route("/cache/stats", get(cache_stats))
        .route("/cache/clear", post(clear_cache))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

pub async fn run_server(
    config: ServerConfig,
    orchestrator: Arc<ChatOrchestrator>,
) -> anyhow::Result<()> {
    let app = app_router(AppState { orchestrator });
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| "invalid host/port for docqa server")?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("docqa-server listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

fn validate(request: &ChatRequest) -> Result<(), ApiError> {
    if request.query.trim().is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".to_string()));
    }
    Ok(())
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.orchestrator.health().await;
    let status = if report.index_loaded { "ok" } else { "not_ready" };
    Json(json!({
        "status": status,
        "service": "docqa-server",
        "index_loaded": report.index_loaded,
        "chunk_count": report.chunk_count,
        "cache_size": report.cache_size,
    }))
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    validate(&request)?;
    let reply =
        state.orchestrator.submit_query(&request.query, request.session_id.as_deref()).await?;
    Ok(Json(ChatResponse::new(reply.conversation_id, reply.answer, reply.origin)))
}

async fn chat_stream(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>, ApiError> {
    validate(&request)?;
    let reply = state
        .orchestrator
        .submit_query_streaming(&request.query, request.session_id.as_deref())
        .await?;

    let session = json!({ "session_id": reply.conversation_id, "origin": reply.origin });
    let mut events = reply.into_stream();

    let stream = stream! {
        yield Ok(Event::default().event("session").data(session.to_string()));
        while let Some(event) = events.next().await {
            match event {
                ReplyEvent::Fragment(text) => {
                    let data = json!({ "text": text }).to_string();
                    yield Ok(Event::default().event("token").data(data));
                }
                ReplyEvent::Completed(answer) => {
                    let done = Event::default()
                        .event("done")
                        .json_data(&answer)
                        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()));
                    yield Ok(done);
                }
            }
        }
    };

    let keep_alive = KeepAlive::new().interval(Duration::from_secs(15)).text("keepalive");
    Ok(Sse::new(stream).keep_alive(keep_alive))
}

async fn session_messages(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<MessageRecord>>, ApiError> {
    Ok(Json(state.orchestrator.messages(&session_id).await?))
}

async fn cache_stats(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.orchestrator.cache_stats();
    Json(json!({
        "size": stats.size,
        "max_size": stats.max_size,
        "ttl_seconds": stats.ttl.as_secs(),
    }))
}

async fn clear_cache(State(state): State<AppState>) -> impl IntoResponse {
    state.orchestrator.clear_cache();
    Json(json!({ "status": "cleared" }))
}
