//! `docqa-server` exposes the docqa question-answering pipeline over HTTP.
//! Answers are returned as JSON or streamed as server-sent events.

pub mod error;
pub mod server;

pub use error::ApiError;
pub use server::{AppState, ServerConfig, app_router, run_server};
