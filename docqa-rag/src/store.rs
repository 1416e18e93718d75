//! Append-only conversation log.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::document::StructuredAnswer;
use crate::error::{RagError, Result};

/// Title given to a conversation whose first message is blank.
pub const DEFAULT_CONVERSATION_TITLE: &str = "New Chat";

const MAX_TITLE_CHARS: usize = 50;

/// Who wrote a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry of a conversation log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageRecord {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl MessageRecord {
    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            summary: None,
            suggestions: None,
            sources: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// An assistant message carrying every field of `answer`.
    pub fn assistant(answer: &StructuredAnswer) -> Self {
        Self {
            role: Role::Assistant,
            content: answer.main_text.clone(),
            summary: answer.summary.clone(),
            suggestions: answer.suggestions.clone(),
            sources: answer.sources.clone(),
            timestamp: Utc::now(),
        }
    }

    /// The structured answer this record was persisted from.
    pub fn to_answer(&self) -> StructuredAnswer {
        StructuredAnswer {
            main_text: self.content.clone(),
            summary: self.summary.clone(),
            suggestions: self.suggestions.clone(),
            sources: self.sources.clone(),
        }
    }
}

/// Derive a conversation title from its first message.
pub fn conversation_title(first_message: &str) -> String {
    let trimmed = first_message.trim();
    if trimmed.is_empty() {
        return DEFAULT_CONVERSATION_TITLE.to_string();
    }
    if trimmed.chars().count() <= MAX_TITLE_CHARS {
        return trimmed.to_string();
    }
    let head: String = trimmed.chars().take(MAX_TITLE_CHARS - 3).collect();
    format!("{head}...")
}

/// Persistence for conversations and their messages.
///
/// Each `append` adds exactly one record; records are never rewritten.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Open a new conversation and return its id.
    async fn create_conversation(&self, title: &str) -> Result<String>;

    /// Whether a conversation with this id exists.
    async fn conversation_exists(&self, conversation_id: &str) -> Result<bool>;

    /// Append one record to a conversation.
    async fn append(&self, conversation_id: &str, record: MessageRecord) -> Result<()>;

    /// All records of a conversation, oldest first.
    async fn messages(&self, conversation_id: &str) -> Result<Vec<MessageRecord>>;
}

#[derive(Debug)]
struct Conversation {
    title: String,
    messages: Vec<MessageRecord>,
}

/// Process-local [`MessageStore`].
#[derive(Debug, Default, Clone)]
pub struct InMemoryMessageStore {
    conversations: Arc<RwLock<HashMap<String, Conversation>>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The title of a conversation, if it exists.
    pub async fn title(&self, conversation_id: &str) -> Option<String> {
        self.conversations.read().await.get(conversation_id).map(|c| c.title.clone())
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn create_conversation(&self, title: &str) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let conversation = Conversation { title: title.to_string(), messages: Vec::new() };
        self.conversations.write().await.insert(id.clone(), conversation);
        Ok(id)
    }

    async fn conversation_exists(&self, conversation_id: &str) -> Result<bool> {
        Ok(self.conversations.read().await.contains_key(conversation_id))
    }

    async fn append(&self, conversation_id: &str, record: MessageRecord) -> Result<()> {
        let mut conversations = self.conversations.write().await;
        let conversation = conversations
            .get_mut(conversation_id)
            .ok_or_else(|| RagError::ConversationNotFound(conversation_id.to_string()))?;
        conversation.messages.push(record);
        Ok(())
    }

    async fn messages(&self, conversation_id: &str) -> Result<Vec<MessageRecord>> {
        self.conversations
            .read()
            .await
            .get(conversation_id)
            .map(|c| c.messages.clone())
            .ok_or_else(|| RagError::ConversationNotFound(conversation_id.to_string()))
    }
}
