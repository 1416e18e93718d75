//! Turns a generated fragment stream into a persisted, cached [`StructuredAnswer`].
//!
//! The assembler moves through [`StreamState`] in one direction:
//!
//! ```text
//! Streaming ──► Parsing ──► Persisting ──► Done
//!     │            ▲
//!     └─► Errored ─┘
//! ```
//!
//! Parsing never fails: text without the section markers becomes the main
//! answer verbatim. [`StreamAssembler::finish`] consumes the assembler, so an
//! answer is persisted and cached at most once; every path through
//! [`StreamAssembler::run`] ends in `finish`, so it happens exactly once.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::cache::QueryCache;
use crate::document::StructuredAnswer;
use crate::error::RagError;
use crate::generation::FragmentStream;
use crate::prompt::{
    CONCLUSION_MARKER, MAIN_MARKER, NO_SUGGESTIONS_SENTINEL, SOURCES_MARKER, SUGGESTIONS_MARKER,
};
use crate::store::{MessageRecord, MessageStore};

/// Lifecycle of one assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Accumulating and forwarding fragments.
    Streaming,
    /// The upstream failed mid-transfer; an inline notice closed the buffer.
    Errored,
    /// Extracting the structured fields.
    Parsing,
    /// Writing the message record and the cache entry.
    Persisting,
    /// Terminal.
    Done,
}

/// What the caller of a streaming query receives.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyEvent {
    /// A fragment of generated text, forwarded unchanged.
    Fragment(String),
    /// The persisted answer. Always the last event.
    Completed(StructuredAnswer),
}

/// The notice appended to the buffer when the upstream stream fails.
pub fn stream_error_notice(error: &RagError) -> String {
    format!("\n\n[ERROR] Terjadi kesalahan saat memproses jawaban: {error}")
}

/// Extract the structured fields from a complete model response.
///
/// `sources` are the grouped document identifiers from the prompt; they are
/// attached once the response reaches its sources section.
pub fn parse_answer(text: &str, sources: &[String]) -> StructuredAnswer {
    let mut answer = StructuredAnswer::plain(text);

    if text.contains(MAIN_MARKER) && text.contains(CONCLUSION_MARKER) {
        let after_main = section_after(text, MAIN_MARKER);
        match after_main.split_once(CONCLUSION_MARKER) {
            None => answer.main_text = after_main.trim().to_string(),
            Some((main, rest)) => {
                answer.main_text = main.trim().to_string();
                if let Some((summary, rest)) = rest.split_once(SUGGESTIONS_MARKER) {
                    answer.summary = Some(summary.trim().to_string());
                    if let Some((suggestions, _)) = rest.split_once(SOURCES_MARKER) {
                        let suggestions = suggestions.trim();
                        if !suggestions.is_empty()
                            && !suggestions.to_lowercase().contains(NO_SUGGESTIONS_SENTINEL)
                        {
                            answer.suggestions = Some(suggestions.to_string());
                        }
                        answer.sources = sources.to_vec();
                    }
                }
            }
        }
    }

    if answer.main_text.trim().is_empty() {
        answer.main_text = text.to_string();
    }
    answer
}

/// Text following the first `marker`, up to its next occurrence.
fn section_after<'a>(text: &'a str, marker: &str) -> &'a str {
    let after = text.split_once(marker).map_or(text, |(_, after)| after);
    after.split_once(marker).map_or(after, |(section, _)| section)
}

/// Who asked, where to persist, and what to cite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerContext {
    /// The original query text; the cache key is derived from it.
    pub query: String,
    /// Conversation receiving the assistant message.
    pub conversation_id: String,
    /// Grouped source documents of the prompt context.
    pub sources: Vec<String>,
}

/// Longest wait for the next fragment before the upstream counts as stalled.
pub const DEFAULT_STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Accumulates one response and drives its persistence.
pub struct StreamAssembler {
    context: AnswerContext,
    store: Arc<dyn MessageStore>,
    cache: Arc<QueryCache>,
    buffer: String,
    state: StreamState,
    idle_timeout: Duration,
}

impl StreamAssembler {
    /// Create an assembler in the [`StreamState::Streaming`] state.
    pub fn new(
        context: AnswerContext,
        store: Arc<dyn MessageStore>,
        cache: Arc<QueryCache>,
    ) -> Self {
        Self {
            context,
            store,
            cache,
            buffer: String::new(),
            state: StreamState::Streaming,
            idle_timeout: DEFAULT_STREAM_IDLE_TIMEOUT,
        }
    }

    /// Set how long [`run`](Self::run) waits for each fragment.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Return the current lifecycle state.
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// The text accumulated so far.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Append a fragment. Ignored once the stream has errored.
    pub fn push_fragment(&mut self, fragment: &str) {
        if self.state == StreamState::Streaming {
            self.buffer.push_str(fragment);
        }
    }

    /// Close the buffer with an inline error notice and return the notice.
    pub fn fail(&mut self, error: &RagError) -> String {
        let notice = stream_error_notice(error);
        self.buffer.push_str(&notice);
        self.state = StreamState::Errored;
        notice
    }

    /// Consume `fragments`, forwarding each to `events`, then finish.
    ///
    /// A dropped receiver stops forwarding only: the upstream is still read
    /// to its end and the answer is still persisted and cached. An upstream
    /// silent for longer than the idle timeout is treated as a failed stream.
    pub async fn run(
        mut self,
        mut fragments: FragmentStream,
        events: mpsc::Sender<ReplyEvent>,
    ) -> StructuredAnswer {
        let mut forwarding = true;

        loop {
            let item = match tokio::time::timeout(self.idle_timeout, fragments.next()).await {
                Ok(Some(item)) => item,
                Ok(None) => break,
                Err(_) => Err(RagError::Timeout {
                    operation: "generation stream",
                    timeout: self.idle_timeout,
                }),
            };
            let fragment = match item {
                Ok(fragment) => {
                    self.push_fragment(&fragment);
                    fragment
                }
                Err(e) => {
                    warn!(
                        conversation_id = %self.context.conversation_id,
                        error = %e,
                        "generation stream failed"
                    );
                    self.fail(&e)
                }
            };

            if forwarding && events.send(ReplyEvent::Fragment(fragment)).await.is_err() {
                info!(
                    conversation_id = %self.context.conversation_id,
                    "client disconnected, finishing in background"
                );
                forwarding = false;
            }
            if self.state == StreamState::Errored {
                break;
            }
        }
        drop(fragments);

        let answer = self.finish().await;
        if forwarding {
            let _ = events.send(ReplyEvent::Completed(answer.clone())).await;
        }
        answer
    }

    /// Parse the buffer, persist one assistant message and cache the answer.
    pub async fn finish(mut self) -> StructuredAnswer {
        let errored = self.state == StreamState::Errored;

        self.state = StreamState::Parsing;
        let answer = parse_answer(&self.buffer, &self.context.sources);
        debug!(
            structured = answer.summary.is_some(),
            errored,
            len = self.buffer.len(),
            "parsed generated answer"
        );

        self.state = StreamState::Persisting;
        let record = MessageRecord::assistant(&answer);
        if let Err(e) = self.store.append(&self.context.conversation_id, record).await {
            error!(
                conversation_id = %self.context.conversation_id,
                error = %e,
                "failed to persist answer"
            );
        }
        self.cache.set(&self.context.query, answer.clone());

        self.state = StreamState::Done;
        info!(
            conversation_id = %self.context.conversation_id,
            sources = answer.sources.len(),
            errored,
            "answer persisted"
        );
        answer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources() -> Vec<String> {
        vec!["akademik.docx".to_string()]
    }

    fn structured(suggestions: &str) -> String {
        format!(
            "{MAIN_MARKER}\nJawaban.\n{CONCLUSION_MARKER}\nRingkas.\n\
             {SUGGESTIONS_MARKER}\n{suggestions}\n{SOURCES_MARKER}\nDokumen: prosa model"
        )
    }

    #[test]
    fn extracts_all_sections() {
        let answer = parse_answer(&structured("1. Rajin kuliah"), &sources());
        assert_eq!(answer.main_text, "Jawaban.");
        assert_eq!(answer.summary.as_deref(), Some("Ringkas."));
        assert_eq!(answer.suggestions.as_deref(), Some("1. Rajin kuliah"));
        assert_eq!(answer.sources, sources());
    }

    #[test]
    fn sentinel_suppresses_suggestions() {
        let answer =
            parse_answer(&structured("Tidak ada saran khusus untuk pertanyaan ini."), &sources());
        assert_eq!(answer.suggestions, None);
        assert_eq!(answer.summary.as_deref(), Some("Ringkas."));
    }

    #[test]
    fn unmarked_text_is_kept_verbatim() {
        let text = "  jawaban tanpa format \n";
        let answer = parse_answer(text, &sources());
        assert_eq!(answer, StructuredAnswer::plain(text));
    }

    #[test]
    fn sources_need_the_sources_section() {
        let text = format!("{MAIN_MARKER}\nJawaban.\n{CONCLUSION_MARKER}\nRingkas.");
        let answer = parse_answer(&text, &sources());
        assert_eq!(answer.main_text, "Jawaban.");
        assert_eq!(answer.summary, None);
        assert!(answer.sources.is_empty());
    }

    #[test]
    fn empty_main_section_falls_back_to_full_text() {
        let text = format!("{MAIN_MARKER}\n\n{CONCLUSION_MARKER}\nRingkas.");
        assert_eq!(parse_answer(&text, &sources()).main_text, text);
    }
}
