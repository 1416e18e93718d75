//! Data types for corpus chunks, ranked passages and structured answers.

use serde::{Deserialize, Serialize};

/// One entry of the corpus chunk table maintained by the ingestion job.
///
/// The position of a chunk in the table is the integer the vector index
/// returns for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorpusChunk {
    /// The text content of the chunk.
    pub text: String,
    /// Identifier of the originating document (its file name).
    pub source_id: String,
}

/// A passage selected for a single query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedChunk {
    /// The passage text.
    pub text: String,
    /// Identifier of the originating document.
    pub source_id: String,
    /// `1 / (1 + distance)`, higher is more relevant.
    pub similarity_score: f32,
}

/// How a [`RankedResult`] was produced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RankProvenance {
    /// Every passage met the similarity threshold.
    Thresholded,
    /// Nothing met the threshold; passages are the nearest raw neighbours.
    Fallback,
}

/// Ordered passages for one query, capped at the configured context size.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedResult {
    /// Passages in descending score order.
    pub chunks: Vec<RetrievedChunk>,
    /// Which ranking path produced `chunks`.
    pub provenance: RankProvenance,
}

impl RankedResult {
    /// Returns `true` when no passage was retrieved at all.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Returns the number of passages.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }
}

/// The four-field answer that is cached, persisted and returned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StructuredAnswer {
    /// The primary answer text.
    pub main_text: String,
    /// Short conclusion, when the model produced one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Practical suggestions, absent when none apply.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<String>,
    /// Cited source documents, in prompt order.
    #[serde(default)]
    pub sources: Vec<String>,
}

impl StructuredAnswer {
    /// An answer consisting only of plain text.
    pub fn plain(text: impl Into<String>) -> Self {
        Self { main_text: text.into(), ..Self::default() }
    }
}
