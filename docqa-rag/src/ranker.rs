//! Similarity ranking with a relevance threshold and a nearest-neighbour fallback.

use tracing::{debug, warn};

use crate::config::RagConfig;
use crate::document::{RankProvenance, RankedResult, RetrievedChunk};
use crate::error::Result;
use crate::index::{Corpus, Neighbor};

/// Convert an index distance into a similarity score in `(0, 1]`.
pub fn similarity_from_distance(distance: f32) -> f32 {
    1.0 / (1.0 + distance.max(0.0))
}

/// Turns raw index neighbours into the passages used as prompt context.
///
/// Passages scoring at least `threshold` are kept (best first, at most
/// `max_context`). When none qualify, the first `fallback_count` raw
/// neighbours are used instead, and the result is tagged
/// [`RankProvenance::Fallback`] so callers know no relevance guarantee holds.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityRanker {
    top_k: usize,
    threshold: f32,
    max_context: usize,
    fallback_count: usize,
}

impl SimilarityRanker {
    /// Create a ranker with explicit parameters.
    pub fn new(top_k: usize, threshold: f32, max_context: usize, fallback_count: usize) -> Self {
        Self { top_k, threshold, max_context, fallback_count }
    }

    /// Create a ranker from the pipeline configuration.
    pub fn from_config(config: &RagConfig) -> Self {
        Self::new(
            config.top_k,
            config.similarity_threshold,
            config.max_context,
            config.fallback_count,
        )
    }

    /// Search the corpus and rank the neighbours of `query_vector`.
    pub async fn rank(&self, corpus: &Corpus, query_vector: &[f32]) -> Result<RankedResult> {
        let neighbors = corpus.index().search(query_vector, self.top_k).await?;
        Ok(self.rank_neighbors(corpus, &neighbors))
    }

    /// Rank an already retrieved neighbour list.
    pub fn rank_neighbors(&self, corpus: &Corpus, neighbors: &[Neighbor]) -> RankedResult {
        let candidates: Vec<RetrievedChunk> = neighbors
            .iter()
            .filter_map(|neighbor| {
                let position = usize::try_from(neighbor.index).ok()?;
                let Some(chunk) = corpus.chunk(position) else {
                    warn!(
                        index = neighbor.index,
                        corpus_len = corpus.len(),
                        "neighbour outside chunk table"
                    );
                    return None;
                };
                Some(RetrievedChunk {
                    text: chunk.text.clone(),
                    source_id: chunk.source_id.clone(),
                    similarity_score: similarity_from_distance(neighbor.distance),
                })
            })
            .collect();

        let mut relevant: Vec<RetrievedChunk> = candidates
            .iter()
            .filter(|c| c.similarity_score >= self.threshold)
            .cloned()
            .collect();

        if !relevant.is_empty() {
            relevant.sort_by(|a, b| {
                b.similarity_score
                    .partial_cmp(&a.similarity_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            relevant.truncate(self.max_context);
            debug!(
                kept = relevant.len(),
                candidates = candidates.len(),
                threshold = self.threshold,
                "ranked passages above threshold"
            );
            return RankedResult { chunks: relevant, provenance: RankProvenance::Thresholded };
        }

        let fallback: Vec<RetrievedChunk> =
            candidates.into_iter().take(self.fallback_count).collect();
        if !fallback.is_empty() {
            warn!(
                kept = fallback.len(),
                threshold = self.threshold,
                "no passage met the similarity threshold, using nearest neighbours"
            );
        }
        RankedResult { chunks: fallback, provenance: RankProvenance::Fallback }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_is_bounded_and_decreasing() {
        assert_eq!(similarity_from_distance(0.0), 1.0);
        assert!(similarity_from_distance(0.5) > similarity_from_distance(2.0));
        assert!(similarity_from_distance(1e9) > 0.0);
    }
}
