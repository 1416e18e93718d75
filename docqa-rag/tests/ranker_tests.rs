//! Threshold and fallback selection of the similarity ranker.

use std::sync::Arc;

use docqa_rag::document::{CorpusChunk, RankProvenance};
use docqa_rag::index::{Corpus, FlatL2Index, Neighbor};
use docqa_rag::ranker::{SimilarityRanker, similarity_from_distance};

fn corpus(size: usize) -> Corpus {
    let mut index = FlatL2Index::new(2);
    let mut chunks = Vec::new();
    for i in 0..size {
        index.add(vec![i as f32, 0.0]).unwrap();
        chunks.push(CorpusChunk {
            text: format!("pasal {i}"),
            source_id: format!("doc{}.docx", i % 2),
        });
    }
    Corpus::new(Arc::new(index), chunks).unwrap()
}

/// Distance whose similarity score is `score`.
fn distance_for(score: f32) -> f32 {
    1.0 / score - 1.0
}

fn neighbors(scores: &[f32]) -> Vec<Neighbor> {
    scores
        .iter()
        .enumerate()
        .map(|(i, score)| Neighbor { distance: distance_for(*score), index: i as i64 })
        .collect()
}

#[test]
fn keeps_only_passages_above_threshold() {
    let corpus = corpus(3);
    let ranker = SimilarityRanker::new(8, 0.7, 5, 5);

    let result = ranker.rank_neighbors(&corpus, &neighbors(&[0.9, 0.5, 0.3]));

    assert_eq!(result.provenance, RankProvenance::Thresholded);
    assert_eq!(result.len(), 1);
    assert_eq!(result.chunks[0].text, "pasal 0");
    assert!((result.chunks[0].similarity_score - 0.9).abs() < 1e-5);
}

#[test]
fn falls_back_to_unfiltered_neighbours_when_nothing_qualifies() {
    let corpus = corpus(8);
    let ranker = SimilarityRanker::new(8, 0.7, 5, 3);

    let result = ranker.rank_neighbors(&corpus, &neighbors(&[0.6, 0.5, 0.4, 0.3, 0.2]));

    assert_eq!(result.provenance, RankProvenance::Fallback);
    assert_eq!(result.len(), 3);
    let texts: Vec<&str> = result.chunks.iter().map(|c| c.text.as_str()).collect();
    assert_eq!(texts, ["pasal 0", "pasal 1", "pasal 2"]);
    assert!(result.chunks.iter().all(|c| c.similarity_score < 0.7));
}

#[test]
fn thresholded_passages_are_sorted_and_capped() {
    let corpus = corpus(6);
    let ranker = SimilarityRanker::new(8, 0.7, 2, 5);

    let result = ranker.rank_neighbors(&corpus, &neighbors(&[0.75, 0.95, 0.3, 0.85]));

    assert_eq!(result.provenance, RankProvenance::Thresholded);
    let scores: Vec<f32> = result.chunks.iter().map(|c| c.similarity_score).collect();
    assert_eq!(scores.len(), 2);
    assert!(scores[0] >= scores[1]);
    assert!((scores[0] - 0.95).abs() < 1e-5);
}

#[test]
fn drops_neighbours_outside_the_chunk_table() {
    let corpus = corpus(2);
    let ranker = SimilarityRanker::new(8, 0.7, 5, 5);
    let hits = vec![
        Neighbor { distance: 0.0, index: -1 },
        Neighbor { distance: 0.0, index: 7 },
        Neighbor { distance: 0.1, index: 1 },
    ];

    let result = ranker.rank_neighbors(&corpus, &hits);

    assert_eq!(result.len(), 1);
    assert_eq!(result.chunks[0].text, "pasal 1");
}

#[test]
fn no_neighbours_yield_an_empty_result() {
    let ranker = SimilarityRanker::new(8, 0.7, 5, 5);
    let result = ranker.rank_neighbors(&corpus(2), &[]);
    assert!(result.is_empty());
}

#[tokio::test]
async fn rank_searches_the_corpus_index() {
    let corpus = corpus(5);
    let ranker = SimilarityRanker::new(3, 0.5, 5, 5);

    let result = ranker.rank(&corpus, &[1.0, 0.0]).await.unwrap();

    // Distances 0, 1, 1 → scores 1.0, 0.5, 0.5.
    assert_eq!(result.provenance, RankProvenance::Thresholded);
    assert_eq!(result.len(), 3);
    assert_eq!(result.chunks[0].text, "pasal 1");
    assert_eq!(result.chunks[0].similarity_score, similarity_from_distance(0.0));
}
