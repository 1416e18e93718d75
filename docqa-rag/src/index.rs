//! Vector index abstraction, the exact L2 index, and the swappable corpus handle.
//!
//! The offline ingestion job builds a [`Corpus`]: a vector index plus the
//! parallel chunk table that maps each index position back to its text and
//! source document. Serving code only ever reads a corpus through an
//! [`IndexHandle`], which hands out `Arc` snapshots so a rebuild can replace
//! the whole corpus while queries are in flight.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::document::CorpusChunk;
use crate::error::{RagError, Result};

/// One raw search hit.
///
/// `index` is signed because index backends pad short result lists with `-1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Distance to the query vector (lower is closer).
    pub distance: f32,
    /// Position in the chunk table.
    pub index: i64,
}

/// A read-only nearest-neighbour index over chunk embeddings.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Dimensionality of the stored vectors.
    fn dimensions(&self) -> usize;

    /// Number of stored vectors.
    fn len(&self) -> usize;

    /// Returns `true` when the index holds no vectors.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return up to `k` neighbours ordered by ascending distance.
    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<Neighbor>>;
}

/// An exact, brute-force index using squared Euclidean distance.
///
/// Suitable for corpora of a few hundred thousand chunks; search is a linear
/// scan.
#[derive(Debug, Clone, Default)]
pub struct FlatL2Index {
    dimensions: usize,
    vectors: Vec<Vec<f32>>,
}

impl FlatL2Index {
    /// Create an empty index for vectors of the given dimensionality.
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions, vectors: Vec::new() }
    }

    /// Append a vector; its position becomes its chunk index.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexError`] if the vector has the wrong length.
    pub fn add(&mut self, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(RagError::IndexError(format!(
                "vector has {} dimensions, index expects {}",
                vector.len(),
                self.dimensions
            )));
        }
        self.vectors.push(vector);
        Ok(())
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[async_trait]
impl VectorIndex for FlatL2Index {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }

    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        let mut scored: Vec<Neighbor> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| Neighbor { distance: squared_l2(v, vector), index: i as i64 })
            .collect();

        scored.sort_by(|a, b| {
            a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        Ok(scored)
    }
}

/// A vector index together with its parallel chunk table.
pub struct Corpus {
    index: Arc<dyn VectorIndex>,
    chunks: Vec<CorpusChunk>,
}

impl std::fmt::Debug for Corpus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Corpus")
            .field("dimensions", &self.index.dimensions())
            .field("chunks", &self.chunks.len())
            .finish()
    }
}

impl Corpus {
    /// Pair an index with its chunk table.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexError`] if the index and the table disagree
    /// on the number of entries.
    pub fn new(index: Arc<dyn VectorIndex>, chunks: Vec<CorpusChunk>) -> Result<Self> {
        if index.len() != chunks.len() {
            return Err(RagError::IndexError(format!(
                "index holds {} vectors but the chunk table has {} entries",
                index.len(),
                chunks.len()
            )));
        }
        Ok(Self { index, chunks })
    }

    /// Build a corpus from a snapshot produced by the ingestion job.
    pub fn from_snapshot(snapshot: CorpusSnapshot) -> Result<Self> {
        let mut index = FlatL2Index::new(snapshot.dimensions);
        let mut chunks = Vec::with_capacity(snapshot.entries.len());
        for entry in snapshot.entries {
            index.add(entry.embedding)?;
            chunks.push(CorpusChunk { text: entry.text, source_id: entry.source_id });
        }
        Self::new(Arc::new(index), chunks)
    }

    /// Load a JSON snapshot from disk.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexError`] if the file cannot be read or parsed,
    /// or if an embedding has the wrong dimensionality.
    pub async fn load_snapshot(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            RagError::IndexError(format!("failed to read snapshot '{}': {e}", path.display()))
        })?;
        let snapshot: CorpusSnapshot = serde_json::from_slice(&bytes).map_err(|e| {
            RagError::IndexError(format!("failed to parse snapshot '{}': {e}", path.display()))
        })?;
        let corpus = Self::from_snapshot(snapshot)?;
        info!(path = %path.display(), chunk_count = corpus.len(), "loaded corpus snapshot");
        Ok(corpus)
    }

    /// The vector index.
    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// Look up a chunk by its index position.
    pub fn chunk(&self, index: usize) -> Option<&CorpusChunk> {
        self.chunks.get(index)
    }

    /// Number of chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Returns `true` when the corpus holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Dimensionality of the indexed vectors.
    pub fn dimensions(&self) -> usize {
        self.index.dimensions()
    }
}

/// On-disk form of a corpus, written by the ingestion job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusSnapshot {
    /// Dimensionality of every embedding.
    pub dimensions: usize,
    /// Chunks in index order.
    pub entries: Vec<SnapshotEntry>,
}

/// One chunk of a [`CorpusSnapshot`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEntry {
    /// Chunk text.
    pub text: String,
    /// Originating document.
    #[serde(alias = "filename")]
    pub source_id: String,
    /// The chunk's document-mode embedding.
    pub embedding: Vec<f32>,
}

/// Shared, atomically replaceable reference to the serving corpus.
///
/// Readers take an `Arc` snapshot and release the lock immediately, so a
/// concurrent [`swap`](IndexHandle::swap) never blocks behind a search and no
/// reader observes a partially rebuilt corpus.
#[derive(Debug, Default)]
pub struct IndexHandle {
    current: RwLock<Option<Arc<Corpus>>>,
}

impl IndexHandle {
    /// A handle with no corpus loaded yet.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A handle serving the given corpus.
    pub fn with_corpus(corpus: Corpus) -> Self {
        Self { current: RwLock::new(Some(Arc::new(corpus))) }
    }

    /// The corpus currently being served, if any.
    pub async fn current(&self) -> Option<Arc<Corpus>> {
        self.current.read().await.clone()
    }

    /// Replace the served corpus, returning the previous one.
    pub async fn swap(&self, corpus: Corpus) -> Option<Arc<Corpus>> {
        let chunk_count = corpus.len();
        let previous = self.current.write().await.replace(Arc::new(corpus));
        info!(chunk_count, "corpus swapped");
        previous
    }
}
