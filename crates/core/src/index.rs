//! Exact nearest-neighbour index over chunk embeddings.
//!
//! The index is built once from a batch of chunks and never mutated; new
//! documents produce a new index. Distances are squared Euclidean.

use crate::error::{IndexBuildError, RetrievalError};
use crate::models::{Chunk, RetrievedChunk};
use crate::traits::Embedder;
use std::sync::Arc;
use tracing::{debug, info};

pub const DEFAULT_TOP_K: usize = 3;

pub struct IndexBuilder {
    embedder: Arc<dyn Embedder>,
}

impl IndexBuilder {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }

    /// Embeds every chunk once. Any failure rejects the whole build. When the
    /// embedder does not announce its size, the first vector fixes it.
    pub fn build(&self, chunks: Vec<Chunk>) -> Result<VectorIndex, IndexBuildError> {
        let mut expected = self.embedder.dimensions();
        let mut vectors = Vec::with_capacity(chunks.len());

        for chunk in &chunks {
            let vector =
                self.embedder
                    .embed(&chunk.text)
                    .map_err(|source| IndexBuildError::Embedding {
                        document_name: chunk.document_name.clone(),
                        chunk_index: chunk.chunk_index,
                        source,
                    })?;

            let expected = *expected.get_or_insert(vector.len());
            if vector.len() != expected {
                return Err(IndexBuildError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
            vectors.push(vector);
        }

        info!(chunk_count = chunks.len(), dimensions = ?expected, "index built");

        Ok(VectorIndex {
            chunks,
            vectors,
            dimensions: expected,
            embedder: Arc::clone(&self.embedder),
        })
    }
}

pub struct VectorIndex {
    chunks: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
    dimensions: Option<usize>,
    embedder: Arc<dyn Embedder>,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("chunks", &self.chunks.len())
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl VectorIndex {
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }

    /// The `k` chunks nearest to `query`, nearest first. Equal distances keep
    /// the order the chunks were indexed in.
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        if self.chunks.is_empty() {
            return Err(RetrievalError::EmptyIndex);
        }

        let query_vector = self.embedder.embed(query)?;
        if let Some(expected) = self.dimensions {
            if query_vector.len() != expected {
                return Err(RetrievalError::DimensionMismatch {
                    expected,
                    actual: query_vector.len(),
                });
            }
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(position, vector)| (position, squared_distance(&query_vector, vector)))
            .collect();

        scored.sort_by(|left, right| left.1.total_cmp(&right.1).then(left.0.cmp(&right.0)));

        let hits: Vec<RetrievedChunk> = scored
            .into_iter()
            .take(k)
            .map(|(position, distance)| RetrievedChunk {
                chunk: self.chunks[position].clone(),
                distance,
            })
            .collect();

        debug!(k, hit_count = hits.len(), "similarity search");
        Ok(hits)
    }
}

fn squared_distance(left: &[f32], right: &[f32]) -> f32 {
    left.iter()
        .zip(right.iter())
        .map(|(a, b)| (a - b) * (a - b))
        .sum()
}

/// Top-k search with a fixed result count.
#[derive(Debug, Clone, Copy)]
pub struct Retriever {
    pub k: usize,
}

impl Default for Retriever {
    fn default() -> Self {
        Self { k: DEFAULT_TOP_K }
    }
}

impl Retriever {
    pub fn new(k: usize) -> Self {
        Self { k }
    }

    pub fn retrieve(
        &self,
        index: &VectorIndex,
        query: &str,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        index.search(query, self.k)
    }
}
