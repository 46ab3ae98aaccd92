//! In-memory exact nearest-neighbour index over passage vectors.
//!
//! Search is brute-force cosine similarity across every stored vector. Expected scale is a few
//! thousand passages, where a linear scan stays well under a millisecond per query.
//!
//! All state sits behind a single `RwLock`: concurrent searches share the read side while
//! inserts and removals take the write side, so a search never observes half of a document.
//! The dimension check runs under the same write guard as the insert it protects.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

/// Errors raised by the vector index.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    /// Vector length differs from the dimension already established by the index.
    #[error("vector dimension mismatch: index holds {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension of the vectors already stored.
        expected: usize,
        /// Dimension of the rejected vector.
        actual: usize,
    },
    /// Zero-length vectors cannot establish or match a dimension.
    #[error("vector must not be empty")]
    EmptyVector,
}

/// Indexed passage of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Unique passage identifier.
    pub chunk_id: String,
    /// Owning document.
    pub document_id: String,
    /// 1-based page the passage came from, when known.
    pub page_number: Option<u32>,
    /// Passage text.
    pub text: String,
}

/// Search hit with its cosine similarity to the query.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    /// The matching passage.
    pub chunk: Arc<Chunk>,
    /// Cosine similarity in `[-1, 1]`.
    pub score: f32,
}

/// Aggregate counters describing index contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct IndexStats {
    /// Number of stored passages.
    pub total_chunks: usize,
    /// Number of distinct documents owning stored passages.
    pub total_documents: usize,
    /// Established vector dimension, if any vector is stored.
    pub dimension: Option<usize>,
}

struct Entry {
    chunk: Arc<Chunk>,
    vector: Vec<f32>,
    norm: f32,
}

#[derive(Default)]
struct IndexState {
    // Insertion order doubles as the tie-breaker for equal scores.
    entries: Vec<Entry>,
    dimension: Option<usize>,
}

/// Shared store of passages and their vectors.
#[derive(Default)]
pub struct VectorIndex {
    state: RwLock<IndexState>,
}

impl VectorIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a single passage.
    pub fn insert(&self, chunk: Chunk, vector: Vec<f32>) -> Result<(), IndexError> {
        self.insert_batch(vec![(chunk, vector)])
    }

    /// Append passages atomically: either every vector matches the dimension and all are
    /// stored, or nothing changes.
    pub fn insert_batch(&self, items: Vec<(Chunk, Vec<f32>)>) -> Result<(), IndexError> {
        if items.is_empty() {
            return Ok(());
        }
        let mut state = self.write();
        let expected = match state.dimension {
            Some(dimension) => dimension,
            None => items[0].1.len(),
        };
        for (_, vector) in &items {
            if vector.is_empty() {
                return Err(IndexError::EmptyVector);
            }
            if vector.len() != expected {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
        }

        state.dimension = Some(expected);
        state.entries.reserve(items.len());
        for (chunk, vector) in items {
            let norm = l2_norm(&vector);
            state.entries.push(Entry {
                chunk: Arc::new(chunk),
                vector,
                norm,
            });
        }
        Ok(())
    }

    /// Delete every passage owned by `document_id`, returning how many were removed.
    pub fn remove_by_document(&self, document_id: &str) -> usize {
        let mut state = self.write();
        let before = state.entries.len();
        state
            .entries
            .retain(|entry| entry.chunk.document_id != document_id);
        if state.entries.is_empty() {
            state.dimension = None;
        }
        before - state.entries.len()
    }

    /// Return up to `top_k` passages scoring at least `min_score`, best first.
    ///
    /// Equal scores keep insertion order. An empty index yields an empty result.
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        self.search_where(query, top_k, min_score, |_| true)
    }

    /// Like [`VectorIndex::search`], restricted to passages of the listed documents.
    pub fn search_documents(
        &self,
        query: &[f32],
        top_k: usize,
        min_score: f32,
        document_ids: &HashSet<String>,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        self.search_where(query, top_k, min_score, |chunk| {
            document_ids.contains(&chunk.document_id)
        })
    }

    fn search_where<F>(
        &self,
        query: &[f32],
        top_k: usize,
        min_score: f32,
        accept: F,
    ) -> Result<Vec<ScoredChunk>, IndexError>
    where
        F: Fn(&Chunk) -> bool,
    {
        let state = self.read();
        let Some(dimension) = state.dimension else {
            return Ok(Vec::new());
        };
        if query.len() != dimension {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                actual: query.len(),
            });
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let query_norm = l2_norm(query);
        let mut scored: Vec<(usize, f32)> = state
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| accept(&entry.chunk))
            .map(|(position, entry)| (position, cosine(query, query_norm, entry)))
            .filter(|(_, score)| *score >= min_score)
            .collect();
        // Stable sort: equal scores stay in insertion order.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(position, score)| ScoredChunk {
                chunk: Arc::clone(&state.entries[position].chunk),
                score,
            })
            .collect())
    }

    /// Number of stored passages.
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    /// Whether the index holds no passages.
    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    /// Established vector dimension, if any.
    pub fn dimension(&self) -> Option<usize> {
        self.read().dimension
    }

    /// Identifiers of the passages owned by `document_id`, in insertion order.
    pub fn chunk_ids_for(&self, document_id: &str) -> Vec<String> {
        self.read()
            .entries
            .iter()
            .filter(|entry| entry.chunk.document_id == document_id)
            .map(|entry| entry.chunk.chunk_id.clone())
            .collect()
    }

    /// Snapshot of index counters.
    pub fn stats(&self) -> IndexStats {
        let state = self.read();
        let documents: HashSet<&str> = state
            .entries
            .iter()
            .map(|entry| entry.chunk.document_id.as_str())
            .collect();
        IndexStats {
            total_chunks: state.entries.len(),
            total_documents: documents.len(),
            dimension: state.dimension,
        }
    }
}

fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|value| value * value).sum::<f32>().sqrt()
}

fn cosine(query: &[f32], query_norm: f32, entry: &Entry) -> f32 {
    let denom = query_norm * entry.norm;
    if denom < f32::EPSILON {
        return 0.0;
    }
    let dot: f32 = query
        .iter()
        .zip(entry.vector.iter())
        .map(|(a, b)| a * b)
        .sum();
    dot / denom
}
