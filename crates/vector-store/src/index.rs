use crate::embedder::cosine_similarity;
use crate::error::{Result, VectorStoreError};
use std::sync::{Arc, RwLock};

/// One immutable index generation: descriptor ids with their vectors, in
/// insertion order. Insertion order is the tie-breaker for equal scores.
#[derive(Debug, Default)]
pub struct IndexGeneration {
    dimension: Option<usize>,
    entries: Vec<IndexEntry>,
}

#[derive(Debug)]
struct IndexEntry {
    id: String,
    vector: Vec<f32>,
}

impl IndexGeneration {
    fn build(entries: Vec<(String, Vec<f32>)>) -> Result<Self> {
        let mut dimension = None;
        let mut built = Vec::with_capacity(entries.len());
        for (id, vector) in entries {
            match dimension {
                None => dimension = Some(vector.len()),
                Some(expected) if expected != vector.len() => {
                    return Err(VectorStoreError::InvalidDimension {
                        expected,
                        actual: vector.len(),
                    });
                }
                Some(_) => {}
            }
            built.push(IndexEntry { id, vector });
        }
        Ok(Self {
            dimension,
            entries: built,
        })
    }

    /// Top-k most-similar entries, best first. Scores are cosine similarity
    /// clamped to [0,1]; equal scores keep insertion order (stable sort).
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<(String, f32)>> {
        if self.entries.is_empty() {
            return Ok(Vec::new());
        }

        // A dimension mismatch between the query and the stored generation
        // is a configuration error, never a silent fallback.
        let expected = self.dimension.unwrap_or(0);
        if vector.len() != expected {
            return Err(VectorStoreError::InvalidDimension {
                expected,
                actual: vector.len(),
            });
        }

        let mut scores: Vec<(String, f32)> = self
            .entries
            .iter()
            .map(|entry| {
                let score = cosine_similarity(vector, &entry.vector).max(0.0);
                (entry.id.clone(), score)
            })
            .collect();

        scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scores.truncate(k);
        Ok(scores)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }
}

/// Similarity index with rebuild-and-swap semantics.
///
/// Queries read an `Arc` snapshot of the current generation, so a rebuild
/// never blocks or tears an in-flight query: readers that started against
/// the outgoing generation finish against it.
pub struct SimilarityIndex {
    generation: RwLock<Arc<IndexGeneration>>,
}

impl SimilarityIndex {
    pub fn new() -> Self {
        Self {
            generation: RwLock::new(Arc::new(IndexGeneration::default())),
        }
    }

    pub fn snapshot(&self) -> Arc<IndexGeneration> {
        self.generation
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Query the current generation. An empty index yields an empty list.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<(String, f32)>> {
        self.snapshot().query(vector, k)
    }

    /// Build a new generation off to the side and swap it in atomically.
    pub fn rebuild(&self, entries: Vec<(String, Vec<f32>)>) -> Result<()> {
        let next = Arc::new(IndexGeneration::build(entries)?);
        log::info!(
            "Similarity index rebuilt: {} entries (dimension: {:?})",
            next.len(),
            next.dimension()
        );
        let mut guard = self
            .generation
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = next;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

impl Default for SimilarityIndex {
    fn default() -> Self {
        Self::new()
    }
}
