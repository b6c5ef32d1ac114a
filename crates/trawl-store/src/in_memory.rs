use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::vector_store::{
    BoxFuture, MetadataFilter, SearchHit, VectorIndex, VectorRecord, VectorStoreError,
};

#[derive(Default)]
struct Records {
    /// Insertion order; search ties keep this order.
    entries: Vec<VectorRecord>,
    positions: HashMap<String, usize>,
    dimension: Option<usize>,
}

impl Records {
    fn reindex(&mut self) {
        self.positions = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.clone(), i))
            .collect();
    }

    fn retain(&mut self, mut keep: impl FnMut(&VectorRecord) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|r| keep(r));
        let removed = before - self.entries.len();
        if removed > 0 {
            self.reindex();
        }
        removed
    }
}

/// Exact brute-force index: linear scan with cosine similarity.
///
/// The first inserted vector fixes the dimension until [`clear`](VectorIndex::clear).
pub struct InMemoryVectorIndex {
    records: RwLock<Records>,
}

impl InMemoryVectorIndex {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Records::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Records>, VectorStoreError> {
        self.records
            .read()
            .map_err(|e| VectorStoreError::Collection(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Records>, VectorStoreError> {
        self.records
            .write()
            .map_err(|e| VectorStoreError::Collection(e.to_string()))
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryVectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryVectorIndex")
            .finish_non_exhaustive()
    }
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// NaN scores rank below every real score.
fn rank_key(score: f32) -> f32 {
    if score.is_nan() { f32::NEG_INFINITY } else { score }
}

fn check_dimension(expected: Option<usize>, actual: usize) -> Result<(), VectorStoreError> {
    match expected {
        Some(expected) if expected != actual => {
            Err(VectorStoreError::DimensionMismatch { expected, actual })
        }
        _ => Ok(()),
    }
}

impl VectorIndex for InMemoryVectorIndex {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn add_batch(&self, records: Vec<VectorRecord>) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        Box::pin(async move {
            let mut store = self.write()?;

            let mut dimension = store.dimension;
            for record in &records {
                check_dimension(dimension, record.vector.len())?;
                dimension.get_or_insert(record.vector.len());
            }
            store.dimension = dimension;

            for record in records {
                if let Some(&pos) = store.positions.get(&record.id) {
                    store.entries[pos] = record;
                } else {
                    let pos = store.entries.len();
                    store.positions.insert(record.id.clone(), pos);
                    store.entries.push(record);
                }
            }
            Ok(())
        })
    }

    fn search(
        &self,
        vector: Vec<f32>,
        top_k: usize,
        filter: Option<MetadataFilter>,
    ) -> BoxFuture<'_, Result<Vec<SearchHit>, VectorStoreError>> {
        Box::pin(async move {
            let store = self.read()?;
            check_dimension(store.dimension, vector.len())?;

            let filter = filter.unwrap_or_default();
            let mut hits: Vec<SearchHit> = store
                .entries
                .iter()
                .filter(|r| filter.matches(&r.metadata))
                .map(|r| SearchHit {
                    chunk_id: r.id.clone(),
                    content: r.text.clone(),
                    score: cosine_similarity(&vector, &r.vector),
                    metadata: r.metadata.clone(),
                })
                .collect();

            // stable: equal scores keep insertion order
            hits.sort_by(|a, b| rank_key(b.score).total_cmp(&rank_key(a.score)));
            hits.truncate(top_k);
            Ok(hits)
        })
    }

    fn delete(&self, ids: Vec<String>) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        Box::pin(async move {
            if ids.is_empty() {
                return Ok(());
            }
            let ids: HashSet<String> = ids.into_iter().collect();
            self.write()?.retain(|r| !ids.contains(&r.id));
            Ok(())
        })
    }

    fn delete_where(
        &self,
        filter: MetadataFilter,
    ) -> BoxFuture<'_, Result<usize, VectorStoreError>> {
        Box::pin(async move { Ok(self.write()?.retain(|r| !filter.matches(&r.metadata))) })
    }

    fn list_ids(
        &self,
        filter: Option<MetadataFilter>,
    ) -> BoxFuture<'_, Result<Vec<String>, VectorStoreError>> {
        Box::pin(async move {
            let filter = filter.unwrap_or_default();
            Ok(self
                .read()?
                .entries
                .iter()
                .filter(|r| filter.matches(&r.metadata))
                .map(|r| r.id.clone())
                .collect())
        })
    }

    fn count(&self) -> BoxFuture<'_, Result<usize, VectorStoreError>> {
        Box::pin(async move { Ok(self.read()?.entries.len()) })
    }

    fn clear(&self) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        Box::pin(async move {
            *self.write()? = Records::default();
            Ok(())
        })
    }
}
