//! Content-addressed embedding cache.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

use lru::LruCache;

use crate::error::LlmError;
use crate::provider::{EmbeddingProvider, expect_count};

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Wraps an [`EmbeddingProvider`] with a cache keyed by the blake3 hash of the input text.
///
/// Batch calls split their inputs into cache hits and misses. Misses are de-duplicated and
/// sent to the inner provider in sub-batches of at most `batch_size` texts; every vector
/// returned is checked against the provider's dimension before it is cached. The cache holds
/// at most `capacity` vectors and evicts the least recently used one first.
pub struct CachedEmbedder<P> {
    inner: P,
    cache: Mutex<LruCache<blake3::Hash, Vec<f32>>>,
    batch_size: usize,
    enabled: bool,
}

impl<P: std::fmt::Debug> std::fmt::Debug for CachedEmbedder<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedEmbedder")
            .field("inner", &self.inner)
            .field("batch_size", &self.batch_size)
            .field("enabled", &self.enabled)
            .field("cached", &self.cache_len())
            .field("capacity", &self.cache_guard().cap())
            .finish()
    }
}

impl<P> CachedEmbedder<P> {
    #[must_use]
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity(DEFAULT_CAPACITY))),
            batch_size: DEFAULT_BATCH_SIZE,
            enabled: true,
        }
    }

    /// Bound the number of cached vectors. Zero is treated as one.
    #[must_use]
    pub fn with_cache_capacity(mut self, cap: usize) -> Self {
        self.cache
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .resize(capacity(cap));
        self
    }

    /// Bound the number of texts sent to the inner provider per call. Zero is treated as one.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Disable caching; batching and dimension checks still apply.
    #[must_use]
    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn inner(&self) -> &P {
        &self.inner
    }

    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.cache_guard().len()
    }

    pub fn clear_cache(&self) {
        let mut cache = self.cache_guard();
        let dropped = cache.len();
        cache.clear();
        tracing::debug!(dropped, "embedding cache cleared");
    }

    fn cache_guard(&self) -> MutexGuard<'_, LruCache<blake3::Hash, Vec<f32>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, key: &blake3::Hash) -> Option<Vec<f32>> {
        if !self.enabled {
            return None;
        }
        self.cache_guard().get(key).cloned()
    }

    fn store(&self, entries: impl IntoIterator<Item = (blake3::Hash, Vec<f32>)>) {
        if !self.enabled {
            return;
        }
        let mut cache = self.cache_guard();
        for (key, vector) in entries {
            cache.put(key, vector);
        }
    }
}

fn capacity(cap: usize) -> NonZeroUsize {
    NonZeroUsize::new(cap).unwrap_or(NonZeroUsize::MIN)
}

impl<P: EmbeddingProvider> CachedEmbedder<P> {

    fn check_dimension(&self, vector: &[f32]) -> Result<(), LlmError> {
        let expected = self.inner.dimension();
        if vector.len() == expected {
            Ok(())
        } else {
            Err(LlmError::DimensionMismatch {
                expected,
                actual: vector.len(),
            })
        }
    }
}

impl<P: EmbeddingProvider> EmbeddingProvider for CachedEmbedder<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let key = blake3::hash(text.as_bytes());
        if let Some(hit) = self.lookup(&key) {
            return Ok(hit);
        }
        let vector = self.inner.embed(text).await?;
        self.check_dimension(&vector)?;
        self.store([(key, vector.clone())]);
        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let keys: Vec<blake3::Hash> = texts.iter().map(|t| blake3::hash(t.as_bytes())).collect();
        let mut slots: Vec<Option<Vec<f32>>> = keys.iter().map(|k| self.lookup(k)).collect();

        let mut seen = HashSet::new();
        let misses: Vec<usize> = slots
            .iter()
            .enumerate()
            .filter(|(i, slot)| slot.is_none() && seen.insert(keys[*i]))
            .map(|(i, _)| i)
            .collect();

        tracing::debug!(
            provider = self.inner.name(),
            total = texts.len(),
            misses = misses.len(),
            "embedding batch"
        );

        let mut fresh: HashMap<blake3::Hash, Vec<f32>> = HashMap::with_capacity(misses.len());
        for group in misses.chunks(self.batch_size) {
            let batch: Vec<String> = group.iter().map(|&i| texts[i].clone()).collect();
            let vectors = self.inner.embed_batch(&batch).await?;
            let vectors = expect_count(self.inner.name(), batch.len(), vectors)?;
            for vector in &vectors {
                self.check_dimension(vector)?;
            }
            let entries: Vec<(blake3::Hash, Vec<f32>)> =
                group.iter().map(|&i| keys[i]).zip(vectors).collect();
            self.store(entries.iter().cloned());
            fresh.extend(entries);
        }

        for (slot, key) in slots.iter_mut().zip(&keys) {
            if slot.is_none() {
                *slot = fresh.get(key).cloned();
            }
        }

        slots
            .into_iter()
            .map(|slot| slot.ok_or(LlmError::EmptyResponse { provider: "cache" }))
            .collect()
    }
}
