//! Deterministic embedder for tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::LlmError;
use crate::provider::EmbeddingProvider;

/// Bag-of-words hashing embedder.
///
/// Every token (alphanumerics plus `.` and `_`, lower-cased) adds one to the dimension its
/// blake3 hash selects, so texts that share words score a high cosine similarity.
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    dimension: usize,
    texts_embedded: Arc<AtomicUsize>,
    batch_calls: Arc<AtomicUsize>,
    fail: Arc<AtomicBool>,
    /// Milliseconds to sleep before every backend call.
    pub delay_ms: u64,
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

impl MockEmbedder {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            texts_embedded: Arc::new(AtomicUsize::new(0)),
            batch_calls: Arc::new(AtomicUsize::new(0)),
            fail: Arc::new(AtomicBool::new(false)),
            delay_ms: 0,
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        let mock = Self::default();
        mock.set_failing(true);
        mock
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    /// Toggle failure mode. Clones share the flag.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Number of texts the backend has embedded so far.
    #[must_use]
    pub fn texts_embedded(&self) -> usize {
        self.texts_embedded.load(Ordering::SeqCst)
    }

    /// Number of `embed`/`embed_batch` calls that reached the backend.
    #[must_use]
    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; self.dimension];
        if self.dimension == 0 {
            return vector;
        }
        let tokens = text
            .split(|c: char| !(c.is_alphanumeric() || c == '.' || c == '_'))
            .filter(|t| !t.is_empty());
        for token in tokens {
            let hash = blake3::hash(token.to_lowercase().as_bytes());
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&hash.as_bytes()[..8]);
            let slot = u64::from_le_bytes(bytes) % self.dimension as u64;
            #[allow(clippy::cast_possible_truncation)]
            {
                vector[slot as usize] += 1.0;
            }
        }
        vector
    }

    async fn backend_call(&self, count: usize) -> Result<(), LlmError> {
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(LlmError::Other("mock embedding error".into()));
        }
        self.texts_embedded.fetch_add(count, Ordering::SeqCst);
        Ok(())
    }
}

impl EmbeddingProvider for MockEmbedder {
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.backend_call(1).await?;
        Ok(self.vector_for(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        self.backend_call(texts.len()).await?;
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_is_deterministic_and_case_insensitive() {
        let mock = MockEmbedder::new(16);
        assert_eq!(mock.vector_for("Hello world"), mock.vector_for("hello WORLD"));
    }

    #[test]
    fn vector_counts_tokens() {
        let mock = MockEmbedder::new(16);
        let v = mock.vector_for("a.py a.py a.py");
        assert!((v.iter().sum::<f32>() - 3.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn counters_track_backend_calls() {
        let mock = MockEmbedder::new(8);
        mock.embed("one").await.unwrap();
        mock.embed_batch(&["two".into(), "three".into()]).await.unwrap();
        assert_eq!(mock.batch_calls(), 2);
        assert_eq!(mock.texts_embedded(), 3);
    }

    #[tokio::test]
    async fn failing_mock_errors_and_clones_share_flag() {
        let mock = MockEmbedder::new(8);
        let clone = mock.clone();
        mock.set_failing(true);
        assert!(clone.embed("x").await.is_err());
        assert_eq!(clone.texts_embedded(), 0);
    }
}
