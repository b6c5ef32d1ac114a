use crate::error::LlmError;

/// Converts text into fixed-dimension vectors.
///
/// Implementations must return vectors of exactly [`dimension`](Self::dimension) floats and
/// preserve input order in [`embed_batch`](Self::embed_batch).
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Length of every vector this provider produces.
    fn dimension(&self) -> usize;

    /// Embed a single text.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or the response is invalid.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, LlmError>> + Send;

    /// Embed several texts in one backend call where the backend supports it.
    ///
    /// The default implementation calls [`embed`](Self::embed) sequentially.
    ///
    /// # Errors
    ///
    /// Returns an error if any text fails to embed. No partial result is returned.
    fn embed_batch(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, LlmError>> + Send {
        async move {
            let mut vectors = Vec::with_capacity(texts.len());
            for text in texts {
                vectors.push(self.embed(text).await?);
            }
            Ok(vectors)
        }
    }
}

/// Fail with [`LlmError::CountMismatch`] unless a backend returned one vector per input.
pub(crate) fn expect_count(
    provider: &str,
    expected: usize,
    vectors: Vec<Vec<f32>>,
) -> Result<Vec<Vec<f32>>, LlmError> {
    if vectors.len() == expected {
        Ok(vectors)
    } else {
        Err(LlmError::CountMismatch {
            provider: provider.to_owned(),
            expected,
            actual: vectors.len(),
        })
    }
}
