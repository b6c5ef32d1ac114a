use ollama_rs::Ollama;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};

use crate::error::LlmError;
use crate::provider::{EmbeddingProvider, expect_count};

const DEFAULT_PORT: u16 = 11434;

#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    client: Ollama,
    model: String,
    dimension: usize,
}

impl OllamaEmbedder {
    #[must_use]
    pub fn new(base_url: &str, model: String, dimension: usize) -> Self {
        let (host, port) = split_base_url(base_url);
        Self {
            client: Ollama::new(host, port),
            model,
            dimension,
        }
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    async fn request(&self, input: EmbeddingsInput) -> Result<Vec<Vec<f32>>, LlmError> {
        let request = GenerateEmbeddingsRequest::new(self.model.clone(), input);
        let response = self
            .client
            .generate_embeddings(request)
            .await
            .map_err(|e| LlmError::Ollama(e.to_string()))?;
        Ok(response.embeddings)
    }
}

impl EmbeddingProvider for OllamaEmbedder {
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "ollama"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.request(EmbeddingsInput::from(text))
            .await?
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyResponse { provider: "ollama" })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self
            .request(EmbeddingsInput::Multiple(texts.to_vec()))
            .await?;
        expect_count("ollama", texts.len(), vectors)
    }
}

/// Split a base URL into the `(scheme://host, port)` pair the client wants.
fn split_base_url(base_url: &str) -> (String, u16) {
    match url::Url::parse(base_url) {
        Ok(url) if url.has_host() => (
            format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default()),
            url.port().unwrap_or(DEFAULT_PORT),
        ),
        _ => (base_url.trim_end_matches('/').to_owned(), DEFAULT_PORT),
    }
}
