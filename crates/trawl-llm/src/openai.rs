use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::provider::{EmbeddingProvider, expect_count};
use crate::retry::{RetryPolicy, send_with_retry};

/// Embedder for the `/embeddings` endpoint of OpenAI and compatible servers.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimension: usize,
    retry: RetryPolicy,
}

impl fmt::Debug for OpenAiEmbedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiEmbedder")
            .field("client", &"<reqwest::Client>")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("dimension", &self.dimension)
            .field("retry", &self.retry)
            .finish()
    }
}

impl OpenAiEmbedder {
    #[must_use]
    pub fn new(api_key: String, mut base_url: String, model: String, dimension: usize) -> Self {
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: crate::http::default_client(),
            api_key,
            base_url,
            model,
            dimension,
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    async fn request(&self, input: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let body = EmbeddingRequest {
            input,
            model: &self.model,
        };
        let url = format!("{}/embeddings", self.base_url);

        let response = send_with_retry("openai", &self.retry, || {
            self.client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
        })
        .await?;

        let status = response.status();
        let text = response.text().await.map_err(LlmError::Http)?;

        if !status.is_success() {
            tracing::error!(%status, body = %text, "embedding API error");
            return Err(LlmError::Other(format!(
                "embedding request failed (status {status})"
            )));
        }

        let mut resp: EmbeddingResponse = serde_json::from_str(&text)?;
        resp.data.sort_by_key(|d| d.index);
        Ok(resp.data.into_iter().map(|d| d.embedding).collect())
    }
}

impl EmbeddingProvider for OpenAiEmbedder {
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "openai"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.request(&[text.to_owned()])
            .await?
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyResponse { provider: "openai" })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self.request(texts).await?;
        expect_count("openai", texts.len(), vectors)
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{bearer_token, body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn embedder(server: &MockServer) -> OpenAiEmbedder {
        OpenAiEmbedder::new(
            "sk-test".into(),
            format!("{}/v1/", server.uri()),
            "text-embedding-3-small".into(),
            3,
        )
    }

    #[test]
    fn debug_redacts_api_key() {
        let e = OpenAiEmbedder::new("sk-secret".into(), "http://x".into(), "m".into(), 3);
        let debug = format!("{e:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn new_trims_trailing_slashes() {
        let e = OpenAiEmbedder::new("k".into(), "http://x/v1//".into(), "m".into(), 3);
        assert_eq!(e.base_url, "http://x/v1");
    }

    #[test]
    fn parse_embedding_response_without_index() {
        let json = r#"{"data":[{"embedding":[0.1,0.2,0.3]}]}"#;
        let resp: EmbeddingResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.data[0].index, 0);
        assert_eq!(resp.data[0].embedding, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn embed_batch_sends_all_inputs_and_reorders_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(bearer_token("sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "text-embedding-3-small",
                "input": ["first", "second"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"index": 1, "embedding": [0.0, 1.0, 0.0]},
                    {"index": 0, "embedding": [1.0, 0.0, 0.0]}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let texts = vec!["first".to_owned(), "second".to_owned()];
        let vectors = embedder(&server).embed_batch(&texts).await.unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]);
    }

    #[tokio::test]
    async fn embed_returns_first_vector() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"index": 0, "embedding": [0.5, 0.5, 0.0]}]
            })))
            .mount(&server)
            .await;

        let vector = embedder(&server).embed("hello").await.unwrap();
        assert_eq!(vector, vec![0.5, 0.5, 0.0]);
    }

    #[tokio::test]
    async fn short_response_is_count_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"index": 0, "embedding": [0.5, 0.5, 0.0]}]
            })))
            .mount(&server)
            .await;

        let texts = vec!["a".to_owned(), "b".to_owned()];
        let err = embedder(&server).embed_batch(&texts).await.unwrap_err();
        assert!(matches!(err, LlmError::CountMismatch { expected: 2, actual: 1, .. }));
    }

    #[tokio::test]
    async fn server_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = embedder(&server).embed("hello").await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn persistent_rate_limit_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(429))
            .expect(2)
            .mount(&server)
            .await;

        let policy = RetryPolicy {
            max_retries: 1,
            base_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(5),
        };
        let err = embedder(&server)
            .with_retry_policy(policy)
            .embed("hello")
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::RateLimited));
    }

    #[tokio::test]
    async fn unreachable_endpoint_errors() {
        let e = OpenAiEmbedder::new("k".into(), "http://127.0.0.1:1".into(), "m".into(), 3);
        assert!(matches!(e.embed("test").await, Err(LlmError::Http(_))));
    }
}
