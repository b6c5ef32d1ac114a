//! Errors raised by embedding backends.

/// Failure to turn text into vectors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// Transport-level failure talking to a remote embedding endpoint.
    #[error("embedding request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed embedding payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("ollama embedding failed: {0}")]
    Ollama(String),

    /// The endpoint kept answering 429 or 503 after every retry.
    #[error("embedding endpoint is rate limited")]
    RateLimited,

    #[error("{provider} returned no embedding")]
    EmptyResponse { provider: &'static str },

    /// Batch responses must carry exactly one vector per input, in input order.
    #[error("{provider} returned {actual} embeddings for {expected} inputs")]
    CountMismatch {
        provider: String,
        expected: usize,
        actual: usize,
    },

    #[error("expected {expected}-dimensional vectors, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("failed to load embedding model: {0}")]
    ModelLoad(String),

    #[error("local embedding inference failed: {0}")]
    Inference(String),

    #[cfg(feature = "candle")]
    #[error("candle: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, LlmError>;
