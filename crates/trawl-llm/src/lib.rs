//! Embedding provider abstraction, backend implementations, and a content-addressed cache.

pub mod any;
pub mod cache;
#[cfg(feature = "candle")]
pub mod candle;
pub mod error;
pub(crate) mod http;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod provider;
pub mod retry;

pub use any::AnyEmbedder;
pub use cache::CachedEmbedder;
pub use error::LlmError;
pub use provider::EmbeddingProvider;
pub use retry::RetryPolicy;
