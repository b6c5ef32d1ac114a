#[cfg(feature = "candle")]
use crate::candle::CandleEmbedder;
use crate::error::LlmError;
#[cfg(any(test, feature = "mock"))]
use crate::mock::MockEmbedder;
use crate::ollama::OllamaEmbedder;
use crate::openai::OpenAiEmbedder;
use crate::provider::EmbeddingProvider;

/// Generates a match over all `AnyEmbedder` variants, binding the inner embedder
/// and evaluating the given expression for each arm.
macro_rules! delegate_embedder {
    ($self:expr, |$p:ident| $expr:expr) => {
        match $self {
            AnyEmbedder::Ollama($p) => $expr,
            AnyEmbedder::OpenAi($p) => $expr,
            #[cfg(feature = "candle")]
            AnyEmbedder::Candle($p) => $expr,
            #[cfg(any(test, feature = "mock"))]
            AnyEmbedder::Mock($p) => $expr,
        }
    };
}

/// Backend chosen at startup from configuration.
#[derive(Debug, Clone)]
pub enum AnyEmbedder {
    Ollama(OllamaEmbedder),
    OpenAi(OpenAiEmbedder),
    #[cfg(feature = "candle")]
    Candle(CandleEmbedder),
    #[cfg(any(test, feature = "mock"))]
    Mock(MockEmbedder),
}

impl EmbeddingProvider for AnyEmbedder {
    fn name(&self) -> &str {
        delegate_embedder!(self, |p| p.name())
    }

    fn dimension(&self) -> usize {
        delegate_embedder!(self, |p| p.dimension())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        delegate_embedder!(self, |p| p.embed(text).await)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        delegate_embedder!(self, |p| p.embed_batch(texts).await)
    }
}
