//! Component wiring: embedder, vector index, resolver, registry, pipeline, retrieval.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use trawl_index::{
    IndexRecord, IndexRegistry, IndexState, IndexingPipeline, IndexingResult, RetrievalService,
};
use trawl_llm::ollama::OllamaEmbedder;
use trawl_llm::openai::OpenAiEmbedder;
use trawl_llm::{AnyEmbedder, CachedEmbedder, EmbeddingProvider};
use trawl_repo::{GitFetcher, RepositoryResolver};
use trawl_store::{InMemoryVectorIndex, QdrantVectorIndex, SearchHit, VectorIndex};

use crate::config::{Config, EmbeddingProviderKind, VectorBackend};

pub type Embedder = CachedEmbedder<AnyEmbedder>;

/// Config path priority: explicit argument, `TRAWL_CONFIG`, `config/default.toml`.
#[must_use]
pub fn resolve_config_path(cli: Option<&Path>) -> PathBuf {
    if let Some(path) = cli {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var("TRAWL_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("config/default.toml")
}

/// Build the embedding backend named by `config.embedding`.
///
/// # Errors
///
/// Returns an error if the provider needs a missing credential or fails to load.
pub fn create_embedder(config: &Config) -> anyhow::Result<AnyEmbedder> {
    let embedding = &config.embedding;
    let embedder = match embedding.provider {
        EmbeddingProviderKind::Ollama => AnyEmbedder::Ollama(OllamaEmbedder::new(
            &embedding.base_url,
            embedding.model.clone(),
            embedding.dimension,
        )),
        EmbeddingProviderKind::OpenAi => {
            let key = config
                .secrets
                .openai_api_key
                .as_ref()
                .context("TRAWL_OPENAI_API_KEY is required for the openai provider")?;
            AnyEmbedder::OpenAi(OpenAiEmbedder::new(
                key.expose().to_owned(),
                embedding.base_url.clone(),
                embedding.model.clone(),
                embedding.dimension,
            ))
        }
        #[cfg(feature = "candle")]
        EmbeddingProviderKind::Candle => AnyEmbedder::Candle(
            trawl_llm::candle::CandleEmbedder::load_detected(&embedding.model)
                .context("failed to load candle embedding model")?,
        ),
        #[cfg(not(feature = "candle"))]
        EmbeddingProviderKind::Candle => {
            anyhow::bail!("candle provider requires the `candle` feature")
        }
    };
    tracing::info!(
        provider = embedding.provider.as_str(),
        model = %embedding.model,
        dimension = embedder.dimension(),
        "embedding provider ready"
    );
    Ok(embedder)
}

/// Build the vector index named by `config.vector_store`.
///
/// # Errors
///
/// Returns an error if the Qdrant client cannot be created.
pub fn create_store(config: &Config) -> anyhow::Result<Arc<dyn VectorIndex>> {
    let store: Arc<dyn VectorIndex> = match config.vector_store.backend {
        VectorBackend::Memory => Arc::new(InMemoryVectorIndex::new()),
        VectorBackend::Qdrant => Arc::new(
            QdrantVectorIndex::new(
                &config.vector_store.qdrant_url,
                config.vector_store.collection.clone(),
            )
            .context("failed to create qdrant client")?,
        ),
    };
    tracing::info!(backend = store.backend(), "vector index ready");
    Ok(store)
}

/// All components wired from one [`Config`].
pub struct Engine {
    config: Config,
    embedder: Arc<Embedder>,
    pipeline: IndexingPipeline<Embedder>,
    retrieval: RetrievalService<Embedder>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("pipeline", &self.pipeline)
            .field("retrieval", &self.retrieval)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Validate `config` and build every component from it.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails or a backend cannot be constructed.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        config.validate()?;
        let embedder = create_embedder(&config)?;
        let store = create_store(&config)?;
        Self::with_parts(config, embedder, store)
    }

    /// Build an engine around an existing embedder and store.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry snapshot cannot be loaded.
    pub fn with_parts(
        config: Config,
        embedder: AnyEmbedder,
        store: Arc<dyn VectorIndex>,
    ) -> anyhow::Result<Self> {
        let embedder = Arc::new(
            CachedEmbedder::new(embedder)
                .with_batch_size(config.embedding.batch_size)
                .with_cache_enabled(config.embedding.cache_enabled)
                .with_cache_capacity(config.embedding.cache_capacity),
        );

        let registry = Arc::new(match &config.indexing.registry_path {
            Some(path) => IndexRegistry::with_snapshot(path).with_context(|| {
                format!("failed to load index registry from {}", path.display())
            })?,
            None => IndexRegistry::new(),
        });

        let resolver = Arc::new(RepositoryResolver::with_fetcher(
            config.repository.resolver_config(),
            GitFetcher::new(config.repository.git_binary.clone()),
        ));

        let retrieval = RetrievalService::new(
            resolver.parser().clone(),
            Arc::clone(&embedder),
            Arc::clone(&store),
            Arc::clone(&registry),
        );
        let pipeline = IndexingPipeline::new(
            resolver,
            Arc::clone(&embedder),
            store,
            registry,
            config.indexing.pipeline_config(),
        );

        Ok(Self {
            config,
            embedder,
            pipeline,
            retrieval,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn embedder(&self) -> &Arc<Embedder> {
        &self.embedder
    }

    #[must_use]
    pub fn pipeline(&self) -> &IndexingPipeline<Embedder> {
        &self.pipeline
    }

    #[must_use]
    pub fn retrieval(&self) -> &RetrievalService<Embedder> {
        &self.retrieval
    }

    pub async fn index_repository(&self, raw: &str, force: bool) -> IndexingResult {
        self.pipeline.index_repository(raw, force).await
    }

    /// Search with the configured `top_k` and threshold unless overridden.
    ///
    /// # Errors
    ///
    /// See [`RetrievalService::search`].
    pub async fn search(
        &self,
        raw: &str,
        query: &str,
        top_k: Option<usize>,
        score_threshold: Option<f32>,
        path_fragment: Option<&str>,
    ) -> trawl_index::Result<Vec<SearchHit>> {
        let top_k = top_k.unwrap_or(self.config.retrieval.top_k);
        let threshold = score_threshold.unwrap_or(self.config.retrieval.score_threshold);
        match path_fragment {
            Some(fragment) => {
                self.retrieval
                    .search_in_path(raw, query, top_k, threshold, fragment)
                    .await
            }
            None => self.retrieval.search(raw, query, top_k, threshold, None).await,
        }
    }

    #[must_use]
    pub fn is_indexed(&self, raw: &str) -> bool {
        self.pipeline.is_indexed(raw)
    }

    #[must_use]
    pub fn status(&self, raw: &str) -> (IndexState, Option<IndexRecord>) {
        (self.pipeline.state(raw), self.pipeline.record(raw))
    }

    /// # Errors
    ///
    /// See [`IndexingPipeline::clear_index`].
    pub async fn clear_index(&self, raw: &str) -> trawl_index::Result<bool> {
        self.pipeline.clear_index(raw).await
    }

    /// Remove expired checkouts. Returns how many were removed.
    pub async fn cleanup_expired(&self) -> usize {
        self.pipeline.resolver().cleanup_expired().await
    }

    /// Delete the on-disk checkout of a remote repository. Its index is left alone.
    ///
    /// # Errors
    ///
    /// Returns an error if `raw` is invalid or the directory cannot be removed.
    pub async fn remove_checkout(&self, raw: &str) -> trawl_index::Result<bool> {
        Ok(self.pipeline.resolver().cleanup(raw).await?)
    }
}
