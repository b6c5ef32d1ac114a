use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use trawl_index::languages::{DEFAULT_EXTENSIONS, DEFAULT_SKIP_DIRS};
use trawl_index::{ChunkerConfig, PipelineConfig, ScanConfig};
use trawl_repo::ResolverConfig;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(skip)]
    pub secrets: ResolvedSecrets,
}

/// A credential that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Credentials read from the environment only.
#[derive(Debug, Clone, Default)]
pub struct ResolvedSecrets {
    pub openai_api_key: Option<Secret>,
}

/// Embedding backend selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    #[default]
    Ollama,
    OpenAi,
    Candle,
}

impl EmbeddingProviderKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::OpenAi => "openai",
            Self::Candle => "candle",
        }
    }
}

impl fmt::Display for EmbeddingProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_embedding_base_url() -> String {
    "http://localhost:11434".into()
}

fn default_embedding_model() -> String {
    "all-minilm".into()
}

fn default_dimension() -> usize {
    384
}

fn default_embedding_batch_size() -> usize {
    100
}

fn default_cache_capacity() -> usize {
    trawl_llm::cache::DEFAULT_CAPACITY
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProviderKind,
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    /// Model name for Ollama and OpenAI, `HuggingFace` repo id for candle.
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
    /// Vectors kept in the embedding cache before the least recently used are evicted.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::default(),
            base_url: default_embedding_base_url(),
            model: default_embedding_model(),
            dimension: default_dimension(),
            batch_size: default_embedding_batch_size(),
            cache_enabled: true,
            cache_capacity: default_cache_capacity(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    #[default]
    Memory,
    Qdrant,
}

fn default_qdrant_url() -> String {
    "http://localhost:6334".into()
}

fn default_collection() -> String {
    "trawl_code_chunks".into()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VectorStoreConfig {
    #[serde(default)]
    pub backend: VectorBackend,
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            backend: VectorBackend::default(),
            qdrant_url: default_qdrant_url(),
            collection: default_collection(),
        }
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./data/repos")
}

fn default_cache_ttl_secs() -> u64 {
    86_400
}

fn default_fetch_timeout_secs() -> u64 {
    300
}

fn default_max_fetch_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_allowed_hosts() -> Vec<String> {
    vec![trawl_repo::reference::DEFAULT_HOST.to_owned()]
}

fn default_git_binary() -> String {
    "git".into()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RepositoryConfig {
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_max_fetch_attempts")]
    pub max_fetch_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_allowed_hosts")]
    pub allowed_hosts: Vec<String>,
    #[serde(default = "default_git_binary")]
    pub git_binary: String,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            storage_path: default_storage_path(),
            cache_ttl_secs: default_cache_ttl_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_fetch_attempts: default_max_fetch_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            allowed_hosts: default_allowed_hosts(),
            git_binary: default_git_binary(),
        }
    }
}

impl RepositoryConfig {
    #[must_use]
    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            storage_path: self.storage_path.clone(),
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            max_attempts: self.max_fetch_attempts,
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
            allowed_hosts: self.allowed_hosts.clone(),
        }
    }
}

fn default_chunk_size() -> usize {
    1500
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_max_file_size_kb() -> u64 {
    500
}

fn default_indexing_batch_size() -> usize {
    50
}

fn default_extensions() -> Vec<String> {
    DEFAULT_EXTENSIONS.iter().map(|e| (*e).to_owned()).collect()
}

fn default_skip_dirs() -> Vec<String> {
    DEFAULT_SKIP_DIRS.iter().map(|d| (*d).to_owned()).collect()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexingConfig {
    /// Maximum chunk size in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_max_file_size_kb")]
    pub max_file_size_kb: u64,
    /// Chunks per embed-and-upsert round trip.
    #[serde(default = "default_indexing_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_skip_dirs")]
    pub skip_dirs: Vec<String>,
    /// JSON file the index registry is mirrored to. In-memory only when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_path: Option<PathBuf>,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            max_file_size_kb: default_max_file_size_kb(),
            batch_size: default_indexing_batch_size(),
            extensions: default_extensions(),
            skip_dirs: default_skip_dirs(),
            registry_path: None,
        }
    }
}

impl IndexingConfig {
    #[must_use]
    pub fn pipeline_config(&self) -> PipelineConfig {
        let mut scan = ScanConfig::default()
            .with_extensions(&self.extensions)
            .with_skip_dirs(self.skip_dirs.iter().cloned());
        scan.max_file_size = self.max_file_size_kb.saturating_mul(1024);
        PipelineConfig {
            chunker: ChunkerConfig {
                chunk_size: self.chunk_size,
                chunk_overlap: self.chunk_overlap,
            },
            scan,
            batch_size: self.batch_size,
        }
    }
}

fn default_top_k() -> usize {
    10
}

fn default_score_threshold() -> f32 {
    0.5
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            score_threshold: default_score_threshold(),
        }
    }
}
