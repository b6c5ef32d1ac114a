mod env;
mod types;


pub use types::*;

use std::path::Path;

use anyhow::{Context, bail};

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Reject settings the components cannot work with.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.embedding.dimension == 0 {
            bail!("embedding.dimension must be greater than 0");
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be greater than 0");
        }
        if self.embedding.cache_enabled && self.embedding.cache_capacity == 0 {
            bail!("embedding.cache_capacity must be greater than 0 while the cache is enabled");
        }
        if self.embedding.provider == EmbeddingProviderKind::OpenAi
            && self.secrets.openai_api_key.is_none()
        {
            bail!("the openai embedding provider requires TRAWL_OPENAI_API_KEY");
        }
        if self.repository.max_fetch_attempts == 0 {
            bail!("repository.max_fetch_attempts must be greater than 0");
        }
        if self.repository.allowed_hosts.is_empty() {
            bail!("repository.allowed_hosts must not be empty");
        }
        if self.indexing.chunk_size == 0 {
            bail!("indexing.chunk_size must be greater than 0");
        }
        if self.indexing.chunk_overlap >= self.indexing.chunk_size {
            bail!(
                "indexing.chunk_overlap ({}) must be less than indexing.chunk_size ({})",
                self.indexing.chunk_overlap,
                self.indexing.chunk_size
            );
        }
        if self.indexing.batch_size == 0 {
            bail!("indexing.batch_size must be greater than 0");
        }
        if !(-1.0..=1.0).contains(&self.retrieval.score_threshold) {
            bail!(
                "retrieval.score_threshold must be within [-1, 1], got {}",
                self.retrieval.score_threshold
            );
        }
        Ok(())
    }
}
