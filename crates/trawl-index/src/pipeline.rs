//! Repository indexing orchestrator: resolve → scan → chunk → embed → store.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use serde::Serialize;
use trawl_llm::{EmbeddingProvider, LlmError};
use trawl_repo::{Fetcher, GitFetcher, KeyGuard, RepoRef, RepositoryResolver};
use trawl_store::{MetadataFilter, Predicate, VectorIndex};

use crate::chunker::{ChunkerConfig, FileChunk, chunk_file};
use crate::error::{IndexError, Result};
use crate::languages::language_tag;
use crate::registry::{IndexRecord, IndexRegistry, IndexState};
use crate::scanner::{ReadOutcome, ScanConfig, collect_files, read_source};

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub chunker: ChunkerConfig,
    pub scan: ScanConfig,
    /// Chunks embedded and stored per round trip (default: 50).
    pub batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            scan: ScanConfig::default(),
            batch_size: 50,
        }
    }
}

/// Summary of an indexing run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexingResult {
    pub success: bool,
    pub repo_url: String,
    pub total_files: usize,
    pub indexed_files: usize,
    pub skipped_files: usize,
    pub total_chunks: usize,
    pub chunks_removed: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
    /// Set when the repository was already indexed and no work was done.
    pub already_indexed: bool,
}

impl IndexingResult {
    fn new(repo_url: impl Into<String>) -> Self {
        Self {
            repo_url: repo_url.into(),
            ..Self::default()
        }
    }

    fn failed(repo_url: impl Into<String>, error: &IndexError) -> Self {
        Self {
            errors: vec![error.to_string()],
            ..Self::new(repo_url)
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis().try_into().unwrap_or(u64::MAX)
}

pub(crate) fn repo_filter(repo_ref: &RepoRef) -> MetadataFilter {
    Predicate::equals("repo_url", repo_ref.canonical_url.as_str()).into()
}

/// Puts the registry back the way it was unless the run commits.
///
/// Covers early returns and the pipeline future being dropped mid-run.
struct RunGuard<'a> {
    registry: &'a IndexRegistry,
    key: String,
    previous: Option<IndexRecord>,
    committed: bool,
}

impl<'a> RunGuard<'a> {
    fn begin(registry: &'a IndexRegistry, key: String) -> Self {
        let previous = registry.begin(&key);
        Self {
            registry,
            key,
            previous,
            committed: false,
        }
    }

    fn commit(mut self, record: IndexRecord) {
        self.registry.commit(record);
        self.committed = true;
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.registry.abort(&self.key, self.previous.take());
        }
    }
}

/// Indexes repositories into a vector store and tracks which ones are indexed.
///
/// Runs for the same repository hold the resolver's per-repository lock for their whole
/// duration, resolve included, so checkout cleanup waits for them. [`clear_all`](Self::clear_all)
/// waits for every run in flight.
pub struct IndexingPipeline<P, F = GitFetcher> {
    resolver: Arc<RepositoryResolver<F>>,
    embedder: Arc<P>,
    store: Arc<dyn VectorIndex>,
    registry: Arc<IndexRegistry>,
    /// Shared by runs and per-repository clears, exclusive for `clear_all`.
    gate: tokio::sync::RwLock<()>,
    config: PipelineConfig,
}

impl<P, F> std::fmt::Debug for IndexingPipeline<P, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexingPipeline")
            .field("store", &self.store.backend())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<P: EmbeddingProvider, F: Fetcher> IndexingPipeline<P, F> {
    #[must_use]
    pub fn new(
        resolver: Arc<RepositoryResolver<F>>,
        embedder: Arc<P>,
        store: Arc<dyn VectorIndex>,
        registry: Arc<IndexRegistry>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            resolver,
            embedder,
            store,
            registry,
            gate: tokio::sync::RwLock::new(()),
            config,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<IndexRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn resolver(&self) -> &Arc<RepositoryResolver<F>> {
        &self.resolver
    }

    fn parse(&self, raw: &str) -> Result<RepoRef> {
        Ok(self.resolver.parser().parse(raw)?)
    }

    fn parse_for_lookup(&self, raw: &str) -> Result<RepoRef> {
        Ok(self.resolver.parser().parse_for_lookup(raw)?)
    }

    /// Index a repository.
    ///
    /// Never fails outright: expected failures come back with `success = false` and the cause
    /// in `errors`. Unless `force` is set, an already indexed repository returns immediately
    /// with `already_indexed = true`.
    pub async fn index_repository(&self, raw: &str, force: bool) -> IndexingResult {
        let start = Instant::now();
        let repo_ref = match self.parse(raw) {
            Ok(repo_ref) => repo_ref,
            Err(e) => {
                tracing::warn!(reference = raw, "rejecting repository reference: {e}");
                let mut result = IndexingResult::failed(raw, &e);
                result.duration_ms = elapsed_ms(start);
                return result;
            }
        };
        let key = repo_ref.cache_key();
        let _gate = self.gate.read().await;
        let lock = self.resolver.locks().lock(&key).await;

        let mut result = IndexingResult::new(repo_ref.canonical_url.as_str());
        if !force && self.registry.get(&key).is_some() {
            tracing::debug!(repo = %key, "already indexed, skipping");
            result.success = true;
            result.already_indexed = true;
            result.duration_ms = elapsed_ms(start);
            return result;
        }

        let guard = RunGuard::begin(&self.registry, key.clone());
        tracing::info!(repo = %key, force, "indexing started");

        match self.run(&repo_ref, &lock, &mut result).await {
            Ok(()) => {
                result.success = true;
                guard.commit(IndexRecord {
                    repo_ref,
                    indexed_at: SystemTime::now(),
                    file_count: result.indexed_files,
                    chunk_count: result.total_chunks,
                });
            }
            Err(e) => {
                tracing::error!(repo = %key, "indexing failed: {e}");
                result.errors.push(e.to_string());
                drop(guard);
            }
        }

        result.duration_ms = elapsed_ms(start);
        tracing::info!(
            repo = %key,
            success = result.success,
            files = result.indexed_files,
            skipped = result.skipped_files,
            chunks = result.total_chunks,
            removed = result.chunks_removed,
            duration_ms = result.duration_ms,
            "indexing finished"
        );
        result
    }

    /// [`index_repository`](Self::index_repository) bounded by `deadline`.
    ///
    /// On expiry the run is dropped: the registry is restored and chunks already written stay.
    pub async fn index_repository_until(
        &self,
        raw: &str,
        force: bool,
        deadline: tokio::time::Instant,
    ) -> IndexingResult {
        let start = Instant::now();
        if let Ok(result) =
            tokio::time::timeout_at(deadline, self.index_repository(raw, force)).await
        {
            return result;
        }
        let repo_url = self
            .parse(raw)
            .map_or_else(|_| raw.to_owned(), |r| r.canonical_url);
        tracing::warn!(repo = %repo_url, "indexing cancelled at deadline");
        let mut result =
            IndexingResult::failed(repo_url, &IndexError::DeadlineExceeded(start.elapsed()));
        result.duration_ms = elapsed_ms(start);
        result
    }

    async fn run(
        &self,
        repo_ref: &RepoRef,
        lock: &KeyGuard,
        result: &mut IndexingResult,
    ) -> Result<()> {
        let local = self.resolver.resolve_held(repo_ref, lock).await?;

        let root = local.local_path.clone();
        let scan = self.config.scan.clone();
        let files = tokio::task::spawn_blocking(move || collect_files(&root, &scan))
            .await
            .map_err(|e| IndexError::Io(std::io::Error::other(e)))?;
        result.total_files = files.len();
        tracing::debug!(repo = %repo_ref, files = files.len(), "files collected");

        let batch_size = self.config.batch_size.max(1);
        let mut batch: Vec<FileChunk> = Vec::with_capacity(batch_size);
        let mut produced: HashSet<String> = HashSet::new();

        for file in &files {
            let content = match read_source(file, self.config.scan.max_file_size).await {
                Ok(ReadOutcome::Text(content)) => content,
                Ok(outcome) => {
                    tracing::debug!(file = %file.rel_path, ?outcome, "file skipped");
                    result.skipped_files += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(file = %file.rel_path, "{e}");
                    result.errors.push(e.to_string());
                    result.skipped_files += 1;
                    continue;
                }
            };

            let language = language_tag(&file.abs_path);
            let chunks = chunk_file(
                &repo_ref.canonical_url,
                &file.rel_path,
                &language,
                &content,
                self.config.chunker,
            );
            result.indexed_files += 1;

            for chunk in chunks {
                produced.insert(chunk.id.clone());
                batch.push(chunk);
                if batch.len() >= batch_size {
                    self.flush(&mut batch, result).await?;
                }
            }
        }
        self.flush(&mut batch, result).await?;

        let stale: Vec<String> = self
            .store
            .list_ids(Some(repo_filter(repo_ref)))
            .await?
            .into_iter()
            .filter(|id| !produced.contains(id))
            .collect();
        if !stale.is_empty() {
            tracing::debug!(repo = %repo_ref, stale = stale.len(), "removing stale chunks");
            result.chunks_removed = stale.len();
            self.store.delete(stale).await?;
        }
        Ok(())
    }

    async fn flush(&self, batch: &mut Vec<FileChunk>, result: &mut IndexingResult) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        if vectors.len() != batch.len() {
            return Err(LlmError::CountMismatch {
                provider: self.embedder.name().to_owned(),
                expected: batch.len(),
                actual: vectors.len(),
            }
            .into());
        }

        let records: Vec<_> = batch
            .drain(..)
            .zip(vectors)
            .map(|(chunk, vector)| chunk.into_record(vector))
            .collect();
        let count = records.len();
        self.store.add_batch(records).await?;
        result.total_chunks += count;
        tracing::debug!(chunks = count, total = result.total_chunks, "batch stored");
        Ok(())
    }

    #[must_use]
    pub fn is_indexed(&self, raw: &str) -> bool {
        self.state(raw) == IndexState::Indexed
    }

    /// State of a repository; unparseable references are reported as not indexed.
    ///
    /// A local repository keeps its state after its directory is deleted.
    #[must_use]
    pub fn state(&self, raw: &str) -> IndexState {
        self.parse_for_lookup(raw)
            .map_or(IndexState::NotIndexed, |r| self.registry.state(&r.cache_key()))
    }

    #[must_use]
    pub fn record(&self, raw: &str) -> Option<IndexRecord> {
        let repo_ref = self.parse_for_lookup(raw).ok()?;
        self.registry.get(&repo_ref.cache_key())
    }

    /// Remove a repository's chunks and its index record.
    ///
    /// Returns `true` if there was anything to remove. Works for local repositories whose
    /// directory is gone.
    ///
    /// # Errors
    ///
    /// Returns an error if the reference is invalid or the store delete fails.
    pub async fn clear_index(&self, raw: &str) -> Result<bool> {
        let repo_ref = self.parse_for_lookup(raw)?;
        let key = repo_ref.cache_key();
        let _gate = self.gate.read().await;
        let _lock = self.resolver.locks().lock(&key).await;

        let removed_chunks = self.store.delete_where(repo_filter(&repo_ref)).await?;
        let removed_record = self.registry.remove(&key).is_some();
        tracing::info!(repo = %key, removed_chunks, "index cleared");
        Ok(removed_record || removed_chunks > 0)
    }

    /// Drop every chunk and record once the runs in flight have finished.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be cleared.
    pub async fn clear_all(&self) -> Result<()> {
        let _gate = self.gate.write().await;
        self.store.clear().await?;
        self.registry.clear();
        tracing::info!("all indexes cleared");
        Ok(())
    }
}
