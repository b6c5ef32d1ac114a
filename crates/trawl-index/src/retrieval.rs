//! Query-time retrieval: embed → search → threshold → rank.

use std::fmt::Write;
use std::sync::Arc;

use trawl_llm::EmbeddingProvider;
use trawl_repo::RefParser;
use trawl_store::{MetadataFilter, Predicate, SearchHit, VectorIndex};

use crate::error::{IndexError, Result};
use crate::pipeline::repo_filter;
use crate::registry::IndexRegistry;

/// Retrieval defaults.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Minimum cosine similarity to accept.
    pub score_threshold: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            score_threshold: 0.5,
        }
    }
}

/// Semantic search over one indexed repository.
pub struct RetrievalService<P> {
    parser: RefParser,
    embedder: Arc<P>,
    store: Arc<dyn VectorIndex>,
    registry: Arc<IndexRegistry>,
}

impl<P> std::fmt::Debug for RetrievalService<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalService")
            .field("store", &self.store.backend())
            .finish_non_exhaustive()
    }
}

impl<P: EmbeddingProvider> RetrievalService<P> {
    #[must_use]
    pub fn new(
        parser: RefParser,
        embedder: Arc<P>,
        store: Arc<dyn VectorIndex>,
        registry: Arc<IndexRegistry>,
    ) -> Self {
        Self {
            parser,
            embedder,
            store,
            registry,
        }
    }

    /// Top `top_k` chunks of repository `raw` for `query`, best first.
    ///
    /// Hits scoring below `score_threshold` are dropped after the backend's own ranking, so
    /// fewer than `top_k` hits may come back. `filter` narrows the search further.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotIndexed`] when the repository has no index record, and
    /// embedding or store errors as they occur.
    pub async fn search(
        &self,
        raw: &str,
        query: &str,
        top_k: usize,
        score_threshold: f32,
        filter: Option<MetadataFilter>,
    ) -> Result<Vec<SearchHit>> {
        let repo_ref = self.parser.parse_for_lookup(raw)?;
        if self.registry.get(&repo_ref.cache_key()).is_none() {
            return Err(IndexError::NotIndexed(repo_ref.canonical_url));
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed(query).await?;
        let mut filter = filter.unwrap_or_default();
        filter
            .predicates
            .extend(repo_filter(&repo_ref).predicates);

        let mut hits = self.store.search(query_vector, top_k, Some(filter)).await?;
        let returned = hits.len();
        hits.retain(|h| h.score >= score_threshold);
        if !hits.is_sorted_by(|a, b| a.score >= b.score) {
            hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        }

        tracing::debug!(
            repo = %repo_ref,
            returned,
            kept = hits.len(),
            score_threshold,
            "search finished"
        );
        Ok(hits)
    }

    /// [`search`](Self::search) restricted to files whose path contains `path_fragment`.
    ///
    /// # Errors
    ///
    /// See [`RetrievalService::search`].
    pub async fn search_in_path(
        &self,
        raw: &str,
        query: &str,
        top_k: usize,
        score_threshold: f32,
        path_fragment: &str,
    ) -> Result<Vec<SearchHit>> {
        let filter = MetadataFilter::from(Predicate::contains("file_path", path_fragment));
        self.search(raw, query, top_k, score_threshold, Some(filter))
            .await
    }
}

/// Format hits as XML for injection into a prompt.
#[must_use]
pub fn format_as_context(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return String::new();
    }

    let mut out = String::from("<code_context>\n");
    for hit in hits {
        let meta_str = |key: &str| hit.metadata.get(key).and_then(|v| v.as_str()).unwrap_or("");
        let meta_num = |key: &str| {
            hit.metadata
                .get(key)
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(0)
        };
        let _ = writeln!(
            out,
            "  <chunk file=\"{}\" lines=\"{}-{}\" language=\"{}\" score=\"{:.2}\">",
            meta_str("file_path"),
            meta_num("start_line"),
            meta_num("end_line"),
            meta_str("language"),
            hit.score,
        );
        out.push_str(&hit.content);
        out.push_str("\n  </chunk>\n");
    }
    out.push_str("</code_context>");
    out
}
