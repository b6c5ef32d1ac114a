use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use crate::error::{RepoError, Result};
use crate::fetch::{FetchRequest, Fetcher, GitFetcher};
use crate::locks::{KeyGuard, KeyedLocks};
use crate::reference::{RefParser, RepoRef};

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub storage_path: PathBuf,
    pub cache_ttl: Duration,
    pub fetch_timeout: Duration,
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
    pub allowed_hosts: Vec<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from("./data/repos"),
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            fetch_timeout: Duration::from_secs(300),
            max_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
            allowed_hosts: vec![crate::reference::DEFAULT_HOST.to_owned()],
        }
    }
}

/// A repository available on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalRepo {
    pub repo_ref: RepoRef,
    pub local_path: PathBuf,
    pub cloned_at: SystemTime,
    /// `None` for local directories, which never expire.
    pub ttl: Option<Duration>,
}

impl LocalRepo {
    #[must_use]
    pub fn is_valid_at(&self, now: SystemTime) -> bool {
        let fresh = match self.ttl {
            None => true,
            Some(ttl) => self
                .cloned_at
                .checked_add(ttl)
                .is_some_and(|expires| now < expires),
        };
        fresh && self.local_path.is_dir()
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(SystemTime::now())
    }
}

/// Maps repository references to local directories.
///
/// Remote checkouts are cached by [`RepoRef::cache_key`] until their TTL runs out or the
/// directory disappears. Concurrent resolutions of the same key share one fetch.
///
/// Every fetch and eviction holds the key's entry in [`locks`](Self::locks). Callers that need
/// a checkout to stay put for longer take that lock themselves and use
/// [`resolve_held`](Self::resolve_held).
pub struct RepositoryResolver<F = GitFetcher> {
    config: ResolverConfig,
    parser: RefParser,
    fetcher: F,
    cache: Mutex<HashMap<String, LocalRepo>>,
    locks: Arc<KeyedLocks>,
}

impl<F> std::fmt::Debug for RepositoryResolver<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryResolver")
            .field("config", &self.config)
            .field("cached", &self.cached_len())
            .finish_non_exhaustive()
    }
}

impl RepositoryResolver<GitFetcher> {
    #[must_use]
    pub fn new(config: ResolverConfig) -> Self {
        Self::with_fetcher(config, GitFetcher::default())
    }
}

impl<F> RepositoryResolver<F> {
    #[must_use]
    pub fn with_fetcher(config: ResolverConfig, fetcher: F) -> Self {
        let parser = RefParser::new(config.allowed_hosts.clone());
        Self {
            config,
            parser,
            fetcher,
            cache: Mutex::new(HashMap::new()),
            locks: Arc::new(KeyedLocks::new()),
        }
    }

    #[must_use]
    pub fn parser(&self) -> &RefParser {
        &self.parser
    }

    /// Per-repository locks, keyed by [`RepoRef::cache_key`].
    #[must_use]
    pub fn locks(&self) -> &Arc<KeyedLocks> {
        &self.locks
    }

    #[must_use]
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    #[must_use]
    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Checkout directory for a remote reference: `{storage}/{owner}_{name}_{hash8}`.
    #[must_use]
    pub fn target_dir(&self, repo_ref: &RepoRef) -> PathBuf {
        let hash = blake3::hash(repo_ref.canonical_url.as_bytes()).to_hex();
        self.config.storage_path.join(format!(
            "{}_{}_{}",
            repo_ref.owner,
            repo_ref.name,
            &hash.as_str()[..8]
        ))
    }

    #[must_use]
    pub fn cached(&self, repo_ref: &RepoRef) -> Option<LocalRepo> {
        self.cache_guard().get(&repo_ref.cache_key()).cloned()
    }

    fn cached_len(&self) -> usize {
        self.cache_guard().len()
    }

    fn cache_guard(&self) -> std::sync::MutexGuard<'_, HashMap<String, LocalRepo>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop every cache entry that is no longer valid and delete its directory.
    ///
    /// Returns the number of entries removed.
    ///
    /// Each eviction waits for the key's lock, so a checkout in use is not deleted under its
    /// holder. Entries refreshed in the meantime are kept.
    pub async fn cleanup_expired(&self) -> usize {
        let candidates: Vec<String> = {
            let now = SystemTime::now();
            self.cache_guard()
                .iter()
                .filter(|(_, repo)| !repo.is_valid_at(now))
                .map(|(key, _)| key.clone())
                .collect()
        };

        let mut removed = 0;
        for key in candidates {
            let _guard = self.locks.lock(&key).await;
            let evicted = {
                let mut cache = self.cache_guard();
                match cache.get(&key) {
                    Some(repo) if !repo.is_valid() => cache.remove(&key),
                    _ => None,
                }
            };
            let Some(repo) = evicted else { continue };
            if let Err(e) = remove_dir_if_exists(&repo.local_path).await {
                tracing::warn!(path = %repo.local_path.display(), "failed to remove expired checkout: {e}");
            }
            removed += 1;
        }
        if removed > 0 {
            tracing::info!(removed, "expired checkouts cleaned up");
        }
        removed
    }
}

impl<F: Fetcher> RepositoryResolver<F> {
    /// Parse `raw` and make the repository available locally.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::InvalidReference`] when `raw` cannot be parsed and
    /// [`RepoError::FetchFailed`] when every fetch attempt failed.
    pub async fn resolve(&self, raw: &str) -> Result<LocalRepo> {
        let repo_ref = self.parser.parse(raw)?;
        self.resolve_ref(&repo_ref).await
    }

    /// Resolve an already parsed reference.
    ///
    /// # Errors
    ///
    /// See [`RepositoryResolver::resolve`].
    pub async fn resolve_ref(&self, repo_ref: &RepoRef) -> Result<LocalRepo> {
        if repo_ref.is_local() {
            return local_repo(repo_ref);
        }
        let guard = self.locks.lock(&repo_ref.cache_key()).await;
        self.resolve_held(repo_ref, &guard).await
    }

    /// [`resolve_ref`](Self::resolve_ref) for a caller that already holds
    /// `locks().lock(&repo_ref.cache_key())`.
    ///
    /// # Errors
    ///
    /// See [`RepositoryResolver::resolve`].
    pub async fn resolve_held(
        &self,
        repo_ref: &RepoRef,
        _held: &KeyGuard,
    ) -> Result<LocalRepo> {
        if repo_ref.is_local() {
            return local_repo(repo_ref);
        }
        let key = repo_ref.cache_key();

        if let Some(hit) = self.cached(repo_ref) {
            if hit.is_valid() {
                tracing::debug!(repo = %key, "checkout cache hit");
                return Ok(hit);
            }
            tracing::debug!(repo = %key, "cached checkout expired, refetching");
        }

        let target = self.target_dir(repo_ref);
        self.fetch_with_retry(repo_ref, &target).await?;

        let local = LocalRepo {
            repo_ref: repo_ref.clone(),
            local_path: target,
            cloned_at: SystemTime::now(),
            ttl: Some(self.config.cache_ttl),
        };
        self.cache_guard().insert(key, local.clone());
        Ok(local)
    }

    async fn fetch_with_retry(&self, repo_ref: &RepoRef, target: &Path) -> Result<()> {
        let max_attempts = self.config.max_attempts.max(1);
        let request = FetchRequest {
            url: repo_ref.canonical_url.clone(),
            target: target.to_path_buf(),
            branch: repo_ref.branch.clone(),
            timeout: self.config.fetch_timeout,
        };

        let mut last_error = String::new();
        for attempt in 0..max_attempts {
            remove_dir_if_exists(target).await?;
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            tracing::info!(url = %request.url, attempt = attempt + 1, max_attempts, "fetching repository");
            match self.fetcher.fetch(&request).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    last_error = e.to_string();
                    tracing::warn!(url = %request.url, attempt = attempt + 1, "fetch failed: {e}");
                }
            }

            if attempt + 1 < max_attempts {
                tokio::time::sleep(backoff(self.config.retry_base_delay, attempt)).await;
            }
        }

        if let Err(e) = remove_dir_if_exists(target).await {
            tracing::warn!(path = %target.display(), "failed to remove partial checkout: {e}");
        }
        Err(RepoError::FetchFailed {
            url: request.url,
            attempts: max_attempts,
            message: last_error,
        })
    }

    /// Remove the checkout and cache entry of a remote repository.
    ///
    /// Returns `false` for local references and when nothing was cached or on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if `raw` cannot be parsed or the directory cannot be removed.
    pub async fn cleanup(&self, raw: &str) -> Result<bool> {
        let repo_ref = self.parser.parse(raw)?;
        if repo_ref.is_local() {
            return Ok(false);
        }
        let key = repo_ref.cache_key();
        let _guard = self.locks.lock(&key).await;

        let cached = self.cache_guard().remove(&key);
        let target = cached.map_or_else(|| self.target_dir(&repo_ref), |repo| repo.local_path);
        let existed = remove_dir_if_exists(&target).await?;
        if existed {
            tracing::info!(repo = %key, "checkout removed");
        }
        Ok(existed)
    }
}

fn local_repo(repo_ref: &RepoRef) -> Result<LocalRepo> {
    let local_path = repo_ref
        .local_path()
        .filter(|p| p.is_dir())
        .ok_or_else(|| {
            RepoError::invalid(&repo_ref.canonical_url, "local directory no longer exists")
        })?;
    Ok(LocalRepo {
        repo_ref: repo_ref.clone(),
        local_path,
        cloned_at: SystemTime::now(),
        ttl: None,
    })
}

/// `base * 2^attempt`, saturating.
pub(crate) fn backoff(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1_u32.checked_shl(attempt).unwrap_or(u32::MAX))
}

async fn remove_dir_if_exists(path: &Path) -> std::io::Result<bool> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::mock::MockFetcher;

    const URL: &str = "https://github.com/o/repo";

    fn config(storage: &Path) -> ResolverConfig {
        ResolverConfig {
            storage_path: storage.to_path_buf(),
            cache_ttl: Duration::from_secs(3600),
            fetch_timeout: Duration::from_secs(5),
            max_attempts: 3,
            retry_base_delay: Duration::from_millis(1),
            allowed_hosts: vec!["github.com".into()],
        }
    }

    fn resolver(storage: &Path, fetcher: MockFetcher) -> RepositoryResolver<MockFetcher> {
        RepositoryResolver::with_fetcher(config(storage), fetcher)
    }

    #[test]
    fn backoff_doubles() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff(base, 0), Duration::from_millis(100));
        assert_eq!(backoff(base, 1), Duration::from_millis(200));
        assert_eq!(backoff(base, 3), Duration::from_millis(800));
        assert_eq!(backoff(base, 40), base.saturating_mul(u32::MAX));
    }

    #[test]
    fn target_dir_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let r = resolver(dir.path(), MockFetcher::new());
        let repo_ref = r.parser().parse(URL).unwrap();
        let a = r.target_dir(&repo_ref);
        let b = r.target_dir(&r.parser().parse("git@github.com:o/repo.git").unwrap());
        assert_eq!(a, b);
        let name = a.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("o_repo_"));
        assert_eq!(name.len(), "o_repo_".len() + 8);
    }

    #[test]
    fn local_repo_validity() {
        let dir = tempfile::tempdir().unwrap();
        let repo_ref = RefParser::default().parse(URL).unwrap();
        let now = SystemTime::now();
        let repo = LocalRepo {
            repo_ref,
            local_path: dir.path().to_path_buf(),
            cloned_at: now,
            ttl: Some(Duration::from_secs(60)),
        };
        assert!(repo.is_valid_at(now));
        assert!(!repo.is_valid_at(now + Duration::from_secs(61)));

        let forever = LocalRepo { ttl: None, ..repo.clone() };
        assert!(forever.is_valid_at(now + Duration::from_secs(1_000_000)));

        let gone = LocalRepo {
            local_path: dir.path().join("missing"),
            ..repo
        };
        assert!(!gone.is_valid_at(now));
    }

    #[tokio::test]
    async fn fetches_once_then_hits_cache() {
        let dir = tempfile::tempdir().unwrap();
        let r = resolver(dir.path(), MockFetcher::new().with_file("main.py", "print(1)\n"));

        let first = r.resolve(URL).await.unwrap();
        assert!(first.local_path.join("main.py").is_file());
        let second = r.resolve("https://github.com/o/repo.git").await.unwrap();

        assert_eq!(first.local_path, second.local_path);
        assert_eq!(first.cloned_at, second.cloned_at);
        assert_eq!(r.fetcher().calls(), 1);
    }

    #[tokio::test]
    async fn expired_entry_is_refetched() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.cache_ttl = Duration::from_millis(50);
        let r = RepositoryResolver::with_fetcher(cfg, MockFetcher::new());

        r.resolve(URL).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        r.resolve(URL).await.unwrap();

        assert_eq!(r.fetcher().calls(), 2);
    }

    #[tokio::test]
    async fn deleted_checkout_is_refetched() {
        let dir = tempfile::tempdir().unwrap();
        let r = resolver(dir.path(), MockFetcher::new());

        let first = r.resolve(URL).await.unwrap();
        std::fs::remove_dir_all(&first.local_path).unwrap();
        let second = r.resolve(URL).await.unwrap();

        assert!(second.local_path.is_dir());
        assert_eq!(r.fetcher().calls(), 2);
    }

    #[tokio::test]
    async fn retries_clear_partial_directory() {
        let dir = tempfile::tempdir().unwrap();
        let r = resolver(
            dir.path(),
            MockFetcher::new()
                .with_file("lib.rs", "fn x() {}\n")
                .failing_first(2),
        );

        let repo = r.resolve(URL).await.unwrap();

        assert_eq!(r.fetcher().calls(), 3);
        assert!(repo.local_path.join("lib.rs").is_file());
        assert!(!repo.local_path.join(MockFetcher::PARTIAL_MARKER).exists());
    }

    #[tokio::test]
    async fn exhausted_attempts_fail_and_clean_up() {
        let dir = tempfile::tempdir().unwrap();
        let r = resolver(dir.path(), MockFetcher::new().failing_first(10));

        let err = r.resolve(URL).await.unwrap_err();

        match err {
            RepoError::FetchFailed { url, attempts, .. } => {
                assert_eq!(url, URL);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(r.fetcher().calls(), 3);
        let repo_ref = r.parser().parse(URL).unwrap();
        assert!(!r.target_dir(&repo_ref).exists());
        assert!(r.cached(&repo_ref).is_none());
    }

    #[tokio::test]
    async fn concurrent_resolves_share_one_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let r = Arc::new(resolver(
            dir.path(),
            MockFetcher::new().with_delay(Duration::from_millis(50)),
        ));

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let r = Arc::clone(&r);
                tokio::spawn(async move { r.resolve(URL).await })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(r.fetcher().calls(), 1);
    }

    #[tokio::test]
    async fn invalid_reference_does_no_io() {
        let dir = tempfile::tempdir().unwrap();
        let r = resolver(dir.path(), MockFetcher::new());

        let err = r.resolve("https://example.com/o/repo").await.unwrap_err();

        assert!(matches!(err, RepoError::InvalidReference { .. }));
        assert_eq!(r.fetcher().calls(), 0);
    }

    #[tokio::test]
    async fn local_directory_is_used_in_place() {
        let storage = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        let r = resolver(storage.path(), MockFetcher::new());

        let repo = r.resolve(project.path().to_str().unwrap()).await.unwrap();

        assert_eq!(repo.local_path, project.path().canonicalize().unwrap());
        assert_eq!(repo.ttl, None);
        assert_eq!(r.fetcher().calls(), 0);
        assert!(!r.cleanup(project.path().to_str().unwrap()).await.unwrap());
    }

    #[tokio::test]
    async fn cleanup_removes_checkout() {
        let dir = tempfile::tempdir().unwrap();
        let r = resolver(dir.path(), MockFetcher::new());

        let repo = r.resolve(URL).await.unwrap();
        assert!(r.cleanup(URL).await.unwrap());
        assert!(!repo.local_path.exists());
        assert!(!r.cleanup(URL).await.unwrap());

        r.resolve(URL).await.unwrap();
        assert_eq!(r.fetcher().calls(), 2);
    }

    #[tokio::test]
    async fn cleanup_waits_for_key_holder() {
        let dir = tempfile::tempdir().unwrap();
        let r = Arc::new(resolver(dir.path(), MockFetcher::new().with_file("a.py", "x = 1\n")));
        let repo_ref = r.parser().parse(URL).unwrap();

        let held = r.locks().lock(&repo_ref.cache_key()).await;
        let local = r.resolve_held(&repo_ref, &held).await.unwrap();

        let cleanup = tokio::spawn({
            let r = Arc::clone(&r);
            async move { r.cleanup(URL).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!cleanup.is_finished());
        assert!(local.local_path.join("a.py").is_file());

        drop(held);
        assert!(cleanup.await.unwrap().unwrap());
        assert!(!local.local_path.exists());
    }

    #[tokio::test]
    async fn cleanup_expired_skips_checkout_in_use() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.cache_ttl = Duration::from_millis(30);
        let r = Arc::new(RepositoryResolver::with_fetcher(cfg, MockFetcher::new()));
        let repo_ref = r.parser().parse(URL).unwrap();

        let held = r.locks().lock(&repo_ref.cache_key()).await;
        let local = r.resolve_held(&repo_ref, &held).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let sweep = tokio::spawn({
            let r = Arc::clone(&r);
            async move { r.cleanup_expired().await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!sweep.is_finished());
        assert!(local.local_path.is_dir());

        drop(held);
        assert_eq!(sweep.await.unwrap(), 1);
        assert!(!local.local_path.exists());
    }

    #[tokio::test]
    async fn cleanup_expired_keeps_entry_refreshed_while_waiting() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.cache_ttl = Duration::from_millis(200);
        let r = Arc::new(RepositoryResolver::with_fetcher(cfg, MockFetcher::new()));
        let repo_ref = r.parser().parse(URL).unwrap();

        r.resolve(URL).await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        let held = r.locks().lock(&repo_ref.cache_key()).await;
        let sweep = tokio::spawn({
            let r = Arc::clone(&r);
            async move { r.cleanup_expired().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        let fresh = r.resolve_held(&repo_ref, &held).await.unwrap();
        drop(held);

        assert_eq!(sweep.await.unwrap(), 0);
        assert!(fresh.local_path.is_dir());
        assert_eq!(r.fetcher().calls(), 2);
    }

    #[tokio::test]
    async fn cleanup_expired_drops_only_stale_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.cache_ttl = Duration::from_millis(50);
        let r = RepositoryResolver::with_fetcher(cfg, MockFetcher::new());

        let stale = r.resolve(URL).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(r.cleanup_expired().await, 1);
        assert!(!stale.local_path.exists());
        assert_eq!(r.cleanup_expired().await, 0);
    }
}
