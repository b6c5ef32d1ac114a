use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use trawl_index::{
    ChunkerConfig, IndexError, IndexRegistry, IndexState, IndexingPipeline, PipelineConfig,
    RetrievalService, ScanConfig,
};
use trawl_llm::CachedEmbedder;
use trawl_llm::mock::MockEmbedder;
use trawl_repo::mock::MockFetcher;
use trawl_repo::{RepositoryResolver, ResolverConfig};
use trawl_store::{InMemoryVectorIndex, MetadataFilter, Predicate, VectorIndex};

const REMOTE: &str = "https://github.com/acme/widgets";

struct Harness<P = MockEmbedder> {
    pipeline: Arc<IndexingPipeline<P, MockFetcher>>,
    retrieval: RetrievalService<P>,
    store: Arc<InMemoryVectorIndex>,
    embedder: Arc<P>,
    _storage: TempDir,
}

fn small_chunks() -> PipelineConfig {
    PipelineConfig {
        chunker: ChunkerConfig {
            chunk_size: 200,
            chunk_overlap: 20,
        },
        scan: ScanConfig::default(),
        batch_size: 4,
    }
}

fn harness_with<P: trawl_llm::EmbeddingProvider>(
    embedder: P,
    fetcher: MockFetcher,
    config: PipelineConfig,
) -> Harness<P> {
    let storage = tempfile::tempdir().unwrap();
    let resolver = Arc::new(RepositoryResolver::with_fetcher(
        ResolverConfig {
            storage_path: storage.path().to_path_buf(),
            retry_base_delay: Duration::from_millis(1),
            ..ResolverConfig::default()
        },
        fetcher,
    ));
    let embedder = Arc::new(embedder);
    let store = Arc::new(InMemoryVectorIndex::new());
    let registry = Arc::new(IndexRegistry::new());

    let retrieval = RetrievalService::new(
        resolver.parser().clone(),
        Arc::clone(&embedder),
        Arc::clone(&store) as Arc<dyn VectorIndex>,
        Arc::clone(&registry),
    );
    let pipeline = Arc::new(IndexingPipeline::new(
        resolver,
        Arc::clone(&embedder),
        Arc::clone(&store) as Arc<dyn VectorIndex>,
        registry,
        config,
    ));
    Harness {
        pipeline,
        retrieval,
        store,
        embedder,
        _storage: storage,
    }
}

fn harness() -> Harness {
    harness_with(MockEmbedder::new(256), MockFetcher::new(), small_chunks())
}

fn lines(n: usize, f: impl Fn(usize) -> String) -> String {
    let mut out = (1..=n).map(f).collect::<Vec<_>>().join("\n");
    out.push('\n');
    out
}

fn a_py() -> String {
    lines(50, |i| format!("# function in a.py line {i}"))
}

fn b_py() -> String {
    lines(10, |i| format!("def helper_{i}(): return {i}"))
}

fn write(root: &Path, rel: &str, content: impl AsRef<[u8]>) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn two_file_repo() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.py", a_py());
    write(dir.path(), "b.py", b_py());
    dir
}

fn path_str(dir: &TempDir) -> &str {
    dir.path().to_str().unwrap()
}

async fn sorted_ids(store: &InMemoryVectorIndex) -> Vec<String> {
    let mut ids = store.list_ids(None).await.unwrap();
    ids.sort();
    ids
}

#[tokio::test]
async fn two_file_example() {
    let h = harness();
    let repo = two_file_repo();

    let result = h.pipeline.index_repository(path_str(&repo), false).await;

    assert!(result.success, "{:?}", result.errors);
    assert_eq!(result.total_files, 2);
    assert_eq!(result.indexed_files, 2);
    assert_eq!(result.skipped_files, 0);
    assert!(result.total_chunks > 2);
    assert!(h.pipeline.is_indexed(path_str(&repo)));

    let hits = h
        .retrieval
        .search(path_str(&repo), "function in a.py", 1, 0.5, None)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].metadata["file_path"], "a.py");
    assert_eq!(hits[0].metadata["language"], "python");
}

#[tokio::test]
async fn chunk_ids_derive_from_repository_and_path() {
    let h = harness();
    let repo = two_file_repo();
    h.pipeline.index_repository(path_str(&repo), false).await;

    let record = h.pipeline.record(path_str(&repo)).unwrap();
    let filter = MetadataFilter::new().and(Predicate::equals("file_path", "a.py"));
    let ids = h.store.list_ids(Some(filter)).await.unwrap();
    let prefix = format!("{}:a.py:", record.repo_ref.canonical_url);
    assert!(!ids.is_empty());
    assert!(ids.iter().all(|id| id.starts_with(&prefix)));
}

#[tokio::test]
async fn forced_reindex_is_idempotent() {
    let h = harness();
    let repo = two_file_repo();

    let first = h.pipeline.index_repository(path_str(&repo), true).await;
    let ids_first = sorted_ids(&h.store).await;
    let second = h.pipeline.index_repository(path_str(&repo), true).await;
    let ids_second = sorted_ids(&h.store).await;

    assert!(first.success && second.success);
    assert_eq!(first.total_chunks, second.total_chunks);
    assert_eq!(second.chunks_removed, 0);
    assert_eq!(ids_first, ids_second);
    assert_eq!(h.store.count().await.unwrap(), first.total_chunks);
}

#[tokio::test]
async fn already_indexed_is_a_no_op() {
    let h = harness();
    let repo = two_file_repo();

    h.pipeline.index_repository(path_str(&repo), false).await;
    let embedded = h.embedder.texts_embedded();
    let again = h.pipeline.index_repository(path_str(&repo), false).await;

    assert!(again.success);
    assert!(again.already_indexed);
    assert_eq!(again.total_chunks, 0);
    assert_eq!(h.embedder.texts_embedded(), embedded);
}

#[tokio::test]
async fn chunks_are_sent_in_bounded_batches() {
    let h = harness();
    let repo = two_file_repo();

    let result = h.pipeline.index_repository(path_str(&repo), false).await;

    assert_eq!(h.embedder.texts_embedded(), result.total_chunks);
    assert_eq!(h.embedder.batch_calls(), result.total_chunks.div_ceil(4));
}

#[tokio::test]
async fn stale_chunks_are_removed_on_reindex() {
    let h = harness();
    let repo = two_file_repo();
    h.pipeline.index_repository(path_str(&repo), false).await;

    std::fs::remove_file(repo.path().join("b.py")).unwrap();
    write(repo.path(), "a.py", lines(5, |i| format!("# short a.py line {i}")));
    let result = h.pipeline.index_repository(path_str(&repo), true).await;

    assert!(result.success);
    assert!(result.chunks_removed > 0);
    assert_eq!(h.store.count().await.unwrap(), result.total_chunks);
    let b_chunks = h
        .store
        .list_ids(Some(Predicate::equals("file_path", "b.py").into()))
        .await
        .unwrap();
    assert!(b_chunks.is_empty());
}

#[tokio::test]
async fn unreadable_files_are_skipped_not_fatal() {
    let h = harness();
    let repo = two_file_repo();
    write(repo.path(), "blob.py", [b'x', 0, b'y']);
    write(repo.path(), "empty.py", "   \n");
    write(repo.path(), "huge.txt", "x".repeat(600 * 1024));
    write(repo.path(), "legacy.txt", [b'c', b'a', b'f', 0xE9, b'\n']);
    write(repo.path(), "node_modules/dep/index.js", "module.exports = 1;\n");

    let result = h.pipeline.index_repository(path_str(&repo), false).await;

    assert!(result.success);
    assert_eq!(result.total_files, 6);
    assert_eq!(result.indexed_files, 3);
    assert_eq!(result.skipped_files, 3);
    assert!(result.errors.is_empty());
}

#[tokio::test]
async fn embedding_failure_aborts_first_run() {
    let h = harness_with(MockEmbedder::failing(), MockFetcher::new(), small_chunks());
    let repo = two_file_repo();

    let result = h.pipeline.index_repository(path_str(&repo), false).await;

    assert!(!result.success);
    assert!(result.errors.iter().any(|e| e.contains("embedding failed")));
    assert_eq!(h.pipeline.state(path_str(&repo)), IndexState::NotIndexed);
    let err = h
        .retrieval
        .search(path_str(&repo), "q", 1, 0.0, None)
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::NotIndexed(_)));
}

#[tokio::test]
async fn failed_forced_reindex_keeps_previous_record() {
    let h = harness();
    let repo = two_file_repo();
    h.pipeline.index_repository(path_str(&repo), false).await;
    let before = h.pipeline.record(path_str(&repo)).unwrap();

    h.embedder.set_failing(true);
    let result = h.pipeline.index_repository(path_str(&repo), true).await;

    assert!(!result.success);
    assert!(h.pipeline.is_indexed(path_str(&repo)));
    assert_eq!(h.pipeline.record(path_str(&repo)), Some(before));
}

#[tokio::test]
async fn invalid_reference_fails_without_work() {
    let h = harness();

    let result = h
        .pipeline
        .index_repository("https://example.com/acme/widgets", false)
        .await;

    assert!(!result.success);
    assert!(result.errors[0].contains("invalid repository reference"));
    assert_eq!(h.embedder.batch_calls(), 0);
}

#[tokio::test]
async fn remote_repository_is_fetched_and_indexed() {
    let h = harness_with(
        MockEmbedder::new(256),
        MockFetcher::new()
            .with_file("src/app.py", a_py())
            .with_file("README.md", "# widgets\n"),
        small_chunks(),
    );

    let result = h.pipeline.index_repository(REMOTE, false).await;

    assert!(result.success, "{:?}", result.errors);
    assert_eq!(result.repo_url, REMOTE);
    assert_eq!(result.indexed_files, 2);
    assert!(h.pipeline.is_indexed("git@github.com:acme/widgets.git"));

    let hits = h
        .retrieval
        .search_in_path(REMOTE, "function in a.py", 3, 0.0, "src/")
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| h.metadata["file_path"] == "src/app.py"));
}

#[tokio::test]
async fn fetch_failure_is_reported() {
    let h = harness_with(
        MockEmbedder::new(256),
        MockFetcher::new().failing_first(10),
        small_chunks(),
    );

    let result = h.pipeline.index_repository(REMOTE, false).await;

    assert!(!result.success);
    assert!(result.errors[0].contains("failed to fetch"));
    assert!(!h.pipeline.is_indexed(REMOTE));
    assert_eq!(h.pipeline.resolver().fetcher().calls(), 3);
}

#[tokio::test]
async fn concurrent_runs_for_one_repository_fetch_once() {
    let h = harness_with(
        MockEmbedder::new(256),
        MockFetcher::new()
            .with_file("a.py", a_py())
            .with_delay(Duration::from_millis(30)),
        small_chunks(),
    );

    let (a, b) = tokio::join!(
        h.pipeline.index_repository(REMOTE, false),
        h.pipeline.index_repository("https://github.com/acme/widgets.git", false),
    );

    assert!(a.success && b.success);
    assert_eq!(
        [a.already_indexed, b.already_indexed]
            .iter()
            .filter(|x| **x)
            .count(),
        1
    );
    assert_eq!(h.pipeline.resolver().fetcher().calls(), 1);
}

#[tokio::test]
async fn different_repositories_stay_separate() {
    let h = harness();
    let one = two_file_repo();
    let two = tempfile::tempdir().unwrap();
    write(two.path(), "a.py", a_py());

    h.pipeline.index_repository(path_str(&one), false).await;
    h.pipeline.index_repository(path_str(&two), false).await;

    let hits = h
        .retrieval
        .search(path_str(&two), "function in a.py", 50, 0.0, None)
        .await
        .unwrap();
    let url = h.pipeline.record(path_str(&two)).unwrap().repo_ref.canonical_url;
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| h.metadata["repo_url"] == url.as_str()));
}

#[tokio::test]
async fn clear_index_removes_chunks_and_record() {
    let h = harness();
    let one = two_file_repo();
    let two = two_file_repo();
    h.pipeline.index_repository(path_str(&one), false).await;
    let kept = h.pipeline.index_repository(path_str(&two), false).await;

    assert!(h.pipeline.clear_index(path_str(&one)).await.unwrap());
    assert!(!h.pipeline.is_indexed(path_str(&one)));
    assert_eq!(h.store.count().await.unwrap(), kept.total_chunks);
    assert!(!h.pipeline.clear_index(path_str(&one)).await.unwrap());

    h.pipeline.clear_all().await.unwrap();
    assert_eq!(h.store.count().await.unwrap(), 0);
    assert!(!h.pipeline.is_indexed(path_str(&two)));
}

#[tokio::test]
async fn deadline_cancels_and_restores_state() {
    let h = harness_with(
        MockEmbedder::new(256).with_delay(500),
        MockFetcher::new(),
        small_chunks(),
    );
    let repo = two_file_repo();

    let deadline = tokio::time::Instant::now() + Duration::from_millis(50);
    let result = h
        .pipeline
        .index_repository_until(path_str(&repo), false, deadline)
        .await;

    assert!(!result.success);
    assert!(result.errors[0].contains("deadline exceeded"));
    assert_eq!(h.pipeline.state(path_str(&repo)), IndexState::NotIndexed);
}

#[tokio::test]
async fn cached_embedder_skips_unchanged_chunks_on_reindex() {
    let h = harness_with(
        CachedEmbedder::new(MockEmbedder::new(256)),
        MockFetcher::new(),
        small_chunks(),
    );
    let repo = two_file_repo();

    let first = h.pipeline.index_repository(path_str(&repo), false).await;
    let embedded = h.embedder.inner().texts_embedded();
    let second = h.pipeline.index_repository(path_str(&repo), true).await;

    assert!(first.success && second.success);
    assert_eq!(embedded, first.total_chunks);
    assert_eq!(h.embedder.inner().texts_embedded(), embedded);
    assert_eq!(first.total_chunks, second.total_chunks);
}

#[tokio::test]
async fn checkout_cleanup_waits_for_running_index() {
    let h = harness_with(
        MockEmbedder::new(256).with_delay(60),
        MockFetcher::new()
            .with_file("a.py", a_py())
            .with_file("b.py", a_py())
            .with_file("c.py", a_py()),
        small_chunks(),
    );

    let (result, removed) = tokio::join!(h.pipeline.index_repository(REMOTE, false), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.pipeline.resolver().cleanup(REMOTE).await
    });

    assert!(result.success, "{:?}", result.errors);
    assert!(result.errors.is_empty());
    assert_eq!(result.indexed_files, 3);
    assert_eq!(result.skipped_files, 0);
    assert!(removed.unwrap());
    assert!(h.pipeline.is_indexed(REMOTE));
}

#[tokio::test]
async fn clear_all_waits_for_running_index() {
    let h = harness_with(
        MockEmbedder::new(256).with_delay(40),
        MockFetcher::new(),
        small_chunks(),
    );
    let repo = two_file_repo();

    let (result, cleared) = tokio::join!(h.pipeline.index_repository(path_str(&repo), false), async {
        tokio::time::sleep(Duration::from_millis(60)).await;
        h.pipeline.clear_all().await
    });

    assert!(result.success, "{:?}", result.errors);
    cleared.unwrap();
    assert!(!h.pipeline.is_indexed(path_str(&repo)));
    assert_eq!(h.store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn deleted_local_repository_can_still_be_cleared() {
    let h = harness();
    let repo = two_file_repo();
    let raw = path_str(&repo).to_owned();

    let result = h.pipeline.index_repository(&raw, false).await;
    assert!(result.success, "{:?}", result.errors);
    drop(repo);

    assert!(h.pipeline.is_indexed(&raw));
    assert!(h.pipeline.record(&raw).is_some());
    let hits = h.retrieval.search(&raw, "function in a.py", 1, 0.0, None).await.unwrap();
    assert_eq!(hits.len(), 1);

    assert!(h.pipeline.clear_index(&raw).await.unwrap());
    assert!(!h.pipeline.is_indexed(&raw));
    assert_eq!(h.store.count().await.unwrap(), 0);

    let reindex = h.pipeline.index_repository(&raw, false).await;
    assert!(!reindex.success);
}
