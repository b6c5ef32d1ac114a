use testcontainers::ContainerAsync;
use testcontainers::GenericImage;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use trawl_store::{MetadataFilter, Predicate, QdrantVectorIndex, VectorIndex, VectorRecord};

const QDRANT_GRPC_PORT: ContainerPort = ContainerPort::Tcp(6334);

fn qdrant_image() -> GenericImage {
    GenericImage::new("qdrant/qdrant", "v1.16.0")
        .with_wait_for(WaitFor::message_on_stdout("gRPC listening"))
        .with_exposed_port(QDRANT_GRPC_PORT)
}

async fn setup() -> (QdrantVectorIndex, ContainerAsync<GenericImage>) {
    let container = qdrant_image().start().await.unwrap();
    let grpc_port = container.get_host_port_ipv4(6334).await.unwrap();
    let url = format!("http://127.0.0.1:{grpc_port}");
    let index = QdrantVectorIndex::new(&url, "trawl_test_chunks").unwrap();
    (index, container)
}

fn record(id: &str, vector: Vec<f32>, repo: &str, file: &str) -> VectorRecord {
    VectorRecord::new(id, vector, format!("content of {id}"))
        .with_metadata("repo_url", repo)
        .with_metadata("file_path", file)
}

#[tokio::test]
#[ignore = "requires docker"]
async fn empty_collection_behaves_like_empty_index() {
    let (index, _container) = setup().await;

    assert_eq!(index.count().await.unwrap(), 0);
    assert!(index.search(vec![1.0, 0.0], 5, None).await.unwrap().is_empty());
    assert!(index.list_ids(None).await.unwrap().is_empty());
    index.clear().await.unwrap();
}

#[tokio::test]
#[ignore = "requires docker"]
async fn upsert_search_and_overwrite() {
    let (index, _container) = setup().await;

    index
        .add_batch(vec![
            record("r:a.py:0", vec![1.0, 0.0, 0.0, 0.0], "r", "a.py"),
            record("r:b.py:0", vec![0.0, 1.0, 0.0, 0.0], "r", "b.py"),
        ])
        .await
        .unwrap();
    index
        .add(record("r:a.py:0", vec![1.0, 0.0, 0.0, 0.0], "r", "a2.py"))
        .await
        .unwrap();

    assert_eq!(index.count().await.unwrap(), 2);
    let hits = index
        .search(vec![1.0, 0.0, 0.0, 0.0], 1, None)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk_id, "r:a.py:0");
    assert_eq!(hits[0].content, "content of r:a.py:0");
    assert_eq!(hits[0].metadata["file_path"], "a2.py");
    assert!(hits[0].score > 0.99);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn filters_delete_where_and_clear() {
    let (index, _container) = setup().await;

    index
        .add_batch(vec![
            record("one:src/a.rs:0", vec![1.0, 0.0], "one", "src/a.rs"),
            record("one:docs/b.md:0", vec![0.9, 0.1], "one", "docs/b.md"),
            record("two:src/c.rs:0", vec![1.0, 0.0], "two", "src/c.rs"),
        ])
        .await
        .unwrap();

    let filter = MetadataFilter::new()
        .and(Predicate::equals("repo_url", "one"))
        .and(Predicate::contains("file_path", "docs/"));
    let hits = index.search(vec![1.0, 0.0], 10, Some(filter)).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk_id, "one:docs/b.md:0");

    let mut ids = index
        .list_ids(Some(Predicate::equals("repo_url", "one").into()))
        .await
        .unwrap();
    ids.sort();
    assert_eq!(ids, ["one:docs/b.md:0", "one:src/a.rs:0"]);

    let removed = index
        .delete_where(Predicate::equals("repo_url", "one").into())
        .await
        .unwrap();
    assert_eq!(removed, 2);
    assert_eq!(index.count().await.unwrap(), 1);

    index.delete(vec!["two:src/c.rs:0".into()]).await.unwrap();
    assert_eq!(index.count().await.unwrap(), 0);

    index.clear().await.unwrap();
    index
        .add(record("x", vec![1.0, 0.0, 0.0], "three", "x.rs"))
        .await
        .unwrap();
    assert_eq!(index.count().await.unwrap(), 1);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn dimension_mismatch_is_rejected() {
    let (index, _container) = setup().await;

    index
        .add(record("a", vec![1.0, 0.0], "r", "a.rs"))
        .await
        .unwrap();
    assert!(
        index
            .add(record("b", vec![1.0, 0.0, 0.0], "r", "b.rs"))
            .await
            .is_err()
    );
}
