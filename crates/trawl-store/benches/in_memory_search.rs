use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use trawl_store::{InMemoryVectorIndex, MetadataFilter, Predicate, VectorIndex, VectorRecord};

const DIMENSION: usize = 384;

#[allow(clippy::cast_precision_loss)]
fn vector(seed: usize) -> Vec<f32> {
    (0..DIMENSION)
        .map(|i| ((seed * 31 + i * 17) % 97) as f32 / 97.0)
        .collect()
}

fn populated(runtime: &tokio::runtime::Runtime, size: usize) -> InMemoryVectorIndex {
    let index = InMemoryVectorIndex::new();
    let records = (0..size)
        .map(|i| {
            VectorRecord::new(format!("chunk-{i}"), vector(i), "body")
                .with_metadata("file_path", format!("src/file_{}.rs", i % 50))
        })
        .collect();
    runtime.block_on(index.add_batch(records)).unwrap();
    index
}

fn search(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let mut group = c.benchmark_group("in_memory_search");

    for size in [1_000, 10_000] {
        let index = populated(&runtime, size);
        let query = vector(7);
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("unfiltered", size), &query, |b, query| {
            b.iter(|| runtime.block_on(index.search(black_box(query.clone()), 10, None)));
        });

        let filter = MetadataFilter::from(Predicate::contains("file_path", "file_1"));
        group.bench_with_input(BenchmarkId::new("contains", size), &query, |b, query| {
            b.iter(|| {
                runtime.block_on(index.search(black_box(query.clone()), 10, Some(filter.clone())))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, search);
criterion_main!(benches);
