//! Vector index abstraction and backends.

pub mod in_memory;
pub mod qdrant;
pub mod vector_store;

pub use in_memory::InMemoryVectorIndex;
pub use qdrant::QdrantVectorIndex;
pub use vector_store::{
    BoxFuture, FieldValue, MetadataFilter, Predicate, SearchHit, VectorIndex, VectorRecord,
    VectorStoreError,
};
