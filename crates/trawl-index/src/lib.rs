//! Code indexing and semantic retrieval.
//!
//! The pipeline resolves a repository to a local checkout, splits its source files into
//! overlapping line-aligned chunks, embeds them in batches, and upserts them into a
//! [`trawl_store::VectorIndex`] under deterministic ids. The retrieval service answers
//! natural-language queries against one indexed repository.

pub mod chunker;
pub mod error;
pub mod languages;
pub mod pipeline;
pub mod registry;
pub mod retrieval;
pub mod scanner;

pub use chunker::{ChunkerConfig, FileChunk, TextChunk, chunk, chunk_file};
pub use error::{IndexError, Result};
pub use pipeline::{IndexingPipeline, IndexingResult, PipelineConfig};
pub use registry::{IndexRecord, IndexRegistry, IndexState};
pub use retrieval::{RetrievalConfig, RetrievalService, format_as_context};
pub use scanner::ScanConfig;
