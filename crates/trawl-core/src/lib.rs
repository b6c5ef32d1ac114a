//! Configuration and wiring for the trawl indexing and retrieval engine.

pub mod bootstrap;
pub mod config;

pub use bootstrap::{Embedder, Engine};
pub use config::Config;
