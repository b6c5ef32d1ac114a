//! Error types for trawl-index.

use std::time::Duration;

use trawl_repo::RepoError;

/// Errors that can occur while indexing or querying a repository.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Reference is neither a supported remote URL nor an existing directory.
    #[error("invalid repository reference {reference:?}: {reason}")]
    InvalidReference { reference: String, reason: String },

    /// Repository could not be fetched after every retry.
    #[error("failed to fetch {url} after {attempts} attempt(s): {message}")]
    FetchFailed {
        url: String,
        attempts: u32,
        message: String,
    },

    /// A single file could not be read. Recovered by skipping the file.
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("embedding failed: {0}")]
    EmbeddingFailed(#[from] trawl_llm::LlmError),

    #[error("vector store failed: {0}")]
    StoreFailed(#[from] trawl_store::VectorStoreError),

    /// Query against a repository that has no index record.
    #[error("repository {0} is not indexed")]
    NotIndexed(String),

    #[error("deadline exceeded after {}ms", .0.as_millis())]
    DeadlineExceeded(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("registry snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),
}

impl From<RepoError> for IndexError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::InvalidReference { reference, reason } => {
                Self::InvalidReference { reference, reason }
            }
            RepoError::FetchFailed {
                url,
                attempts,
                message,
            } => Self::FetchFailed {
                url,
                attempts,
                message,
            },
            RepoError::Io(e) => Self::Io(e),
        }
    }
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;
