use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("invalid repository reference {reference:?}: {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("failed to fetch {url} after {attempts} attempt(s): {message}")]
    FetchFailed {
        url: String,
        attempts: u32,
        message: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RepoError {
    pub(crate) fn invalid(reference: &str, reason: impl Into<String>) -> Self {
        Self::InvalidReference {
            reference: reference.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Failure of a single fetch attempt.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("exited with code {code:?}: {stderr}")]
    Exit { code: Option<i32>, stderr: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RepoError>;
