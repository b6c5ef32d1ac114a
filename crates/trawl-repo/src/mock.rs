//! In-process fetcher for tests.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::error::FetchError;
use crate::fetch::{FetchRequest, Fetcher};

/// Writes a fixed file set into the target directory instead of running `git`.
#[derive(Debug, Default)]
pub struct MockFetcher {
    files: Mutex<Vec<(PathBuf, String)>>,
    failures_left: AtomicU32,
    calls: AtomicUsize,
    delay: Duration,
}

impl MockFetcher {
    /// Left behind by a failed attempt so tests can check it gets cleaned up.
    pub const PARTIAL_MARKER: &'static str = "PARTIAL";

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_file(self, path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        self.set_file(path, content);
        self
    }

    /// Fail the next `n` attempts with a non-zero exit.
    #[must_use]
    pub fn failing_first(self, n: u32) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Add or replace a file written by subsequent fetches.
    pub fn set_file(&self, path: impl Into<PathBuf>, content: impl Into<String>) {
        let path = path.into();
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        files.retain(|(p, _)| *p != path);
        files.push((path, content.into()));
    }

    /// Number of fetch attempts so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<(), FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        tokio::fs::create_dir_all(&request.target).await?;

        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            tokio::fs::write(request.target.join(Self::PARTIAL_MARKER), b"").await?;
            return Err(FetchError::Exit {
                code: Some(128),
                stderr: "fatal: mock fetch failure".into(),
            });
        }

        let files = self
            .files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for (path, content) in files {
            let full = request.target.join(path);
            if let Some(parent) = full.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(full, content).await?;
        }
        Ok(())
    }
}
