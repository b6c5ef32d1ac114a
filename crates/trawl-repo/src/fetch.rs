use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::error::FetchError;

const STDERR_LIMIT: usize = 4096;

/// One checkout attempt.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub target: PathBuf,
    pub branch: Option<String>,
    pub timeout: Duration,
}

/// Materialises a remote repository into a local directory.
pub trait Fetcher: Send + Sync {
    /// Fetch `request.url` into `request.target`, which does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] when the fetch cannot start, exits unsuccessfully, or runs past
    /// `request.timeout`.
    fn fetch(&self, request: &FetchRequest) -> impl Future<Output = Result<(), FetchError>> + Send;
}

/// Shallow single-branch clone through the `git` command line.
#[derive(Debug, Clone)]
pub struct GitFetcher {
    program: String,
}

impl Default for GitFetcher {
    fn default() -> Self {
        Self::new("git")
    }
}

impl GitFetcher {
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn args(request: &FetchRequest) -> Vec<String> {
        let mut args = vec![
            "clone".to_owned(),
            "--depth".to_owned(),
            "1".to_owned(),
            "--single-branch".to_owned(),
        ];
        if let Some(branch) = &request.branch {
            args.push("--branch".to_owned());
            args.push(branch.clone());
        }
        args.push("--".to_owned());
        args.push(request.url.clone());
        args.push(request.target.to_string_lossy().into_owned());
        args
    }
}

impl Fetcher for GitFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<(), FetchError> {
        tracing::debug!(url = %request.url, target = %request.target.display(), "running git clone");

        let mut child = Command::new(&self.program)
            .args(Self::args(request))
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| FetchError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf).await;
                buf
            })
        });

        let waited = tokio::time::timeout(request.timeout, child.wait()).await;
        let Ok(status) = waited else {
            let _ = child.kill().await;
            tracing::warn!(url = %request.url, timeout_secs = request.timeout.as_secs(), "git clone timed out");
            return Err(FetchError::Timeout(request.timeout));
        };
        let status = status?;

        if status.success() {
            return Ok(());
        }

        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };
        let mut stderr = String::from_utf8_lossy(&stderr).trim().to_owned();
        if stderr.len() > STDERR_LIMIT {
            let mut end = STDERR_LIMIT;
            while !stderr.is_char_boundary(end) {
                end -= 1;
            }
            stderr.truncate(end);
        }
        Err(FetchError::Exit {
            code: status.code(),
            stderr,
        })
    }
}
