//! Source file enumeration and text decoding.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{IndexError, Result};
use crate::languages::{DEFAULT_EXTENSIONS, DEFAULT_SKIP_DIRS, normalize_extension};

#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Lower-case extensions without the leading dot.
    pub extensions: HashSet<String>,
    /// Directory names skipped at any depth.
    pub skip_dirs: HashSet<String>,
    /// Files larger than this many bytes are skipped.
    pub max_file_size: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| (*e).to_owned()).collect(),
            skip_dirs: DEFAULT_SKIP_DIRS.iter().map(|d| (*d).to_owned()).collect(),
            max_file_size: 500 * 1024,
        }
    }
}

impl ScanConfig {
    #[must_use]
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|e| normalize_extension(e.as_ref()))
            .collect();
        self
    }

    #[must_use]
    pub fn with_skip_dirs<I, S>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_dirs = dirs.into_iter().map(Into::into).collect();
        self
    }

    fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| self.extensions.contains(&e.to_ascii_lowercase()))
    }
}

/// A file selected for indexing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub abs_path: PathBuf,
    /// Relative to the repository root, `/`-separated.
    pub rel_path: String,
}

/// Walk `root` in file-name order and return every file with an allowed extension.
///
/// Hidden files and `.gitignore` rules are not consulted; only `skip_dirs` prunes the walk.
#[must_use]
pub fn collect_files(root: &Path, config: &ScanConfig) -> Vec<SourceFile> {
    let skip_dirs = Arc::new(config.skip_dirs.clone());
    ignore::WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(move |entry| {
            entry.depth() == 0
                || !entry.file_type().is_some_and(|ft| ft.is_dir())
                || !skip_dirs.contains(entry.file_name().to_string_lossy().as_ref())
        })
        .build()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!("walk error: {e}");
                None
            }
        })
        .filter(|e| e.file_type().is_some_and(|ft| ft.is_file()) && config.accepts(e.path()))
        .map(|e| SourceFile {
            rel_path: relative_path(root, e.path()),
            abs_path: e.into_path(),
        })
        .collect()
}

fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// What reading a candidate file produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Text(String),
    TooLarge(u64),
    Binary,
    Blank,
}

/// Read a file as text: UTF-8 first, Latin-1 when that fails.
///
/// # Errors
///
/// Returns [`IndexError::Read`] if the file cannot be stat'ed or read.
pub async fn read_source(file: &SourceFile, max_size: u64) -> Result<ReadOutcome> {
    let read_err = |source| IndexError::Read {
        path: file.rel_path.clone(),
        source,
    };

    let size = tokio::fs::metadata(&file.abs_path)
        .await
        .map_err(read_err)?
        .len();
    if size > max_size {
        return Ok(ReadOutcome::TooLarge(size));
    }

    let bytes = tokio::fs::read(&file.abs_path).await.map_err(read_err)?;
    Ok(decode(bytes))
}

fn decode(bytes: Vec<u8>) -> ReadOutcome {
    if bytes.contains(&0) {
        return ReadOutcome::Binary;
    }
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => e.into_bytes().into_iter().map(char::from).collect(),
    };
    if text.trim().is_empty() {
        ReadOutcome::Blank
    } else {
        ReadOutcome::Text(text)
    }
}
