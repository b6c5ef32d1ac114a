//! Per-repository index bookkeeping.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use trawl_repo::RepoRef;

use crate::error::Result;

/// Written once a repository has been indexed successfully.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub repo_ref: RepoRef,
    pub indexed_at: SystemTime,
    pub file_count: usize,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    NotIndexed,
    Indexing,
    Indexed,
}

impl std::fmt::Display for IndexState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::NotIndexed => "not indexed",
            Self::Indexing => "indexing",
            Self::Indexed => "indexed",
        })
    }
}

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<String, IndexRecord>,
    in_progress: HashSet<String>,
}

/// Records keyed by [`RepoRef::cache_key`], optionally mirrored to a JSON file.
///
/// A repository being re-indexed keeps its previous record until the run commits, so it stays
/// searchable in the meantime.
#[derive(Debug, Default)]
pub struct IndexRegistry {
    inner: Mutex<Inner>,
    snapshot: Option<PathBuf>,
}

impl IndexRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry backed by a JSON snapshot at `path`, loading it if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn with_snapshot(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records: Vec<IndexRecord> = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(path = %path.display(), records = records.len(), "index registry loaded");
        let records = records
            .into_iter()
            .map(|r| (r.repo_ref.cache_key(), r))
            .collect();
        Ok(Self {
            inner: Mutex::new(Inner {
                records,
                in_progress: HashSet::new(),
            }),
            snapshot: Some(path),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn state(&self, key: &str) -> IndexState {
        let inner = self.lock();
        if inner.in_progress.contains(key) {
            IndexState::Indexing
        } else if inner.records.contains_key(key) {
            IndexState::Indexed
        } else {
            IndexState::NotIndexed
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<IndexRecord> {
        self.lock().records.get(key).cloned()
    }

    /// All records, ordered by key.
    #[must_use]
    pub fn records(&self) -> Vec<IndexRecord> {
        let inner = self.lock();
        let mut records: Vec<_> = inner.records.values().cloned().collect();
        records.sort_by_key(|r| r.repo_ref.cache_key());
        records
    }

    /// Mark `key` as being indexed. Returns the record it had before, if any.
    pub(crate) fn begin(&self, key: &str) -> Option<IndexRecord> {
        let mut inner = self.lock();
        inner.in_progress.insert(key.to_owned());
        inner.records.get(key).cloned()
    }

    pub(crate) fn commit(&self, record: IndexRecord) {
        let mut inner = self.lock();
        let key = record.repo_ref.cache_key();
        inner.in_progress.remove(&key);
        inner.records.insert(key, record);
        self.persist(&inner);
    }

    /// End an unsuccessful run, putting `previous` back in place.
    pub(crate) fn abort(&self, key: &str, previous: Option<IndexRecord>) {
        let mut inner = self.lock();
        inner.in_progress.remove(key);
        let changed = match previous {
            Some(record) => inner.records.insert(key.to_owned(), record.clone()) != Some(record),
            None => inner.records.remove(key).is_some(),
        };
        if changed {
            self.persist(&inner);
        }
    }

    pub fn remove(&self, key: &str) -> Option<IndexRecord> {
        let mut inner = self.lock();
        let removed = inner.records.remove(key);
        if removed.is_some() {
            self.persist(&inner);
        }
        removed
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.records.clear();
        self.persist(&inner);
    }

    fn persist(&self, inner: &Inner) {
        let Some(path) = &self.snapshot else {
            return;
        };
        let mut records: Vec<&IndexRecord> = inner.records.values().collect();
        records.sort_by_key(|r| r.repo_ref.cache_key());
        if let Err(e) = write_snapshot(path, &records) {
            tracing::warn!(path = %path.display(), "failed to persist index registry: {e}");
        }
    }
}

fn write_snapshot(path: &Path, records: &[&IndexRecord]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec_pretty(records)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(tmp, path)
}
