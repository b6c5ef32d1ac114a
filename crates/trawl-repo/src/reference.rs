use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{RepoError, Result};

pub const DEFAULT_HOST: &str = "github.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefKind {
    Remote,
    Local,
}

/// A parsed repository reference. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
    /// `https://host/owner/name` for remote references, a `file://` URL for local ones.
    pub canonical_url: String,
    pub branch: Option<String>,
    pub kind: RefKind,
}

impl RepoRef {
    /// Key used for the checkout cache, per-repository locks, and index bookkeeping.
    #[must_use]
    pub fn cache_key(&self) -> String {
        match self.kind {
            RefKind::Remote => format!("{}/{}", self.owner, self.name),
            RefKind::Local => format!("local:{}", self.canonical_url),
        }
    }

    #[must_use]
    pub fn is_local(&self) -> bool {
        self.kind == RefKind::Local
    }

    /// Filesystem path of a local reference.
    #[must_use]
    pub fn local_path(&self) -> Option<PathBuf> {
        if !self.is_local() {
            return None;
        }
        Url::parse(&self.canonical_url).ok()?.to_file_path().ok()
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical_url)?;
        if let Some(branch) = &self.branch {
            write!(f, "@{branch}")?;
        }
        Ok(())
    }
}

/// Parses raw references against an allow-list of remote hosts.
///
/// Accepted remote forms: `https://host/owner/name`, with an optional `.git` suffix or
/// `/tree/<branch>` tail, and `git@host:owner/name(.git)`. Anything without a scheme is
/// treated as a local path and must be an existing directory.
#[derive(Debug, Clone)]
pub struct RefParser {
    allowed_hosts: Vec<String>,
}

impl Default for RefParser {
    fn default() -> Self {
        Self::new(vec![DEFAULT_HOST.to_owned()])
    }
}

impl RefParser {
    #[must_use]
    pub fn new(allowed_hosts: Vec<String>) -> Self {
        Self {
            allowed_hosts: allowed_hosts
                .into_iter()
                .map(|h| h.trim().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Parse `raw` into a [`RepoRef`].
    ///
    /// Remote references are validated without any I/O. Local paths are checked for existence
    /// and canonicalised.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::InvalidReference`] for unsupported hosts or schemes, malformed
    /// paths, or local paths that are not existing directories.
    pub fn parse(&self, raw: &str) -> Result<RepoRef> {
        self.parse_with(raw, LocalCheck::RequireDir)
    }

    /// Parse `raw` to look up an existing index or checkout.
    ///
    /// Same as [`parse`](Self::parse) except that a local path which no longer exists still
    /// maps to the reference it had while it did.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::InvalidReference`] for unsupported hosts or schemes, malformed
    /// paths, or local paths that exist but are not directories.
    pub fn parse_for_lookup(&self, raw: &str) -> Result<RepoRef> {
        self.parse_with(raw, LocalCheck::AllowMissing)
    }

    fn parse_with(&self, raw: &str, check: LocalCheck) -> Result<RepoRef> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(RepoError::invalid(raw, "empty reference"));
        }
        if let Some(rest) = trimmed.strip_prefix("git@") {
            return self.parse_scp(raw, rest);
        }
        if trimmed.contains("://") {
            return self.parse_url(raw, trimmed, check);
        }
        parse_local(raw, Path::new(trimmed), check)
    }

    fn check_host(&self, raw: &str, host: &str) -> Result<String> {
        let host = host.to_ascii_lowercase();
        let host = host.strip_prefix("www.").unwrap_or(&host).to_owned();
        if self.allowed_hosts.iter().any(|h| *h == host) {
            Ok(host)
        } else {
            Err(RepoError::invalid(raw, format!("unsupported host {host}")))
        }
    }

    fn parse_url(&self, raw: &str, trimmed: &str, check: LocalCheck) -> Result<RepoRef> {
        let url = Url::parse(trimmed).map_err(|e| RepoError::invalid(raw, e.to_string()))?;
        match url.scheme() {
            "https" | "http" => {}
            "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|()| RepoError::invalid(raw, "malformed file URL"))?;
                return parse_local(raw, &path, check);
            }
            other => return Err(RepoError::invalid(raw, format!("unsupported scheme {other}"))),
        }
        let host = self.check_host(raw, url.host_str().unwrap_or_default())?;

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|p| !p.is_empty()).collect())
            .unwrap_or_default();

        let (owner, name, branch) = match segments.as_slice() {
            [owner, name] => (*owner, *name, None),
            [owner, name, "tree", branch @ ..] if !branch.is_empty() => {
                (*owner, *name, Some(branch.join("/")))
            }
            _ => return Err(RepoError::invalid(raw, "expected owner/name[/tree/branch]")),
        };
        remote_ref(raw, &host, owner, name, branch)
    }

    fn parse_scp(&self, raw: &str, rest: &str) -> Result<RepoRef> {
        let (host, path) = rest
            .split_once(':')
            .ok_or_else(|| RepoError::invalid(raw, "expected git@host:owner/name"))?;
        let host = self.check_host(raw, host)?;
        let segments: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        match segments.as_slice() {
            [owner, name] => remote_ref(raw, &host, owner, name, None),
            _ => Err(RepoError::invalid(raw, "expected owner/name")),
        }
    }
}

fn valid_component(component: &str) -> bool {
    !component.is_empty()
        && component != "."
        && component != ".."
        && component
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn remote_ref(
    raw: &str,
    host: &str,
    owner: &str,
    name: &str,
    branch: Option<String>,
) -> Result<RepoRef> {
    let name = name.strip_suffix(".git").unwrap_or(name);
    if !valid_component(owner) || !valid_component(name) {
        return Err(RepoError::invalid(raw, "invalid owner or repository name"));
    }
    if branch
        .as_deref()
        .is_some_and(|b| b.is_empty() || b.starts_with('-') || b.contains(".."))
    {
        return Err(RepoError::invalid(raw, "invalid branch name"));
    }
    Ok(RepoRef {
        owner: owner.to_owned(),
        name: name.to_owned(),
        canonical_url: format!("https://{host}/{owner}/{name}"),
        branch,
        kind: RefKind::Remote,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LocalCheck {
    RequireDir,
    AllowMissing,
}

fn parse_local(raw: &str, path: &Path, check: LocalCheck) -> Result<RepoRef> {
    let not_a_dir = || {
        RepoError::invalid(
            raw,
            "neither a supported remote URL nor an existing local directory",
        )
    };
    let absolute = match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => path.canonicalize()?,
        Err(e) if check == LocalCheck::AllowMissing && e.kind() == std::io::ErrorKind::NotFound => {
            canonicalize_missing(path)?
        }
        _ => return Err(not_a_dir()),
    };
    let url = Url::from_directory_path(&absolute)
        .map_err(|()| RepoError::invalid(raw, "path cannot be expressed as a URL"))?;
    let name = absolute
        .file_name()
        .map_or_else(|| "root".to_owned(), |n| n.to_string_lossy().into_owned());

    Ok(RepoRef {
        owner: "local".to_owned(),
        name,
        canonical_url: url.to_string().trim_end_matches('/').to_owned(),
        branch: None,
        kind: RefKind::Local,
    })
}

/// Canonicalise the deepest existing ancestor of `path` and re-append the rest, so a deleted
/// directory keeps the spelling it had while it existed.
fn canonicalize_missing(path: &Path) -> std::io::Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    let mut missing = Vec::new();
    let mut current = absolute.as_path();
    loop {
        if let Ok(base) = current.canonicalize() {
            return Ok(missing.iter().rev().fold(base, |acc, part| acc.join(part)));
        }
        match (current.parent(), current.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_owned());
                current = parent;
            }
            _ => return Ok(absolute),
        }
    }
}
