//! Maps user-supplied repository references to local checkouts.
//!
//! Remote references are fetched with a shallow, single-branch clone into a directory derived
//! from the canonical URL and cached for a configurable TTL. Local directories are used in
//! place.

pub mod error;
pub mod fetch;
pub mod locks;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod reference;
pub mod resolver;

pub use error::{FetchError, RepoError, Result};
pub use fetch::{FetchRequest, Fetcher, GitFetcher};
pub use locks::{KeyGuard, KeyedLocks};
pub use reference::{RefKind, RefParser, RepoRef};
pub use resolver::{LocalRepo, RepositoryResolver, ResolverConfig};
