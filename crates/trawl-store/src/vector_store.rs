use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("collection error: {0}")]
    Collection(String),
    #[error("upsert error: {0}")]
    Upsert(String),
    #[error("search error: {0}")]
    Search(String),
    #[error("delete error: {0}")]
    Delete(String),
    #[error("scroll error: {0}")]
    Scroll(String),
    #[error("vector dimension mismatch: index holds {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Metadata = HashMap<String, serde_json::Value>;

/// One stored entry: an embedded chunk of text plus the metadata used for filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: Metadata,
}

impl VectorRecord {
    #[must_use]
    pub fn new(id: impl Into<String>, vector: Vec<f32>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            vector,
            text: text.into(),
            metadata: Metadata::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_owned(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Bool(bool),
    Text(String),
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

/// A single condition over one metadata field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum Predicate {
    /// Field is present and equal to `value`.
    Equals { field: String, value: FieldValue },
    /// Field is present and its textual form contains `needle`.
    Contains { field: String, needle: String },
}

impl Predicate {
    #[must_use]
    pub fn equals(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::Equals {
            field: field.into(),
            value: value.into(),
        }
    }

    #[must_use]
    pub fn contains(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Self::Contains {
            field: field.into(),
            needle: needle.into(),
        }
    }

    #[must_use]
    pub fn field(&self) -> &str {
        match self {
            Self::Equals { field, .. } | Self::Contains { field, .. } => field,
        }
    }

    #[must_use]
    pub fn matches(&self, metadata: &Metadata) -> bool {
        let Some(actual) = metadata.get(self.field()) else {
            return false;
        };
        match self {
            Self::Equals { value, .. } => match value {
                FieldValue::Integer(i) => actual.as_i64() == Some(*i),
                FieldValue::Bool(b) => actual.as_bool() == Some(*b),
                FieldValue::Text(s) => actual.as_str() == Some(s.as_str()),
            },
            Self::Contains { needle, .. } => match actual {
                serde_json::Value::String(s) => s.contains(needle.as_str()),
                other => other.to_string().contains(needle.as_str()),
            },
        }
    }
}

/// Conjunction of predicates. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub predicates: Vec<Predicate>,
}

impl MetadataFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn and(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    #[must_use]
    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.predicates.iter().all(|p| p.matches(metadata))
    }
}

impl From<Predicate> for MetadataFilter {
    fn from(predicate: Predicate) -> Self {
        Self {
            predicates: vec![predicate],
        }
    }
}

/// A ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub content: String,
    pub score: f32,
    pub metadata: Metadata,
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Storage and similarity search over `(id, vector, text, metadata)` records.
///
/// Writes are upserts keyed by id. `search` returns at most `top_k` hits ordered by cosine
/// similarity descending; records failing the filter are excluded before truncation.
pub trait VectorIndex: Send + Sync {
    fn backend(&self) -> &'static str;

    fn add(&self, record: VectorRecord) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        self.add_batch(vec![record])
    }

    fn add_batch(&self, records: Vec<VectorRecord>) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    fn search(
        &self,
        vector: Vec<f32>,
        top_k: usize,
        filter: Option<MetadataFilter>,
    ) -> BoxFuture<'_, Result<Vec<SearchHit>, VectorStoreError>>;

    fn delete(&self, ids: Vec<String>) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    /// Delete every record matching `filter`, returning how many were removed.
    fn delete_where(
        &self,
        filter: MetadataFilter,
    ) -> BoxFuture<'_, Result<usize, VectorStoreError>>;

    fn list_ids(
        &self,
        filter: Option<MetadataFilter>,
    ) -> BoxFuture<'_, Result<Vec<String>, VectorStoreError>>;

    fn count(&self) -> BoxFuture<'_, Result<usize, VectorStoreError>>;

    fn clear(&self) -> BoxFuture<'_, Result<(), VectorStoreError>>;
}
