//! Persistent backend on top of a Qdrant collection.
//!
//! Qdrant only accepts unsigned integers or UUIDs as point ids, so each record id is mapped to
//! a deterministic UUIDv5 and the original id is kept in the payload under [`ID_KEY`]. Search
//! uses HNSW and is therefore approximate. `Contains` predicates become Qdrant text matches,
//! which behave as exact substring matches on fields without a full-text index.

use std::collections::HashMap;

use qdrant_client::Qdrant;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter,
    PointId, PointStruct, PointsIdsList, ScrollPointsBuilder, SearchPointsBuilder,
    UpsertPointsBuilder, Value as QdrantValue, VectorParamsBuilder, value::Kind,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::vector_store::{
    BoxFuture, FieldValue, Metadata, MetadataFilter, Predicate, SearchHit, VectorIndex,
    VectorRecord, VectorStoreError,
};

/// Payload key holding the caller's record id.
pub const ID_KEY: &str = "chunk_id";
/// Payload key holding the record text.
pub const TEXT_KEY: &str = "content";

const POINT_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2d5e_8a34_4b7f_9c02_1e5d_a7b3_c4e8);
const SCROLL_PAGE: u32 = 256;

type QdrantResult<T> = Result<T, Box<qdrant_client::QdrantError>>;

pub struct QdrantVectorIndex {
    client: Qdrant,
    collection: String,
    /// Vector size of the collection once it is known to exist.
    dimension: Mutex<Option<u64>>,
}

impl std::fmt::Debug for QdrantVectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantVectorIndex")
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}

impl QdrantVectorIndex {
    /// Create an index backed by `collection` on the Qdrant server at `url`.
    ///
    /// The collection is created lazily on the first write, sized to that write's vectors.
    ///
    /// # Errors
    ///
    /// Returns an error if the Qdrant client cannot be created.
    pub fn new(url: &str, collection: impl Into<String>) -> Result<Self, VectorStoreError> {
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| VectorStoreError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            collection: collection.into(),
            dimension: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    async fn collection_exists(&self) -> QdrantResult<bool> {
        self.client
            .collection_exists(&self.collection)
            .await
            .map_err(Box::new)
    }

    /// Ensure the collection exists with cosine distance and `vector_size` dimensions.
    async fn ensure_collection(&self, vector_size: u64) -> Result<(), VectorStoreError> {
        let mut known = self.dimension.lock().await;
        if let Some(expected) = *known {
            return if expected == vector_size {
                Ok(())
            } else {
                Err(dimension_mismatch(expected, vector_size))
            };
        }

        let exists = self
            .collection_exists()
            .await
            .map_err(|e| VectorStoreError::Connection(e.to_string()))?;
        if exists {
            if let Some(expected) = self.remote_vector_size().await?
                && expected != vector_size
            {
                return Err(dimension_mismatch(expected, vector_size));
            }
        } else {
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.collection)
                        .vectors_config(VectorParamsBuilder::new(vector_size, Distance::Cosine)),
                )
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            tracing::info!(collection = %self.collection, vector_size, "created qdrant collection");
        }
        *known = Some(vector_size);
        Ok(())
    }

    async fn remote_vector_size(&self) -> Result<Option<u64>, VectorStoreError> {
        use qdrant_client::qdrant::vectors_config::Config;

        let info = self
            .client
            .collection_info(&self.collection)
            .await
            .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
        let size = info
            .result
            .and_then(|r| r.config)
            .and_then(|c| c.params)
            .and_then(|p| p.vectors_config)
            .and_then(|v| v.config)
            .and_then(|c| match c {
                Config::Params(params) => Some(params.size),
                Config::ParamsMap(_) => None,
            });
        Ok(size)
    }

    async fn scroll_ids(&self, filter: Option<Filter>) -> QdrantResult<Vec<String>> {
        let mut ids = Vec::new();
        let mut offset: Option<PointId> = None;

        loop {
            let mut builder = ScrollPointsBuilder::new(&self.collection)
                .with_payload(true)
                .with_vectors(false)
                .limit(SCROLL_PAGE);
            if let Some(ref f) = filter {
                builder = builder.filter(f.clone());
            }
            if let Some(ref off) = offset {
                builder = builder.offset(off.clone());
            }

            let response = self.client.scroll(builder).await.map_err(Box::new)?;
            for point in &response.result {
                if let Some(QdrantValue {
                    kind: Some(Kind::StringValue(id)),
                }) = point.payload.get(ID_KEY)
                {
                    ids.push(id.clone());
                }
            }

            match response.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        Ok(ids)
    }

    async fn count_matching(&self, filter: Option<Filter>) -> QdrantResult<usize> {
        let mut builder = CountPointsBuilder::new(&self.collection).exact(true);
        if let Some(f) = filter {
            builder = builder.filter(f);
        }
        let response = self.client.count(builder).await.map_err(Box::new)?;
        let count = response.result.map_or(0, |r| r.count);
        Ok(usize::try_from(count).unwrap_or(usize::MAX))
    }
}

fn dimension_mismatch(expected: u64, actual: u64) -> VectorStoreError {
    VectorStoreError::DimensionMismatch {
        expected: usize::try_from(expected).unwrap_or(usize::MAX),
        actual: usize::try_from(actual).unwrap_or(usize::MAX),
    }
}

/// Deterministic Qdrant point id for a record id.
#[must_use]
pub fn point_id(record_id: &str) -> String {
    Uuid::new_v5(&POINT_NAMESPACE, record_id.as_bytes()).to_string()
}

fn record_to_point(record: VectorRecord) -> Result<PointStruct, VectorStoreError> {
    let mut payload: serde_json::Map<String, serde_json::Value> =
        record.metadata.into_iter().collect();
    payload.insert(ID_KEY.into(), serde_json::Value::String(record.id.clone()));
    payload.insert(TEXT_KEY.into(), serde_json::Value::String(record.text));

    let payload: HashMap<String, QdrantValue> =
        serde_json::from_value(serde_json::Value::Object(payload))
            .map_err(|e| VectorStoreError::Serialization(e.to_string()))?;
    Ok(PointStruct::new(point_id(&record.id), record.vector, payload))
}

fn filter_to_qdrant(filter: &MetadataFilter) -> Filter {
    Filter::must(filter.predicates.iter().map(predicate_to_condition))
}

fn predicate_to_condition(predicate: &Predicate) -> Condition {
    match predicate {
        Predicate::Equals { field, value } => match value {
            FieldValue::Integer(v) => Condition::matches(field.clone(), *v),
            FieldValue::Bool(v) => Condition::matches(field.clone(), *v),
            FieldValue::Text(v) => Condition::matches(field.clone(), v.clone()),
        },
        Predicate::Contains { field, needle } => {
            Condition::matches_text(field.clone(), needle.clone())
        }
    }
}

fn qdrant_value_to_json(value: QdrantValue) -> Option<serde_json::Value> {
    let json = match value.kind? {
        Kind::StringValue(s) => serde_json::Value::String(s),
        Kind::IntegerValue(i) => serde_json::Value::Number(i.into()),
        Kind::DoubleValue(d) => serde_json::Number::from_f64(d).map(serde_json::Value::Number)?,
        Kind::BoolValue(b) => serde_json::Value::Bool(b),
        _ => return None,
    };
    Some(json)
}

fn payload_to_hit(payload: HashMap<String, QdrantValue>, score: f32) -> SearchHit {
    let mut metadata: Metadata = payload
        .into_iter()
        .filter_map(|(k, v)| Some((k, qdrant_value_to_json(v)?)))
        .collect();

    let mut take_string = |key: &str| match metadata.remove(key) {
        Some(serde_json::Value::String(s)) => s,
        _ => String::new(),
    };
    let chunk_id = take_string(ID_KEY);
    let content = take_string(TEXT_KEY);

    SearchHit {
        chunk_id,
        content,
        score,
        metadata,
    }
}

impl VectorIndex for QdrantVectorIndex {
    fn backend(&self) -> &'static str {
        "qdrant"
    }

    fn add_batch(&self, records: Vec<VectorRecord>) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        Box::pin(async move {
            let Some(first) = records.first() else {
                return Ok(());
            };
            let size = first.vector.len();
            if let Some(bad) = records.iter().find(|r| r.vector.len() != size) {
                return Err(VectorStoreError::DimensionMismatch {
                    expected: size,
                    actual: bad.vector.len(),
                });
            }
            self.ensure_collection(size as u64).await?;

            let points = records
                .into_iter()
                .map(record_to_point)
                .collect::<Result<Vec<_>, _>>()?;
            let count = points.len();
            self.client
                .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
                .await
                .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;
            tracing::debug!(collection = %self.collection, count, "upserted points");
            Ok(())
        })
    }

    fn search(
        &self,
        vector: Vec<f32>,
        top_k: usize,
        filter: Option<MetadataFilter>,
    ) -> BoxFuture<'_, Result<Vec<SearchHit>, VectorStoreError>> {
        Box::pin(async move {
            let exists = self
                .collection_exists()
                .await
                .map_err(|e| VectorStoreError::Search(e.to_string()))?;
            if !exists || top_k == 0 {
                return Ok(Vec::new());
            }

            let mut builder =
                SearchPointsBuilder::new(&self.collection, vector, top_k as u64).with_payload(true);
            if let Some(f) = filter.as_ref().filter(|f| !f.is_empty()) {
                builder = builder.filter(filter_to_qdrant(f));
            }
            let response = self
                .client
                .search_points(builder)
                .await
                .map_err(|e| VectorStoreError::Search(e.to_string()))?;

            Ok(response
                .result
                .into_iter()
                .map(|p| payload_to_hit(p.payload, p.score))
                .collect())
        })
    }

    fn delete(&self, ids: Vec<String>) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        Box::pin(async move {
            if ids.is_empty() {
                return Ok(());
            }
            let exists = self
                .collection_exists()
                .await
                .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
            if !exists {
                return Ok(());
            }
            let ids: Vec<PointId> = ids.iter().map(|id| PointId::from(point_id(id))).collect();
            self.client
                .delete_points(
                    DeletePointsBuilder::new(&self.collection)
                        .points(PointsIdsList { ids })
                        .wait(true),
                )
                .await
                .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
            Ok(())
        })
    }

    fn delete_where(
        &self,
        filter: MetadataFilter,
    ) -> BoxFuture<'_, Result<usize, VectorStoreError>> {
        Box::pin(async move {
            let exists = self
                .collection_exists()
                .await
                .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
            if !exists {
                return Ok(0);
            }
            let qdrant_filter = filter_to_qdrant(&filter);
            let matching = self
                .count_matching(Some(qdrant_filter.clone()))
                .await
                .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
            if matching == 0 {
                return Ok(0);
            }
            self.client
                .delete_points(
                    DeletePointsBuilder::new(&self.collection)
                        .points(qdrant_filter)
                        .wait(true),
                )
                .await
                .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
            Ok(matching)
        })
    }

    fn list_ids(
        &self,
        filter: Option<MetadataFilter>,
    ) -> BoxFuture<'_, Result<Vec<String>, VectorStoreError>> {
        Box::pin(async move {
            let exists = self
                .collection_exists()
                .await
                .map_err(|e| VectorStoreError::Scroll(e.to_string()))?;
            if !exists {
                return Ok(Vec::new());
            }
            let qdrant_filter = filter.as_ref().filter(|f| !f.is_empty()).map(filter_to_qdrant);
            self.scroll_ids(qdrant_filter)
                .await
                .map_err(|e| VectorStoreError::Scroll(e.to_string()))
        })
    }

    fn count(&self) -> BoxFuture<'_, Result<usize, VectorStoreError>> {
        Box::pin(async move {
            let exists = self
                .collection_exists()
                .await
                .map_err(|e| VectorStoreError::Connection(e.to_string()))?;
            if !exists {
                return Ok(0);
            }
            self.count_matching(None)
                .await
                .map_err(|e| VectorStoreError::Connection(e.to_string()))
        })
    }

    fn clear(&self) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        Box::pin(async move {
            let mut known = self.dimension.lock().await;
            let exists = self
                .collection_exists()
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            if exists {
                self.client
                    .delete_collection(&self.collection)
                    .await
                    .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
                tracing::info!(collection = %self.collection, "deleted qdrant collection");
            }
            *known = None;
            Ok(())
        })
    }
}
