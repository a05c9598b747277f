//! Qdrant backend for [`VectorStore`].

use std::collections::HashMap;
use std::time::Duration;

use qdrant_client::Qdrant;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder,
    DeletePointsBuilder, Distance, FieldType, Filter, HnswConfigDiffBuilder, PointId, PointStruct,
    Range, ScrollPointsBuilder, SearchParamsBuilder, SearchPointsBuilder, UpsertPointsBuilder,
    VectorParamsBuilder, VectorsConfigBuilder, point_id::PointIdOptions, value::Kind,
};
use tracing::debug;

use crate::vector_store::{
    BoxFuture, CollectionSpec, FieldCondition, FieldValue, ScoredVectorPoint, VectorFilter,
    VectorPoint, VectorStore, VectorStoreError,
};

type QdrantResult<T> = Result<T, Box<qdrant_client::QdrantError>>;

/// Payload fields indexed for filtering.
const PAYLOAD_INDEXES: [(&str, FieldType); 5] = [
    ("workspace_id", FieldType::Keyword),
    ("file_path", FieldType::Keyword),
    ("language", FieldType::Keyword),
    ("function_name", FieldType::Keyword),
    ("chunk_index", FieldType::Integer),
];

/// Thin wrapper over the [`Qdrant`] client. The client multiplexes requests
/// over a shared channel pool and is cheap to clone.
#[derive(Clone)]
pub struct QdrantOps {
    client: Qdrant,
    ef_search: Option<u64>,
}

impl std::fmt::Debug for QdrantOps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantOps")
            .field("ef_search", &self.ef_search)
            .finish_non_exhaustive()
    }
}

impl QdrantOps {
    /// Create a new `QdrantOps` connected to the given URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the Qdrant client cannot be created.
    pub fn new(url: &str, timeout: Duration) -> QdrantResult<Self> {
        let client = Qdrant::from_url(url)
            .timeout(timeout)
            .build()
            .map_err(Box::new)?;
        Ok(Self {
            client,
            ef_search: None,
        })
    }

    /// Search breadth used for every query.
    #[must_use]
    pub fn with_search_ef(mut self, ef: u64) -> Self {
        self.ef_search = Some(ef);
        self
    }

    /// Create a collection with one dot-product HNSW index per named vector,
    /// plus keyword indexes on the filterable payload fields.
    ///
    /// # Errors
    ///
    /// Returns an error if Qdrant cannot be reached or creation fails.
    pub async fn ensure_collection(
        &self,
        collection: &str,
        spec: &CollectionSpec,
    ) -> QdrantResult<bool> {
        if self
            .client
            .collection_exists(collection)
            .await
            .map_err(Box::new)?
        {
            return Ok(false);
        }

        let mut vectors = VectorsConfigBuilder::default();
        for name in &spec.vector_names {
            vectors.add_named_vector_params(
                name,
                VectorParamsBuilder::new(spec.dimensions, Distance::Dot).hnsw_config(
                    HnswConfigDiffBuilder::default()
                        .m(spec.hnsw.m)
                        .ef_construct(spec.hnsw.ef_construct),
                ),
            );
        }

        if let Err(e) = self
            .client
            .create_collection(CreateCollectionBuilder::new(collection).vectors_config(vectors))
            .await
        {
            // Another writer may have created it between the check and here.
            if self
                .client
                .collection_exists(collection)
                .await
                .unwrap_or(false)
            {
                return Ok(false);
            }
            return Err(Box::new(e));
        }

        for (field, field_type) in PAYLOAD_INDEXES {
            self.client
                .create_field_index(CreateFieldIndexCollectionBuilder::new(
                    collection, field, field_type,
                ))
                .await
                .map_err(Box::new)?;
        }
        debug!(collection, "created qdrant collection");
        Ok(true)
    }

    /// # Errors
    ///
    /// Returns an error if Qdrant cannot be reached.
    pub async fn collection_exists(&self, collection: &str) -> QdrantResult<bool> {
        self.client
            .collection_exists(collection)
            .await
            .map_err(Box::new)
    }

    /// # Errors
    ///
    /// Returns an error if the collection cannot be deleted.
    pub async fn delete_collection(&self, collection: &str) -> QdrantResult<()> {
        self.client
            .delete_collection(collection)
            .await
            .map_err(Box::new)?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the upsert fails.
    pub async fn upsert(&self, collection: &str, points: Vec<PointStruct>) -> QdrantResult<()> {
        if points.is_empty() {
            return Ok(());
        }
        self.client
            .upsert_points(UpsertPointsBuilder::new(collection, points).wait(true))
            .await
            .map_err(Box::new)?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the search fails.
    pub async fn search(
        &self,
        collection: &str,
        vector_name: &str,
        vector: Vec<f32>,
        limit: u64,
        filter: Option<Filter>,
    ) -> QdrantResult<Vec<ScoredVectorPoint>> {
        let mut builder = SearchPointsBuilder::new(collection, vector, limit)
            .vector_name(vector_name)
            .with_payload(true);
        if let Some(ef) = self.ef_search {
            builder = builder.params(SearchParamsBuilder::default().hnsw_ef(ef));
        }
        if let Some(f) = filter {
            builder = builder.filter(f);
        }
        let response = self.client.search_points(builder).await.map_err(Box::new)?;
        Ok(response
            .result
            .into_iter()
            .map(|point| ScoredVectorPoint {
                id: point_id_string(point.id),
                score: point.score,
                payload: payload_to_json(point.payload),
            })
            .collect())
    }

    /// # Errors
    ///
    /// Returns an error if the scroll fails.
    pub async fn scroll(
        &self,
        collection: &str,
        filter: Filter,
        limit: u32,
    ) -> QdrantResult<Vec<ScoredVectorPoint>> {
        let response = self
            .client
            .scroll(
                ScrollPointsBuilder::new(collection)
                    .filter(filter)
                    .limit(limit)
                    .with_payload(true)
                    .with_vectors(false),
            )
            .await
            .map_err(Box::new)?;
        Ok(response
            .result
            .into_iter()
            .map(|point| ScoredVectorPoint {
                id: point_id_string(point.id),
                score: 0.0,
                payload: payload_to_json(point.payload),
            })
            .collect())
    }

    /// # Errors
    ///
    /// Returns an error if the deletion fails.
    pub async fn delete_by_filter(&self, collection: &str, filter: Filter) -> QdrantResult<()> {
        self.client
            .delete_points(DeletePointsBuilder::new(collection).points(filter).wait(true))
            .await
            .map_err(Box::new)?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the count fails.
    pub async fn count(&self, collection: &str) -> QdrantResult<u64> {
        let response = self
            .client
            .count(CountPointsBuilder::new(collection).exact(true))
            .await
            .map_err(Box::new)?;
        Ok(response.result.map_or(0, |r| r.count))
    }

    /// Convert a JSON object to a Qdrant payload map.
    ///
    /// # Errors
    ///
    /// Returns a JSON error if the value is not an object of supported types.
    pub fn json_to_payload(
        value: serde_json::Value,
    ) -> Result<HashMap<String, qdrant_client::qdrant::Value>, serde_json::Error> {
        serde_json::from_value(value)
    }
}

impl VectorStore for QdrantOps {
    fn ensure_collection(
        &self,
        collection: &str,
        spec: &CollectionSpec,
    ) -> BoxFuture<'_, Result<bool, VectorStoreError>> {
        let collection = collection.to_owned();
        let spec = spec.clone();
        Box::pin(async move {
            self.ensure_collection(&collection, &spec)
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))
        })
    }

    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            self.collection_exists(&collection)
                .await
                .map_err(|e| VectorStoreError::Connection(e.to_string()))
        })
    }

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            self.delete_collection(&collection)
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))
        })
    }

    fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> BoxFuture<'_, Result<usize, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let count = points.len();
            let qdrant_points = points
                .into_iter()
                .map(|p| {
                    let payload = Self::json_to_payload(serde_json::Value::Object(
                        p.payload.into_iter().collect(),
                    ))
                    .map_err(|e| VectorStoreError::Serialization(e.to_string()))?;
                    Ok(PointStruct::new(p.id, p.vectors, payload))
                })
                .collect::<Result<Vec<_>, VectorStoreError>>()?;
            self.upsert(&collection, qdrant_points)
                .await
                .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;
            Ok(count)
        })
    }

    fn search(
        &self,
        collection: &str,
        vector_name: &str,
        vector: Vec<f32>,
        limit: u64,
        filter: Option<VectorFilter>,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>> {
        let collection = collection.to_owned();
        let vector_name = vector_name.to_owned();
        Box::pin(async move {
            let filter = filter.filter(|f| !f.is_empty()).map(vector_filter_to_qdrant);
            self.search(&collection, &vector_name, vector, limit, filter)
                .await
                .map_err(|e| VectorStoreError::Search(e.to_string()))
        })
    }

    fn scroll(
        &self,
        collection: &str,
        filter: VectorFilter,
        limit: u32,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            self.scroll(&collection, vector_filter_to_qdrant(filter), limit)
                .await
                .map_err(|e| VectorStoreError::Scroll(e.to_string()))
        })
    }

    fn delete_by_filter(
        &self,
        collection: &str,
        filter: VectorFilter,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            if filter.is_empty() {
                return Err(VectorStoreError::Delete(
                    "refusing to delete with an empty filter".into(),
                ));
            }
            self.delete_by_filter(&collection, vector_filter_to_qdrant(filter))
                .await
                .map_err(|e| VectorStoreError::Delete(e.to_string()))
        })
    }

    fn count(&self, collection: &str) -> BoxFuture<'_, Result<u64, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            self.count(&collection)
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))
        })
    }
}

fn vector_filter_to_qdrant(filter: VectorFilter) -> Filter {
    Filter::must(filter.must.into_iter().map(field_condition_to_qdrant))
}

#[allow(clippy::cast_precision_loss)]
fn field_condition_to_qdrant(cond: FieldCondition) -> Condition {
    match cond.value {
        FieldValue::Text(v) => Condition::matches(cond.field, v),
        FieldValue::AtLeast(v) => Condition::range(
            cond.field,
            Range {
                gte: Some(v as f64),
                ..Range::default()
            },
        ),
    }
}

fn point_id_string(id: Option<PointId>) -> String {
    match id.and_then(|pid| pid.point_id_options) {
        Some(PointIdOptions::Uuid(u)) => u,
        Some(PointIdOptions::Num(n)) => n.to_string(),
        None => String::new(),
    }
}

fn payload_to_json(
    payload: HashMap<String, qdrant_client::qdrant::Value>,
) -> HashMap<String, serde_json::Value> {
    payload
        .into_iter()
        .map(|(k, v)| (k, value_to_json(v)))
        .collect()
}

fn value_to_json(value: qdrant_client::qdrant::Value) -> serde_json::Value {
    match value.kind {
        Some(Kind::StringValue(s)) => serde_json::Value::String(s),
        Some(Kind::IntegerValue(i)) => serde_json::Value::Number(i.into()),
        Some(Kind::DoubleValue(d)) => serde_json::Number::from_f64(d)
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        Some(Kind::BoolValue(b)) => serde_json::Value::Bool(b),
        Some(Kind::ListValue(list)) => {
            serde_json::Value::Array(list.values.into_iter().map(value_to_json).collect())
        }
        Some(Kind::StructValue(s)) => serde_json::Value::Object(
            s.fields
                .into_iter()
                .map(|(k, v)| (k, value_to_json(v)))
                .collect(),
        ),
        Some(Kind::NullValue(_)) | None => serde_json::Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_valid_url() {
        let ops = QdrantOps::new("http://localhost:6334", Duration::from_secs(5));
        assert!(ops.is_ok());
    }

    #[test]
    fn debug_format() {
        let ops = QdrantOps::new("http://localhost:6334", Duration::from_secs(5))
            .unwrap()
            .with_search_ef(64);
        let dbg = format!("{ops:?}");
        assert!(dbg.contains("QdrantOps"));
        assert!(dbg.contains("64"));
    }

    #[test]
    fn payload_round_trips_through_qdrant_values() {
        let value = serde_json::json!({
            "file_path": "src/lib.rs",
            "chunk_index": 3,
            "complexity": 0.5,
            "tags": ["a", "b"],
        });
        let payload = QdrantOps::json_to_payload(value.clone()).unwrap();
        let back = payload_to_json(payload);
        assert_eq!(back["file_path"], value["file_path"]);
        assert_eq!(back["chunk_index"], value["chunk_index"]);
        assert_eq!(back["complexity"], value["complexity"]);
        assert_eq!(back["tags"], value["tags"]);
    }

    #[test]
    fn filter_conversion_keeps_clauses() {
        let filter = VectorFilter::default()
            .must("workspace_id", FieldValue::Text("abc".into()))
            .must("chunk_index", FieldValue::AtLeast(2));
        let qdrant = vector_filter_to_qdrant(filter);
        assert_eq!(qdrant.must.len(), 2);
        assert!(qdrant.must_not.is_empty());
    }

    #[test]
    fn uuid_point_id_is_stringified() {
        let id = PointId::from("0b3c8e5e-8c5e-5b1e-9d7f-2f4b8f9a1c00".to_owned());
        assert_eq!(
            point_id_string(Some(id)),
            "0b3c8e5e-8c5e-5b1e-9d7f-2f4b8f9a1c00"
        );
        assert_eq!(point_id_string(None), "");
    }
}
