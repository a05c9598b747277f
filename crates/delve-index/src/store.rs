//! Code chunk storage with multi-vector weighted fusion search.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chunker::ChunkType;
use crate::error::{IndexError, Result};
use crate::vector_store::{
    BREADCRUMB_VECTOR, CONTENT_VECTOR, CollectionSpec, FieldValue, HnswParams, ScoredVectorPoint,
    TITLE_VECTOR, VECTOR_NAMES, VectorFilter, VectorPoint, VectorStore, VectorStoreError,
};

/// Namespace for chunk point ids.
const POINT_NAMESPACE: uuid::Uuid = uuid::Uuid::from_u128(0x5d1c_7a2e_93b4_4f0e_a6c8_1e2b_3f4d_5a6b);

/// Stable point id for the `chunk_index`-th chunk of a file.
#[must_use]
pub fn point_id(file_path: &str, chunk_index: usize) -> String {
    uuid::Uuid::new_v5(
        &POINT_NAMESPACE,
        format!("{file_path}#{chunk_index}").as_bytes(),
    )
    .to_string()
}

/// Per-vector weights for fusion. Absent vectors contribute nothing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    pub content: f32,
    pub title: f32,
    pub breadcrumb: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            content: 0.7,
            title: 0.2,
            breadcrumb: 0.1,
        }
    }
}

impl FusionWeights {
    #[must_use]
    pub fn weight(&self, vector_name: &str) -> f32 {
        match vector_name {
            CONTENT_VECTOR => self.content,
            TITLE_VECTOR => self.title,
            BREADCRUMB_VECTOR => self.breadcrumb,
            _ => 0.0,
        }
    }

    /// # Errors
    ///
    /// Returns an error if any weight is negative or non-finite, or all are zero.
    pub fn validate(&self) -> Result<()> {
        let all = [self.content, self.title, self.breadcrumb];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(IndexError::InvalidWeights(format!(
                "weights must be finite and non-negative: {self:?}"
            )));
        }
        if all.iter().all(|w| *w == 0.0) {
            return Err(IndexError::InvalidWeights("all weights are zero".into()));
        }
        Ok(())
    }
}

/// Query vectors for any subset of the named vectors.
#[derive(Debug, Clone, Default)]
pub struct QueryVectors {
    pub content: Option<Vec<f32>>,
    pub title: Option<Vec<f32>>,
    pub breadcrumb: Option<Vec<f32>>,
}

impl QueryVectors {
    /// The same query embedding against every named vector.
    #[must_use]
    pub fn all(embedding: Vec<f32>) -> Self {
        Self {
            content: Some(embedding.clone()),
            title: Some(embedding.clone()),
            breadcrumb: Some(embedding),
        }
    }

    #[must_use]
    pub fn content_only(embedding: Vec<f32>) -> Self {
        Self {
            content: Some(embedding),
            ..Self::default()
        }
    }

    fn named(&self) -> Vec<(&'static str, &Vec<f32>)> {
        [
            (CONTENT_VECTOR, self.content.as_ref()),
            (TITLE_VECTOR, self.title.as_ref()),
            (BREADCRUMB_VECTOR, self.breadcrumb.as_ref()),
        ]
        .into_iter()
        .filter_map(|(name, v)| v.map(|v| (name, v)))
        .collect()
    }
}

/// Payload pre-filters.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub workspace_id: Option<String>,
    pub language: Option<String>,
    pub file_path: Option<String>,
}

impl SearchFilters {
    fn to_vector_filter(&self) -> VectorFilter {
        let mut filter = VectorFilter::default();
        for (field, value) in [
            ("workspace_id", &self.workspace_id),
            ("language", &self.language),
            ("file_path", &self.file_path),
        ] {
            if let Some(value) = value {
                filter = filter.must(field, FieldValue::Text(value.clone()));
            }
        }
        filter
    }
}

/// Payload stored with every point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub workspace_id: String,
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_symbol: Option<String>,
    pub language: String,
    pub chunk_type: ChunkType,
    pub chunk_index: usize,
    pub start_line: usize,
    pub end_line: usize,
    pub complexity: f32,
    pub content: String,
    pub context_snippet: String,
}

/// A chunk ready for storage.
#[derive(Debug, Clone)]
pub struct IndexedPoint {
    pub id: String,
    pub content_vec: Vec<f32>,
    pub title_vec: Vec<f32>,
    pub breadcrumb_vec: Vec<f32>,
    pub payload: ChunkPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub score: f32,
    pub workspace_id: String,
    pub file_path: String,
    pub function_name: Option<String>,
    pub parent_symbol: Option<String>,
    pub language: String,
    pub chunk_type: ChunkType,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
    pub context_snippet: String,
}

impl SearchResult {
    fn from_point(point: ScoredVectorPoint, score: f32) -> Result<Self> {
        let payload: ChunkPayload =
            serde_json::from_value(serde_json::Value::Object(point.payload.into_iter().collect()))
                .map_err(|e| VectorStoreError::Serialization(e.to_string()))?;
        Ok(Self {
            id: point.id,
            score,
            workspace_id: payload.workspace_id,
            file_path: payload.file_path,
            function_name: payload.function_name,
            parent_symbol: payload.parent_symbol,
            language: payload.language,
            chunk_type: payload.chunk_type,
            start_line: payload.start_line,
            end_line: payload.end_line,
            content: payload.content,
            context_snippet: payload.context_snippet,
        })
    }
}

/// Candidate lists merged into one ranking.
///
/// `fused = Σ weight(v) × score(v)` over the lists that returned the id;
/// ties keep the order in which ids were first seen, scanning lists in
/// fusion order and each list best first.
#[must_use]
pub fn fuse(
    lists: Vec<(&str, Vec<ScoredVectorPoint>)>,
    weights: &FusionWeights,
    top_k: usize,
) -> Vec<(ScoredVectorPoint, f32)> {
    let mut order: Vec<String> = Vec::new();
    let mut fused: HashMap<String, (ScoredVectorPoint, f32)> = HashMap::new();

    for (name, points) in lists {
        let weight = weights.weight(name);
        for point in points {
            let contribution = weight * point.score;
            if let Some((_, score)) = fused.get_mut(&point.id) {
                *score += contribution;
            } else {
                order.push(point.id.clone());
                fused.insert(point.id.clone(), (point, contribution));
            }
        }
    }

    let mut ranked: Vec<(ScoredVectorPoint, f32)> = order
        .into_iter()
        .filter_map(|id| fused.remove(&id))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.truncate(top_k);
    ranked
}

/// Per-workspace chunk collections over a [`VectorStore`] backend.
#[derive(Clone)]
pub struct CodeStore {
    backend: Arc<dyn VectorStore>,
    dimensions: usize,
    hnsw: HnswParams,
}

impl std::fmt::Debug for CodeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeStore")
            .field("dimensions", &self.dimensions)
            .field("hnsw", &self.hnsw)
            .finish_non_exhaustive()
    }
}

impl CodeStore {
    #[must_use]
    pub fn new(backend: Arc<dyn VectorStore>, dimensions: usize, hnsw: HnswParams) -> Self {
        Self {
            backend,
            dimensions,
            hnsw,
        }
    }

    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Create the collection with all three named vectors. Safe to call on
    /// an existing collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn create_collection(&self, collection: &str) -> Result<()> {
        let spec = CollectionSpec {
            vector_names: VECTOR_NAMES.iter().map(|n| (*n).to_owned()).collect(),
            dimensions: self.dimensions as u64,
            hnsw: self.hnsw,
        };
        if self.backend.ensure_collection(collection, &spec).await? {
            debug!(collection, "collection created");
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn collection_exists(&self, collection: &str) -> Result<bool> {
        Ok(self.backend.collection_exists(collection).await?)
    }

    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn delete_collection(&self, collection: &str) -> Result<()> {
        Ok(self.backend.delete_collection(collection).await?)
    }

    /// Insert or replace points. Returns the number written.
    ///
    /// # Errors
    ///
    /// Returns an error if a vector has the wrong dimension or the backend
    /// rejects the write.
    pub async fn upsert(&self, collection: &str, points: Vec<IndexedPoint>) -> Result<usize> {
        if points.is_empty() {
            return Ok(0);
        }
        let mut vector_points = Vec::with_capacity(points.len());
        for point in points {
            for (name, vector) in [
                (CONTENT_VECTOR, &point.content_vec),
                (TITLE_VECTOR, &point.title_vec),
                (BREADCRUMB_VECTOR, &point.breadcrumb_vec),
            ] {
                if vector.len() != self.dimensions {
                    return Err(VectorStoreError::Dimension {
                        name: name.to_owned(),
                        expected: self.dimensions as u64,
                        actual: vector.len() as u64,
                    }
                    .into());
                }
            }
            let payload = match serde_json::to_value(&point.payload)? {
                serde_json::Value::Object(map) => map.into_iter().collect(),
                _ => HashMap::new(),
            };
            vector_points.push(VectorPoint {
                id: point.id,
                vectors: HashMap::from([
                    (CONTENT_VECTOR.to_owned(), point.content_vec),
                    (TITLE_VECTOR.to_owned(), point.title_vec),
                    (BREADCRUMB_VECTOR.to_owned(), point.breadcrumb_vec),
                ]),
                payload,
            });
        }
        Ok(self.backend.upsert(collection, vector_points).await?)
    }

    /// Fusion search: each supplied named vector is searched for `top_k`
    /// neighbours under the same pre-filter, then the lists are fused.
    ///
    /// # Errors
    ///
    /// Returns an error if weights are invalid or any per-vector search fails.
    pub async fn search(
        &self,
        collection: &str,
        query: &QueryVectors,
        top_k: usize,
        filters: Option<&SearchFilters>,
        weights: Option<&FusionWeights>,
    ) -> Result<Vec<SearchResult>> {
        let weights = weights.copied().unwrap_or_default();
        weights.validate()?;
        let named = query.named();
        if named.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let filter = filters.map(SearchFilters::to_vector_filter);
        let searches = named.iter().map(|(name, vector)| {
            let filter = filter.clone();
            async move {
                self.backend
                    .search(collection, name, (*vector).clone(), top_k as u64, filter)
                    .await
                    .map(|points| (*name, points))
            }
        });
        let lists = futures::future::try_join_all(searches).await?;

        let fused = fuse(lists, &weights, top_k);
        debug!(collection, results = fused.len(), "fusion search");
        fused
            .into_iter()
            .map(|(point, score)| SearchResult::from_point(point, score))
            .collect()
    }

    /// Chunks whose `function_name` equals `symbol` exactly, unscored.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn find_by_symbol(
        &self,
        collection: &str,
        symbol: &str,
        filters: Option<&SearchFilters>,
        limit: u32,
    ) -> Result<Vec<SearchResult>> {
        let filter = filters
            .map(SearchFilters::to_vector_filter)
            .unwrap_or_default()
            .must("function_name", FieldValue::Text(symbol.to_owned()));
        self.backend
            .scroll(collection, filter, limit)
            .await?
            .into_iter()
            .map(|point| SearchResult::from_point(point, 0.0))
            .collect()
    }

    /// Remove every point of a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn delete_file(&self, collection: &str, file_path: &str) -> Result<()> {
        let filter =
            VectorFilter::default().must("file_path", FieldValue::Text(file_path.to_owned()));
        Ok(self.backend.delete_by_filter(collection, filter).await?)
    }

    /// Remove a file's points at `chunk_index >= keep`, left over after the
    /// file shrank.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn delete_stale(&self, collection: &str, file_path: &str, keep: usize) -> Result<()> {
        let filter = VectorFilter::default()
            .must("file_path", FieldValue::Text(file_path.to_owned()))
            .must(
                "chunk_index",
                FieldValue::AtLeast(i64::try_from(keep).unwrap_or(i64::MAX)),
            );
        Ok(self.backend.delete_by_filter(collection, filter).await?)
    }

    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn count(&self, collection: &str) -> Result<u64> {
        Ok(self.backend.count(collection).await?)
    }
}
