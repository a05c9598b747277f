//! Backend-neutral vector index interface with named vectors.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

pub const CONTENT_VECTOR: &str = "content_vec";
pub const TITLE_VECTOR: &str = "title_vec";
pub const BREADCRUMB_VECTOR: &str = "breadcrumb_vec";

/// Every named vector stored per point, in fusion order.
pub const VECTOR_NAMES: [&str; 3] = [CONTENT_VECTOR, TITLE_VECTOR, BREADCRUMB_VECTOR];

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
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("vector `{name}` has dimension {actual}, collection expects {expected}")]
    Dimension {
        name: String,
        expected: u64,
        actual: u64,
    },
}

/// Graph index parameters: `m` and `ef_construct` at build time, `ef` at
/// query time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HnswParams {
    pub m: u64,
    pub ef_construct: u64,
    pub ef_search: u64,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construct: 200,
            ef_search: 128,
        }
    }
}

/// Layout of a collection: one inner-product index per vector name.
#[derive(Debug, Clone)]
pub struct CollectionSpec {
    pub vector_names: Vec<String>,
    pub dimensions: u64,
    pub hnsw: HnswParams,
}

#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: String,
    pub vectors: HashMap<String, Vec<f32>>,
    pub payload: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    pub must: Vec<FieldCondition>,
}

impl VectorFilter {
    #[must_use]
    pub fn must(mut self, field: impl Into<String>, value: FieldValue) -> Self {
        self.must.push(FieldCondition {
            field: field.into(),
            value,
        });
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.must.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct FieldCondition {
    pub field: String,
    pub value: FieldValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    /// Integer field greater than or equal to the bound.
    AtLeast(i64),
}

#[derive(Debug, Clone)]
pub struct ScoredVectorPoint {
    pub id: String,
    pub score: f32,
    pub payload: HashMap<String, serde_json::Value>,
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait VectorStore: Send + Sync {
    /// Create the collection unless it exists. Returns `true` if created.
    fn ensure_collection(
        &self,
        collection: &str,
        spec: &CollectionSpec,
    ) -> BoxFuture<'_, Result<bool, VectorStoreError>>;

    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>>;

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    /// Insert or replace points by id. Returns the number written.
    fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> BoxFuture<'_, Result<usize, VectorStoreError>>;

    /// Nearest neighbours of `vector` in the `vector_name` index, drawn only
    /// from points matching `filter`, best first.
    fn search(
        &self,
        collection: &str,
        vector_name: &str,
        vector: Vec<f32>,
        limit: u64,
        filter: Option<VectorFilter>,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>>;

    /// Points matching `filter`, unscored.
    fn scroll(
        &self,
        collection: &str,
        filter: VectorFilter,
        limit: u32,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>>;

    fn delete_by_filter(
        &self,
        collection: &str,
        filter: VectorFilter,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    fn count(&self, collection: &str) -> BoxFuture<'_, Result<u64, VectorStoreError>>;
}
