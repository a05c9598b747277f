//! Exact-search [`VectorStore`] held in process memory, for tests and
//! small workspaces.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::vector_store::{
    BoxFuture, CollectionSpec, FieldValue, ScoredVectorPoint, VectorFilter, VectorPoint,
    VectorStore, VectorStoreError,
};

struct StoredPoint {
    vectors: HashMap<String, Vec<f32>>,
    payload: HashMap<String, serde_json::Value>,
}

struct InMemoryCollection {
    spec: CollectionSpec,
    points: BTreeMap<String, StoredPoint>,
}

#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, InMemoryCollection>>,
}

impl InMemoryVectorStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, InMemoryCollection>> {
        self.collections
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, InMemoryCollection>> {
        self.collections
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for InMemoryVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryVectorStore")
            .field("collections", &self.read().len())
            .finish()
    }
}

/// Inner product; embeddings are normalized so this is cosine similarity.
fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn matches_filter(payload: &HashMap<String, serde_json::Value>, filter: &VectorFilter) -> bool {
    filter.must.iter().all(|cond| {
        payload
            .get(&cond.field)
            .is_some_and(|val| field_matches(val, &cond.value))
    })
}

fn field_matches(val: &serde_json::Value, expected: &FieldValue) -> bool {
    match expected {
        FieldValue::Text(s) => val.as_str() == Some(s.as_str()),
        FieldValue::AtLeast(bound) => val.as_i64().is_some_and(|v| v >= *bound),
    }
}

fn missing(collection: &str) -> String {
    format!("collection {collection} not found")
}

impl VectorStore for InMemoryVectorStore {
    fn ensure_collection(
        &self,
        collection: &str,
        spec: &CollectionSpec,
    ) -> BoxFuture<'_, Result<bool, VectorStoreError>> {
        let collection = collection.to_owned();
        let spec = spec.clone();
        Box::pin(async move {
            let mut cols = self.write();
            if cols.contains_key(&collection) {
                return Ok(false);
            }
            cols.insert(
                collection,
                InMemoryCollection {
                    spec,
                    points: BTreeMap::new(),
                },
            );
            Ok(true)
        })
    }

    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move { Ok(self.read().contains_key(&collection)) })
    }

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            self.write().remove(&collection);
            Ok(())
        })
    }

    fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> BoxFuture<'_, Result<usize, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self.write();
            let col = cols
                .get_mut(&collection)
                .ok_or_else(|| VectorStoreError::Upsert(missing(&collection)))?;

            for p in &points {
                for (name, vector) in &p.vectors {
                    if !col.spec.vector_names.contains(name) {
                        return Err(VectorStoreError::Upsert(format!(
                            "unknown vector name `{name}`"
                        )));
                    }
                    if vector.len() as u64 != col.spec.dimensions {
                        return Err(VectorStoreError::Dimension {
                            name: name.clone(),
                            expected: col.spec.dimensions,
                            actual: vector.len() as u64,
                        });
                    }
                }
            }

            let count = points.len();
            for p in points {
                col.points.insert(
                    p.id,
                    StoredPoint {
                        vectors: p.vectors,
                        payload: p.payload,
                    },
                );
            }
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
            let cols = self.read();
            let col = cols
                .get(&collection)
                .ok_or_else(|| VectorStoreError::Search(missing(&collection)))?;
            if vector.len() as u64 != col.spec.dimensions {
                return Err(VectorStoreError::Dimension {
                    name: vector_name,
                    expected: col.spec.dimensions,
                    actual: vector.len() as u64,
                });
            }

            let filter = filter.unwrap_or_default();
            let mut scored: Vec<ScoredVectorPoint> = col
                .points
                .iter()
                .filter(|(_, sp)| matches_filter(&sp.payload, &filter))
                .filter_map(|(id, sp)| {
                    let stored = sp.vectors.get(&vector_name)?;
                    Some(ScoredVectorPoint {
                        id: id.clone(),
                        score: dot(&vector, stored),
                        payload: sp.payload.clone(),
                    })
                })
                .collect();

            scored.sort_by(|a, b| b.score.total_cmp(&a.score));
            scored.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
            Ok(scored)
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
            let cols = self.read();
            let col = cols
                .get(&collection)
                .ok_or_else(|| VectorStoreError::Scroll(missing(&collection)))?;
            Ok(col
                .points
                .iter()
                .filter(|(_, sp)| matches_filter(&sp.payload, &filter))
                .take(limit as usize)
                .map(|(id, sp)| ScoredVectorPoint {
                    id: id.clone(),
                    score: 0.0,
                    payload: sp.payload.clone(),
                })
                .collect())
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
            let mut cols = self.write();
            let col = cols
                .get_mut(&collection)
                .ok_or_else(|| VectorStoreError::Delete(missing(&collection)))?;
            col.points
                .retain(|_, sp| !matches_filter(&sp.payload, &filter));
            Ok(())
        })
    }

    fn count(&self, collection: &str) -> BoxFuture<'_, Result<u64, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self.read();
            let col = cols
                .get(&collection)
                .ok_or_else(|| VectorStoreError::Collection(missing(&collection)))?;
            Ok(col.points.len() as u64)
        })
    }
}
