//! Semantic code indexing and retrieval.
//!
//! Write path: files are chunked along syntax boundaries, each chunk gets a
//! short generated description, and three embeddings (content, title,
//! breadcrumb) are stored as named vectors in a per-workspace collection.
//! Read path: a query is embedded once, searched against every named vector,
//! fused by weighted sum, optionally boosted by exact symbol matches, and
//! reranked with progressive disclosure.

pub mod cache;
pub mod chunker;
pub mod context;
pub mod cost;
pub mod embedder;
pub mod error;
pub mod in_memory_store;
pub mod indexer;
pub mod languages;
pub mod qdrant_ops;
pub mod reranker;
pub mod search;
pub mod service;
pub mod store;
pub mod sync;
pub mod vector_store;
pub mod watcher;
pub mod workspace;

pub use error::{EmbeddingError, IndexError, Result, SyncError};
