//! Error types for delve-index.

use std::path::PathBuf;

use crate::vector_store::VectorStoreError;

/// Embedding failures are kept distinct so callers can choose to retry a
/// file or fail a query instead of storing or returning fabricated vectors.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding provider failed: {0}")]
    Provider(#[from] delve_llm::LlmError),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("provider returned {actual} embeddings for {expected} inputs")]
    CountMismatch { expected: usize, actual: usize },
}

/// Errors from change detection and snapshot persistence.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid include/exclude pattern: {0}")]
    Pattern(#[from] ignore::Error),

    #[error("snapshot encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur during code indexing and search.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// IO error reading source files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error("vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),

    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// File watcher error.
    #[error("watcher error: {0}")]
    Watcher(#[from] notify::Error),

    /// A result from another workspace reached this workspace's query.
    #[error("workspace isolation violated: expected {expected}, found {found}")]
    IsolationViolation { expected: String, found: String },

    #[error("workspace not found: {}", .0.display())]
    WorkspaceNotFound(PathBuf),

    /// The workspace has no collection yet.
    #[error("workspace is not indexed: {}", .0.display())]
    NotIndexed(PathBuf),

    #[error("invalid fusion weights: {0}")]
    InvalidWeights(String),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;
