//! Provider abstractions for embeddings, context generation, and reranking.
//!
//! Each external model service is consumed through one fixed capability
//! trait. Callers stay generic over the trait and never see the wire format.

pub mod error;
pub mod http;
#[cfg(feature = "mock")]
pub mod mock;
pub mod openai;
pub mod provider;
pub(crate) mod retry;
pub mod voyage;

pub use error::LlmError;
pub use provider::{
    Completion, CompletionProvider, EmbeddingBatch, EmbeddingProvider, InputType, Message,
    Provider, RerankBatch, RerankProvider, RerankScore, Role,
};
