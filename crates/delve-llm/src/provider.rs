use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Whether a text is embedded for storage or for lookup.
///
/// Retrieval models embed the two sides asymmetrically, so the input type is
/// part of every embedding request and of its cache identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Document,
    Query,
}

impl InputType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Query => "query",
        }
    }
}

impl fmt::Display for InputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Vectors for one batched embedding request, in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingBatch {
    pub embeddings: Vec<Vec<f32>>,
    /// Tokens billed for the whole batch.
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Relevance of the document at `index` in the submitted list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RerankScore {
    pub index: usize,
    pub relevance_score: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RerankBatch {
    pub scores: Vec<RerankScore>,
    pub total_tokens: u64,
}

pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;
}

pub trait EmbeddingProvider: Provider {
    /// Embed `texts` in one request. The result holds one vector per input,
    /// in input order.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider is unreachable, rejects the request,
    /// or returns fewer vectors than inputs.
    fn embed_batch(
        &self,
        texts: &[String],
        model: &str,
        input_type: InputType,
    ) -> impl Future<Output = Result<EmbeddingBatch, LlmError>> + Send;
}

pub trait CompletionProvider: Provider {
    /// Send a chat exchange and return the assistant text with token usage.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider fails or returns no choices.
    fn complete(
        &self,
        messages: &[Message],
        model: &str,
        max_tokens: u32,
    ) -> impl Future<Output = Result<Completion, LlmError>> + Send;
}

pub trait RerankProvider: Provider {
    /// Score every document against `query` in one request.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider is unreachable or rejects the request.
    fn rerank(
        &self,
        query: &str,
        documents: &[String],
        model: &str,
    ) -> impl Future<Output = Result<RerankBatch, LlmError>> + Send;
}
