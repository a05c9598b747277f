//! Voyage AI embeddings and reranking over HTTP.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::http::{default_client, truncate_body};
use crate::provider::{
    EmbeddingBatch, EmbeddingProvider, InputType, Provider, RerankBatch, RerankProvider,
    RerankScore,
};
use crate::retry::send_with_retry;

pub const DEFAULT_BASE_URL: &str = "https://api.voyageai.com/v1";
const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Clone)]
pub struct VoyageProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    max_retries: u32,
    output_dimension: Option<u32>,
}

impl fmt::Debug for VoyageProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoyageProvider")
            .field("client", &"<reqwest::Client>")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("max_retries", &self.max_retries)
            .field("output_dimension", &self.output_dimension)
            .finish()
    }
}

impl VoyageProvider {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(api_key: String, mut base_url: String) -> Result<Self, LlmError> {
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Ok(Self {
            client: default_client()?,
            api_key,
            base_url,
            max_retries: DEFAULT_MAX_RETRIES,
            output_dimension: None,
        })
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Request vectors of a specific dimension from models that support it.
    #[must_use]
    pub fn with_output_dimension(mut self, dimension: u32) -> Self {
        self.output_dimension = Some(dimension);
        self
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, LlmError>
    where
        B: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}/{path}", self.base_url);
        let response = send_with_retry("voyage", self.max_retries, || {
            self.client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
        })
        .await?;

        let status = response.status();
        let text = response.text().await.map_err(LlmError::Http)?;

        if !status.is_success() {
            tracing::error!("Voyage API error {status} on {path}: {text}");
            return Err(LlmError::Api {
                provider: "voyage",
                status: status.as_u16(),
                message: truncate_body(&text),
            });
        }

        Ok(serde_json::from_str(&text)?)
    }
}

impl Provider for VoyageProvider {
    fn name(&self) -> &'static str {
        "voyage"
    }
}

impl EmbeddingProvider for VoyageProvider {
    async fn embed_batch(
        &self,
        texts: &[String],
        model: &str,
        input_type: InputType,
    ) -> Result<EmbeddingBatch, LlmError> {
        if texts.is_empty() {
            return Ok(EmbeddingBatch {
                embeddings: Vec::new(),
                total_tokens: 0,
            });
        }

        let body = EmbeddingRequest {
            input: texts,
            model,
            input_type: input_type.as_str(),
            output_dimension: self.output_dimension,
        };
        let resp: EmbeddingResponse = self.post_json("embeddings", &body).await?;

        if resp.data.len() != texts.len() {
            return Err(LlmError::ShortResponse {
                provider: "voyage",
                expected: texts.len(),
                actual: resp.data.len(),
            });
        }

        let mut data = resp.data;
        data.sort_by_key(|d| d.index);

        Ok(EmbeddingBatch {
            embeddings: data.into_iter().map(|d| d.embedding).collect(),
            total_tokens: resp.usage.total_tokens,
        })
    }
}

impl RerankProvider for VoyageProvider {
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        model: &str,
    ) -> Result<RerankBatch, LlmError> {
        if documents.is_empty() {
            return Ok(RerankBatch {
                scores: Vec::new(),
                total_tokens: 0,
            });
        }

        let body = RerankRequest {
            query,
            documents,
            model,
            return_documents: false,
        };
        let resp: RerankResponse = self.post_json("rerank", &body).await?;

        if let Some(bad) = resp.data.iter().find(|d| d.index >= documents.len()) {
            return Err(LlmError::Other(format!(
                "voyage rerank returned out-of-range index {}",
                bad.index
            )));
        }

        Ok(RerankBatch {
            scores: resp
                .data
                .into_iter()
                .map(|d| RerankScore {
                    index: d.index,
                    relevance_score: d.relevance_score,
                })
                .collect(),
            total_tokens: resp.usage.total_tokens,
        })
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
    input_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_dimension: Option<u32>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    usage: Usage,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Deserialize)]
struct Usage {
    total_tokens: u64,
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    documents: &'a [String],
    model: &'a str,
    return_documents: bool,
}

#[derive(Deserialize)]
struct RerankResponse {
    data: Vec<RerankData>,
    usage: Usage,
}

#[derive(Deserialize)]
struct RerankData {
    index: usize,
    relevance_score: f32,
}
