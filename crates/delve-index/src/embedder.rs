//! Cached, cost-tracked embedding front end over an [`EmbeddingProvider`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use delve_llm::{EmbeddingProvider, InputType};
use tracing::debug;

use crate::cache::{TtlCache, digest};
use crate::cost::{CostSummary, CostTracker, TokenPricing};
use crate::error::EmbeddingError;

/// Identity of one embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingRequest {
    pub text: String,
    pub model: String,
    pub input_type: InputType,
}

impl EmbeddingRequest {
    #[must_use]
    pub fn new(text: impl Into<String>, model: impl Into<String>, input_type: InputType) -> Self {
        Self {
            text: text.into(),
            model: model.into(),
            input_type,
        }
    }

    /// Deterministic digest of `(text, model, input_type)`.
    #[must_use]
    pub fn cache_key(&self) -> String {
        key_for(&self.text, &self.model, self.input_type)
    }
}

fn key_for(text: &str, model: &str, input_type: InputType) -> String {
    digest(&[model, input_type.as_str(), text])
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingResponse {
    pub embedding: Vec<f32>,
    /// Tokens billed for this text; 0 when served from cache.
    pub tokens: u64,
    pub cached: bool,
    pub cost_usd: f64,
}

impl EmbeddingResponse {
    fn from_cache(embedding: Vec<f32>) -> Self {
        Self {
            embedding,
            tokens: 0,
            cached: true,
            cost_usd: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmbedderConfig {
    pub model: String,
    pub dimensions: usize,
    /// Upper bound on texts per provider request.
    pub max_batch_size: usize,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
    pub price_per_million: f64,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            model: "voyage-code-3".into(),
            dimensions: 1024,
            max_batch_size: 128,
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            cache_capacity: 50_000,
            price_per_million: 0.18,
        }
    }
}

pub struct Embedder<P> {
    provider: Arc<P>,
    config: EmbedderConfig,
    cache: Mutex<TtlCache<Vec<f32>>>,
    costs: CostTracker,
}

impl<P: EmbeddingProvider> Embedder<P> {
    #[must_use]
    pub fn new(provider: Arc<P>, config: EmbedderConfig) -> Self {
        Self {
            cache: Mutex::new(TtlCache::new(config.cache_capacity, config.cache_ttl)),
            costs: CostTracker::new(TokenPricing::flat(config.price_per_million)),
            provider,
            config,
        }
    }

    /// Model used by the indexing and search paths.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.config.model
    }

    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    /// Embed a single text.
    ///
    /// # Errors
    ///
    /// See [`Embedder::embed_batch`].
    pub async fn embed(
        &self,
        text: &str,
        model: &str,
        input_type: InputType,
    ) -> Result<EmbeddingResponse, EmbeddingError> {
        let mut responses = self
            .embed_batch(&[text.to_owned()], model, input_type)
            .await?;
        responses.pop().ok_or(EmbeddingError::CountMismatch {
            expected: 1,
            actual: 0,
        })
    }

    /// Embed `texts`, returning one response per input in input order.
    ///
    /// Cached texts and repeats within the batch cost nothing; the remaining
    /// unique texts are sent in requests of at most `max_batch_size`.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider fails or returns vectors of the wrong
    /// count or dimension. Vectors from requests that succeeded before the
    /// failure stay cached.
    pub async fn embed_batch(
        &self,
        texts: &[String],
        model: &str,
        input_type: InputType,
    ) -> Result<Vec<EmbeddingResponse>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = texts
            .iter()
            .map(|text| key_for(text, model, input_type))
            .collect();
        let mut slots: Vec<Option<EmbeddingResponse>> = vec![None; texts.len()];
        let mut first_seen: HashMap<&str, usize> = HashMap::new();
        let mut pending: Vec<usize> = Vec::new();

        {
            let mut cache = self.lock_cache();
            for (i, key) in keys.iter().enumerate() {
                if let Some(embedding) = cache.get(key) {
                    slots[i] = Some(EmbeddingResponse::from_cache(embedding));
                } else if !first_seen.contains_key(key.as_str()) {
                    first_seen.insert(key.as_str(), i);
                    pending.push(i);
                }
            }
        }

        let misses = pending.len() as u64;
        self.costs
            .record_lookups(texts.len() as u64 - misses, misses);
        debug!(
            total = texts.len(),
            uncached = pending.len(),
            "embedding batch"
        );

        let pricing = self.costs.pricing();
        for group in pending.chunks(self.config.max_batch_size.max(1)) {
            let batch_texts: Vec<String> = group.iter().map(|&i| texts[i].clone()).collect();
            let batch = self
                .provider
                .embed_batch(&batch_texts, model, input_type)
                .await?;

            if batch.embeddings.len() != group.len() {
                return Err(EmbeddingError::CountMismatch {
                    expected: group.len(),
                    actual: batch.embeddings.len(),
                });
            }
            if let Some(bad) = batch
                .embeddings
                .iter()
                .find(|e| e.len() != self.config.dimensions)
            {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.config.dimensions,
                    actual: bad.len(),
                });
            }

            self.costs.record_request(batch.total_tokens, 0);
            let shares = apportion(batch.total_tokens, &batch_texts);

            {
                let mut cache = self.lock_cache();
                for ((&i, embedding), tokens) in group.iter().zip(batch.embeddings).zip(shares) {
                    cache.insert(keys[i].clone(), embedding.clone());
                    slots[i] = Some(EmbeddingResponse {
                        embedding,
                        tokens,
                        cached: false,
                        cost_usd: pricing.cost(tokens, 0),
                    });
                }
            }
        }

        let mut responses: Vec<EmbeddingResponse> = Vec::with_capacity(texts.len());
        for (i, slot) in slots.into_iter().enumerate() {
            let response = match slot {
                Some(response) => response,
                None => {
                    let first = first_seen
                        .get(keys[i].as_str())
                        .and_then(|&first| responses.get(first))
                        .ok_or(EmbeddingError::CountMismatch {
                            expected: texts.len(),
                            actual: i,
                        })?;
                    EmbeddingResponse::from_cache(first.embedding.clone())
                }
            };
            responses.push(response);
        }
        Ok(responses)
    }

    /// Drop every cached vector. Cost totals are kept.
    pub fn clear_cache(&self) {
        self.lock_cache().clear();
    }

    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.lock_cache().len()
    }

    #[must_use]
    pub fn cost_summary(&self) -> CostSummary {
        self.costs.summary()
    }

    fn lock_cache(&self) -> MutexGuard<'_, TtlCache<Vec<f32>>> {
        self.cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Split a request's billed tokens across its texts by character length.
/// Shares always sum to `total`.
fn apportion(total: u64, texts: &[String]) -> Vec<u64> {
    let weights: Vec<u128> = texts
        .iter()
        .map(|t| t.chars().count().max(1) as u128)
        .collect();
    let sum: u128 = weights.iter().sum();
    let mut shares: Vec<u64> = weights
        .iter()
        .map(|w| u64::try_from(u128::from(total) * w / sum).unwrap_or(u64::MAX))
        .collect();
    let assigned: u64 = shares.iter().sum();
    if let Some(last) = shares.last_mut() {
        *last += total.saturating_sub(assigned);
    }
    shares
}
