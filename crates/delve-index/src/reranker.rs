//! Cross-encoder reranking with progressive disclosure.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use delve_llm::RerankProvider;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::{TtlCache, digest};
use crate::cost::{CostSummary, CostTracker, TokenPricing};
use crate::store::SearchResult;

#[derive(Debug, Clone)]
pub struct RerankerConfig {
    pub model: String,
    /// Results returned up front.
    pub top_n_display: usize,
    /// Results held back after the displayed ones.
    pub max_cache: usize,
    pub price_per_million: f64,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
    /// Document text beyond this many characters is not sent.
    pub max_document_chars: usize,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            model: "rerank-2.5".into(),
            top_n_display: 10,
            max_cache: 40,
            price_per_million: 0.05,
            cache_ttl: Duration::from_secs(60 * 60),
            cache_capacity: 2_000,
            max_document_chars: 8_000,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RerankResult {
    pub result: SearchResult,
    pub relevance_score: f32,
    /// Zero-based position before reranking.
    pub original_rank: usize,
    /// Zero-based position after reranking.
    pub new_rank: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RerankResponse {
    pub top_results: Vec<RerankResult>,
    pub cached_results: Vec<RerankResult>,
    /// Number of candidates submitted.
    pub total_results: usize,
    /// False when the original order was kept.
    pub reranked: bool,
    /// Scores came from the cache.
    pub cached: bool,
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub model: String,
}

impl RerankResponse {
    /// Move up to `n` held-back results into `top_results`, in rank order.
    /// Returns how many moved.
    pub fn reveal(&mut self, n: usize) -> usize {
        let n = n.min(self.cached_results.len());
        self.top_results.extend(self.cached_results.drain(..n));
        n
    }

    /// Every result, displayed ones first.
    pub fn iter(&self) -> impl Iterator<Item = &RerankResult> {
        self.top_results.iter().chain(&self.cached_results)
    }

    /// `results` in their original order, scored by fused similarity.
    #[must_use]
    pub fn original_order(results: Vec<SearchResult>, config: &RerankerConfig) -> Self {
        let total_results = results.len();
        let ranked = results
            .into_iter()
            .enumerate()
            .map(|(rank, result)| RerankResult {
                relevance_score: result.score,
                result,
                original_rank: rank,
                new_rank: rank,
            })
            .collect();
        Self::split(ranked, total_results, config)
    }

    fn split(mut ranked: Vec<RerankResult>, total_results: usize, config: &RerankerConfig) -> Self {
        ranked.truncate(config.top_n_display + config.max_cache);
        let cached_results = ranked.split_off(config.top_n_display.min(ranked.len()));
        Self {
            top_results: ranked,
            cached_results,
            total_results,
            model: config.model.clone(),
            ..Self::default()
        }
    }
}

pub struct Reranker<P> {
    provider: Arc<P>,
    config: RerankerConfig,
    cache: Mutex<TtlCache<Vec<Option<f32>>>>,
    costs: CostTracker,
}

impl<P: RerankProvider> Reranker<P> {
    #[must_use]
    pub fn new(provider: Arc<P>, config: RerankerConfig) -> Self {
        Self {
            cache: Mutex::new(TtlCache::new(config.cache_capacity, config.cache_ttl)),
            costs: CostTracker::new(TokenPricing::flat(config.price_per_million)),
            provider,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RerankerConfig {
        &self.config
    }

    /// Reorder `results` by relevance to `query`. Never fails: on provider
    /// error the original order is returned with `reranked == false`.
    pub async fn rerank(&self, query: &str, results: Vec<SearchResult>) -> RerankResponse {
        if results.is_empty() {
            return RerankResponse {
                model: self.config.model.clone(),
                ..RerankResponse::default()
            };
        }

        let documents: Vec<String> = results
            .iter()
            .map(|r| document_text(r, self.config.max_document_chars))
            .collect();
        let key = {
            let mut parts: Vec<&str> = vec![self.config.model.as_str(), query];
            parts.extend(documents.iter().map(String::as_str));
            digest(&parts)
        };

        let cached = self
            .lock_cache()
            .get(&key)
            .filter(|scores| scores.len() == results.len());
        let (scores, cached, tokens_used, cost_usd) = if let Some(scores) = cached {
            self.costs.record_lookups(1, 0);
            (scores, true, 0, 0.0)
        } else {
            self.costs.record_lookups(0, 1);
            match self
                .provider
                .rerank(query, &documents, &self.config.model)
                .await
            {
                Ok(batch) => {
                    let mut scores = vec![None; results.len()];
                    for score in batch.scores {
                        if let Some(slot) = scores.get_mut(score.index) {
                            *slot = Some(score.relevance_score);
                        }
                    }
                    let cost = self.costs.record_request(batch.total_tokens, 0);
                    self.lock_cache().insert(key, scores.clone());
                    (scores, false, batch.total_tokens, cost)
                }
                Err(e) => {
                    warn!("rerank failed, keeping original order: {e}");
                    return RerankResponse::original_order(results, &self.config);
                }
            }
        };

        let total_results = results.len();
        let mut order: Vec<(usize, Option<f32>, SearchResult)> = results
            .into_iter()
            .zip(scores)
            .enumerate()
            .map(|(rank, (result, score))| (rank, score, result))
            .collect();
        order.sort_by(|a, b| match (a.1, b.1) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        let ranked: Vec<RerankResult> = order
            .into_iter()
            .enumerate()
            .map(|(new_rank, (original_rank, score, result))| RerankResult {
                relevance_score: score.unwrap_or(0.0),
                result,
                original_rank,
                new_rank,
            })
            .collect();

        debug!(total_results, cached, tokens_used, "reranked");
        RerankResponse {
            reranked: true,
            cached,
            tokens_used,
            cost_usd,
            ..RerankResponse::split(ranked, total_results, &self.config)
        }
    }

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

    fn lock_cache(&self) -> MutexGuard<'_, TtlCache<Vec<Option<f32>>>> {
        self.cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Context snippet followed by the raw content, cut to `max_chars`.
fn document_text(result: &SearchResult, max_chars: usize) -> String {
    let text = if result.context_snippet.is_empty() {
        result.content.clone()
    } else {
        format!("{}\n\n{}", result.context_snippet, result.content)
    };
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => text[..cut].to_owned(),
        None => text,
    }
}
