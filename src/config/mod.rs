mod env;
mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use delve_index::chunker::ChunkerConfig;
use delve_index::context::ContextConfig;
use delve_index::embedder::EmbedderConfig;
use delve_index::indexer::IndexerConfig;
use delve_index::reranker::RerankerConfig;
use delve_index::search::SearchConfig;
use delve_index::service::ServiceConfig;
use delve_index::store::FusionWeights;
use delve_index::sync::SyncConfig;
use delve_index::vector_store::HnswParams;

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            tracing::debug!("config file {} not found, using defaults", path.display());
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.embedding.dimensions == 0 {
            bail!("embedding.dimensions must be greater than 0");
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be greater than 0");
        }
        if self.indexing.fallback_window_lines == 0 {
            bail!("indexing.fallback_window_lines must be greater than 0");
        }
        let s = &self.search;
        let weights = [s.content_weight, s.title_weight, s.breadcrumb_weight];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            bail!("search weights must be finite and non-negative");
        }
        if weights.iter().all(|w| *w == 0.0) {
            bail!("at least one search weight must be positive");
        }
        if !s.keyword_boost.is_finite() || s.keyword_boost < 0.0 {
            bail!("search.keyword_boost must be finite and non-negative");
        }
        if self.rerank.top_n_display == 0 {
            bail!("rerank.top_n_display must be greater than 0");
        }
        Ok(())
    }

    #[must_use]
    pub fn embedder_config(&self) -> EmbedderConfig {
        let e = &self.embedding;
        EmbedderConfig {
            model: e.model.clone(),
            dimensions: e.dimensions,
            max_batch_size: e.batch_size,
            cache_ttl: Duration::from_secs(e.cache_ttl_secs),
            cache_capacity: e.cache_capacity,
            price_per_million: e.price_per_million,
        }
    }

    #[must_use]
    pub fn context_config(&self) -> ContextConfig {
        let c = &self.context;
        ContextConfig {
            enabled: c.enabled,
            model: c.model.clone(),
            max_tokens: c.max_tokens,
            cache_ttl: Duration::from_secs(c.cache_ttl_secs),
            cache_capacity: c.cache_capacity,
            input_price_per_million: c.input_price_per_million,
            output_price_per_million: c.output_price_per_million,
            ..ContextConfig::default()
        }
    }

    #[must_use]
    pub fn reranker_config(&self) -> RerankerConfig {
        let r = &self.rerank;
        RerankerConfig {
            model: r.model.clone(),
            top_n_display: r.top_n_display,
            max_cache: r.max_cache,
            price_per_million: r.price_per_million,
            ..RerankerConfig::default()
        }
    }

    #[must_use]
    pub fn hnsw_params(&self) -> HnswParams {
        HnswParams {
            m: self.qdrant.hnsw_m,
            ef_construct: self.qdrant.hnsw_ef_construct,
            ef_search: self.qdrant.hnsw_ef,
        }
    }

    #[must_use]
    pub fn service_config(&self) -> ServiceConfig {
        let i = &self.indexing;
        let s = &self.search;
        ServiceConfig {
            indexer: IndexerConfig {
                sync: SyncConfig {
                    include: i.include.clone(),
                    exclude: i.exclude.clone(),
                    ..SyncConfig::default()
                },
                chunker: ChunkerConfig {
                    fallback_window_lines: i.fallback_window_lines,
                },
                max_files: i.max_files,
                snapshot_dir: i.snapshot_dir.clone(),
            },
            search: SearchConfig {
                top_k: s.top_k,
                weights: FusionWeights {
                    content: s.content_weight,
                    title: s.title_weight,
                    breadcrumb: s.breadcrumb_weight,
                },
                keyword_boost: s.keyword_boost,
                keyword_enabled: s.keyword_enabled,
            },
        }
    }
}
