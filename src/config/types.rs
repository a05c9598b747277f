use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub qdrant: QdrantConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub context: ContextSettings,
    #[serde(default)]
    pub rerank: RerankSettings,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(skip)]
    pub secrets: ResolvedSecrets,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QdrantConfig {
    pub url: String,
    pub timeout_secs: u64,
    pub hnsw_m: u64,
    pub hnsw_ef_construct: u64,
    /// Candidate list size at query time.
    pub hnsw_ef: u64,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6334".into(),
            timeout_secs: 30,
            hnsw_m: 16,
            hnsw_ef_construct: 200,
            hnsw_ef: 128,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    pub dimensions: usize,
    pub batch_size: usize,
    pub cache_ttl_secs: u64,
    pub cache_capacity: usize,
    pub price_per_million: f64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: delve_llm::voyage::DEFAULT_BASE_URL.into(),
            model: "voyage-code-3".into(),
            dimensions: 1024,
            batch_size: 128,
            cache_ttl_secs: 24 * 60 * 60,
            cache_capacity: 50_000,
            price_per_million: 0.18,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ContextSettings {
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub cache_ttl_secs: u64,
    pub cache_capacity: usize,
    pub input_price_per_million: f64,
    pub output_price_per_million: f64,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: delve_llm::openai::DEFAULT_BASE_URL.into(),
            model: "gpt-4o-mini".into(),
            max_tokens: 120,
            cache_ttl_secs: 7 * 24 * 60 * 60,
            cache_capacity: 20_000,
            input_price_per_million: 0.15,
            output_price_per_million: 0.60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RerankSettings {
    pub enabled: bool,
    pub model: String,
    pub top_n_display: usize,
    pub max_cache: usize,
    pub price_per_million: f64,
}

impl Default for RerankSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "rerank-2.5".into(),
            top_n_display: 10,
            max_cache: 40,
            price_per_million: 0.05,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IndexingConfig {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub max_files: Option<usize>,
    pub fallback_window_lines: usize,
    /// Relative paths resolve against the workspace root. Defaults to
    /// `<workspace>/.delve/snapshots`.
    pub snapshot_dir: Option<PathBuf>,
    pub watch_debounce_ms: u64,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: delve_index::sync::SyncConfig::default().exclude,
            max_files: None,
            fallback_window_lines: 50,
            snapshot_dir: None,
            watch_debounce_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SearchSettings {
    pub top_k: usize,
    pub content_weight: f32,
    pub title_weight: f32,
    pub breadcrumb_weight: f32,
    pub keyword_enabled: bool,
    pub keyword_boost: f32,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            top_k: 10,
            content_weight: 0.7,
            title_weight: 0.2,
            breadcrumb_weight: 0.1,
            keyword_enabled: true,
            keyword_boost: 0.15,
        }
    }
}

/// API keys, read from the environment only.
#[derive(Clone, Default)]
pub struct ResolvedSecrets {
    pub voyage_api_key: Option<String>,
    pub openai_api_key: Option<String>,
}

impl fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |key: &Option<String>| key.as_ref().map(|_| "<redacted>");
        f.debug_struct("ResolvedSecrets")
            .field("voyage_api_key", &redact(&self.voyage_api_key))
            .field("openai_api_key", &redact(&self.openai_api_key))
            .finish()
    }
}
