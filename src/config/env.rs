use super::Config;

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_core();
        self.apply_env_overrides_secrets();
    }

    fn apply_env_overrides_core(&mut self) {
        if let Ok(v) = std::env::var("DELVE_QDRANT_URL") {
            self.qdrant.url = v;
        }
        if let Ok(v) = std::env::var("DELVE_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Ok(v) = std::env::var("DELVE_EMBEDDING_BASE_URL") {
            self.embedding.base_url = v;
        }
        if let Ok(v) = std::env::var("DELVE_EMBEDDING_DIMENSIONS") {
            match v.parse::<usize>() {
                Ok(dims) => self.embedding.dimensions = dims,
                Err(_) => tracing::warn!("ignoring invalid DELVE_EMBEDDING_DIMENSIONS value: {v}"),
            }
        }
        if let Ok(v) = std::env::var("DELVE_CONTEXT_MODEL") {
            self.context.model = v;
        }
        if let Ok(v) = std::env::var("DELVE_CONTEXT_BASE_URL") {
            self.context.base_url = v;
        }
        if let Ok(v) = std::env::var("DELVE_CONTEXT_ENABLED") {
            match v.parse::<bool>() {
                Ok(enabled) => self.context.enabled = enabled,
                Err(_) => tracing::warn!("ignoring invalid DELVE_CONTEXT_ENABLED value: {v}"),
            }
        }
        if let Ok(v) = std::env::var("DELVE_RERANK_ENABLED") {
            match v.parse::<bool>() {
                Ok(enabled) => self.rerank.enabled = enabled,
                Err(_) => tracing::warn!("ignoring invalid DELVE_RERANK_ENABLED value: {v}"),
            }
        }
        if let Ok(v) = std::env::var("DELVE_SEARCH_TOP_K") {
            match v.parse::<usize>() {
                Ok(top_k) => self.search.top_k = top_k,
                Err(_) => tracing::warn!("ignoring invalid DELVE_SEARCH_TOP_K value: {v}"),
            }
        }
        if let Ok(v) = std::env::var("DELVE_INDEX_MAX_FILES") {
            match v.parse::<usize>() {
                Ok(n) => self.indexing.max_files = Some(n),
                Err(_) => tracing::warn!("ignoring invalid DELVE_INDEX_MAX_FILES value: {v}"),
            }
        }
    }

    fn apply_env_overrides_secrets(&mut self) {
        if let Ok(v) = std::env::var("DELVE_VOYAGE_API_KEY")
            && !v.trim().is_empty()
        {
            self.secrets.voyage_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("DELVE_OPENAI_API_KEY")
            && !v.trim().is_empty()
        {
            self.secrets.openai_api_key = Some(v);
        }
    }
}
