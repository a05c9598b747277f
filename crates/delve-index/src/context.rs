//! Chunk descriptions for embedding enrichment, and the embedding texts
//! built from them.
//!
//! Raw code alone retrieves poorly for conceptual queries. Each chunk gets a
//! one or two sentence description from a completion model, cached by
//! content, path and module. Provider failures fall back to a synthetic
//! description that still names the file.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use delve_llm::{CompletionProvider, Message};
use futures::StreamExt;
use tracing::{debug, warn};

use crate::cache::{TtlCache, digest};
use crate::chunker::{ChunkType, CodeChunk};
use crate::cost::{CostSummary, CostTracker, TokenPricing};

/// Identity of one context generation.
#[derive(Debug, Clone, Copy)]
pub struct ContextRequest<'a> {
    pub chunk: &'a CodeChunk,
    pub file_path: &'a str,
    pub module_name: Option<&'a str>,
}

impl ContextRequest<'_> {
    #[must_use]
    pub fn cache_key(&self) -> String {
        digest(&[
            &self.chunk.content,
            self.file_path,
            self.module_name.unwrap_or("\0"),
        ])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContextResponse {
    pub context: String,
    pub tokens: u64,
    pub cached: bool,
    pub cost_usd: f64,
    /// Synthetic description; the provider was unavailable or disabled.
    pub fallback: bool,
}

impl ContextResponse {
    fn cached(context: String) -> Self {
        Self {
            context,
            tokens: 0,
            cached: true,
            cost_usd: 0.0,
            fallback: false,
        }
    }

    fn fallback(request: &ContextRequest<'_>) -> Self {
        Self {
            context: fallback_context(request),
            tokens: 0,
            cached: false,
            cost_usd: 0.0,
            fallback: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub enabled: bool,
    pub model: String,
    pub max_tokens: u32,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
    pub input_price_per_million: f64,
    pub output_price_per_million: f64,
    /// Chunk content beyond this many characters is cut from the prompt.
    pub max_content_chars: usize,
    /// Concurrent provider calls per batch.
    pub max_concurrency: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "gpt-4o-mini".into(),
            max_tokens: 120,
            cache_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            cache_capacity: 20_000,
            input_price_per_million: 0.15,
            output_price_per_million: 0.60,
            max_content_chars: 6_000,
            max_concurrency: 8,
        }
    }
}

pub struct ContextGenerator<P> {
    provider: Arc<P>,
    config: ContextConfig,
    cache: Mutex<TtlCache<String>>,
    costs: CostTracker,
}

impl<P: CompletionProvider> ContextGenerator<P> {
    #[must_use]
    pub fn new(provider: Arc<P>, config: ContextConfig) -> Self {
        Self {
            cache: Mutex::new(TtlCache::new(config.cache_capacity, config.cache_ttl)),
            costs: CostTracker::new(TokenPricing {
                input_per_million: config.input_price_per_million,
                output_per_million: config.output_price_per_million,
            }),
            provider,
            config,
        }
    }

    /// Describe one chunk. Never fails; see [`ContextResponse::fallback`].
    pub async fn generate_context(
        &self,
        chunk: &CodeChunk,
        file_path: &str,
        module_name: Option<&str>,
    ) -> ContextResponse {
        let request = ContextRequest {
            chunk,
            file_path,
            module_name,
        };
        let key = request.cache_key();
        if let Some(context) = self.lock_cache().get(&key) {
            self.costs.record_lookups(1, 0);
            return ContextResponse::cached(context);
        }
        self.costs.record_lookups(0, 1);
        self.generate_uncached(request, key).await
    }

    /// Describe `chunks` in order. `file_paths` holds either one path per
    /// chunk or a single path shared by all of them. A chunk repeated in the
    /// batch is generated and billed once.
    pub async fn generate_contexts_batch(
        &self,
        chunks: &[CodeChunk],
        file_paths: &[&str],
        module_name: Option<&str>,
    ) -> Vec<ContextResponse> {
        let requests: Vec<ContextRequest<'_>> = chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| ContextRequest {
                chunk,
                file_path: file_paths
                    .get(i)
                    .or_else(|| file_paths.last())
                    .copied()
                    .unwrap_or_default(),
                module_name,
            })
            .collect();
        let keys: Vec<String> = requests.iter().map(ContextRequest::cache_key).collect();

        let mut slots: Vec<Option<ContextResponse>> = vec![None; requests.len()];
        let mut first_seen: HashMap<&str, usize> = HashMap::new();
        let mut pending: Vec<usize> = Vec::new();
        {
            let mut cache = self.lock_cache();
            for (i, key) in keys.iter().enumerate() {
                if let Some(context) = cache.get(key) {
                    slots[i] = Some(ContextResponse::cached(context));
                } else if !first_seen.contains_key(key.as_str()) {
                    first_seen.insert(key.as_str(), i);
                    pending.push(i);
                }
            }
        }
        let misses = pending.len() as u64;
        self.costs
            .record_lookups(requests.len() as u64 - misses, misses);

        let generated: Vec<(usize, ContextResponse)> = futures::stream::iter(pending)
            .map(|i| {
                let request = requests[i];
                let key = keys[i].clone();
                async move { (i, self.generate_uncached(request, key).await) }
            })
            .buffered(self.config.max_concurrency.max(1))
            .collect()
            .await;
        for (i, response) in generated {
            slots[i] = Some(response);
        }

        let mut responses: Vec<ContextResponse> = Vec::with_capacity(requests.len());
        for (i, slot) in slots.into_iter().enumerate() {
            let response = slot.unwrap_or_else(|| {
                match first_seen
                    .get(keys[i].as_str())
                    .and_then(|&first| responses.get(first))
                {
                    Some(first) if !first.fallback => ContextResponse::cached(first.context.clone()),
                    _ => ContextResponse::fallback(&requests[i]),
                }
            });
            responses.push(response);
        }
        responses
    }

    async fn generate_uncached(&self, request: ContextRequest<'_>, key: String) -> ContextResponse {
        if !self.config.enabled {
            return ContextResponse::fallback(&request);
        }
        let messages = build_prompt(&request, self.config.max_content_chars);
        match self
            .provider
            .complete(&messages, &self.config.model, self.config.max_tokens)
            .await
        {
            Ok(completion) if !completion.text.trim().is_empty() => {
                let cost = self
                    .costs
                    .record_request(completion.input_tokens, completion.output_tokens);
                let context = completion.text.trim().to_owned();
                self.lock_cache().insert(key, context.clone());
                debug!(file = request.file_path, "generated chunk context");
                ContextResponse {
                    context,
                    tokens: completion.input_tokens + completion.output_tokens,
                    cached: false,
                    cost_usd: cost,
                    fallback: false,
                }
            }
            Ok(_) => {
                warn!(file = request.file_path, "empty context from provider, using fallback");
                ContextResponse::fallback(&request)
            }
            Err(e) => {
                warn!(file = request.file_path, "context generation failed, using fallback: {e}");
                ContextResponse::fallback(&request)
            }
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

    fn lock_cache(&self) -> MutexGuard<'_, TtlCache<String>> {
        self.cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// `module.Parent.symbol`, or a line range for anonymous blocks.
#[must_use]
pub fn qualified_name(chunk: &CodeChunk, module_name: Option<&str>) -> String {
    let symbol = match (&chunk.parent_symbol, &chunk.symbol_name) {
        (Some(parent), Some(name)) => format!("{parent}.{name}"),
        (None, Some(name)) => name.clone(),
        (_, None) => {
            return format!("lines {}-{}", chunk.start_line + 1, chunk.end_line + 1);
        }
    };
    match module_name {
        Some(module) if !module.is_empty() => format!("{module}.{symbol}"),
        _ => symbol,
    }
}

fn build_prompt(request: &ContextRequest<'_>, max_chars: usize) -> Vec<Message> {
    let chunk = request.chunk;
    let content = truncate_chars(&chunk.content, max_chars);
    vec![Message::user(format!(
        "Summarize the {kind} `{name}` from `{path}` in one or two sentences for a code search index.\n\
         Say what it does and when a developer would look for it. Reply with the description only.\n\n\
         ```{lang}\n{content}\n```",
        kind = chunk.chunk_type,
        name = qualified_name(chunk, request.module_name),
        path = request.file_path,
        lang = chunk.language,
    ))]
}

fn fallback_context(request: &ContextRequest<'_>) -> String {
    let chunk = request.chunk;
    match chunk.chunk_type {
        ChunkType::Block => format!(
            "Code block (lines {}-{}) in {}",
            chunk.start_line + 1,
            chunk.end_line + 1,
            request.file_path
        ),
        kind => format!(
            "{kind} {} in {}",
            qualified_name(chunk, request.module_name),
            request.file_path
        ),
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Text embedded into `content_vec`: a short header, the description, then
/// the code.
#[must_use]
pub fn contextualize_for_embedding(chunk: &CodeChunk, file_path: &str, context: &str) -> String {
    let mut text = String::with_capacity(chunk.content.len() + context.len() + 128);

    text.push_str("# ");
    text.push_str(file_path);
    text.push('\n');

    if let Some(parent) = &chunk.parent_symbol {
        text.push_str("# Scope: ");
        text.push_str(parent);
        text.push('\n');
    }

    text.push_str("# Language: ");
    text.push_str(&chunk.language);
    text.push('\n');

    if !context.is_empty() {
        text.push_str("# ");
        text.push_str(context);
        text.push('\n');
    }

    text.push_str(&chunk.content);
    text
}

/// Text embedded into `title_vec`: the bare symbol name.
#[must_use]
pub fn title_text(chunk: &CodeChunk, file_path: &str) -> String {
    chunk.symbol_name.clone().unwrap_or_else(|| {
        let file = file_path.rsplit('/').next().unwrap_or(file_path);
        format!("{file} lines {}-{}", chunk.start_line + 1, chunk.end_line + 1)
    })
}

/// Text embedded into `breadcrumb_vec`: path segments, then parent and symbol.
#[must_use]
pub fn breadcrumb_text(chunk: &CodeChunk, file_path: &str) -> String {
    let mut parts: Vec<&str> = file_path.split('/').filter(|s| !s.is_empty()).collect();
    if let Some(parent) = &chunk.parent_symbol {
        parts.push(parent);
    }
    if let Some(name) = &chunk.symbol_name {
        parts.push(name);
    }
    parts.join(" > ")
}
