//! Test-only mock provider implementing every capability.
//!
//! Embeddings are bag-of-words vectors hashed into `dimensions` buckets and
//! L2-normalized, so texts sharing words score higher under inner product.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::LlmError;
use crate::provider::{
    Completion, CompletionProvider, EmbeddingBatch, EmbeddingProvider, InputType, Message,
    Provider, RerankBatch, RerankProvider, RerankScore,
};

#[derive(Debug, Default)]
struct CallCounters {
    embed_requests: AtomicUsize,
    embedded_texts: AtomicUsize,
    completions: AtomicUsize,
    rerank_requests: AtomicUsize,
}

#[derive(Debug, Clone)]
pub struct MockProvider {
    pub dimensions: usize,
    /// Fixed completion text. `None` derives a description from the prompt.
    pub context_response: Option<String>,
    pub fail_embed: bool,
    pub fail_complete: bool,
    pub fail_rerank: bool,
    /// Milliseconds to sleep before answering any request.
    pub delay_ms: u64,
    calls: Arc<CallCounters>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            dimensions: 1024,
            context_response: None,
            fail_embed: false,
            fail_complete: false,
            fail_rerank: false,
            delay_ms: 0,
            calls: Arc::new(CallCounters::default()),
        }
    }
}

impl MockProvider {
    #[must_use]
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self
    }

    #[must_use]
    pub fn with_context_response(mut self, text: impl Into<String>) -> Self {
        self.context_response = Some(text.into());
        self
    }

    #[must_use]
    pub fn failing_embed(mut self) -> Self {
        self.fail_embed = true;
        self
    }

    #[must_use]
    pub fn failing_complete(mut self) -> Self {
        self.fail_complete = true;
        self
    }

    #[must_use]
    pub fn failing_rerank(mut self) -> Self {
        self.fail_rerank = true;
        self
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    #[must_use]
    pub fn embed_requests(&self) -> usize {
        self.calls.embed_requests.load(Ordering::SeqCst)
    }

    /// Total texts sent across all embedding requests.
    #[must_use]
    pub fn embedded_texts(&self) -> usize {
        self.calls.embedded_texts.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn completions(&self) -> usize {
        self.calls.completions.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn rerank_requests(&self) -> usize {
        self.calls.rerank_requests.load(Ordering::SeqCst)
    }

    /// The vector this provider returns for `text`.
    #[must_use]
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let dims = self.dimensions.max(1);
        let mut v = vec![0.0f32; dims];
        for word in words(text) {
            #[allow(clippy::cast_possible_truncation)]
            let bucket = (fnv1a(word.as_bytes()) % dims as u64) as usize;
            v[bucket] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        } else {
            v[0] = 1.0;
        }
        v
    }

    async fn pause(&self) {
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
    }
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

fn token_count(text: &str) -> u64 {
    (words(text).count() as u64).max(1)
}

impl Provider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }
}

impl EmbeddingProvider for MockProvider {
    async fn embed_batch(
        &self,
        texts: &[String],
        _model: &str,
        _input_type: InputType,
    ) -> Result<EmbeddingBatch, LlmError> {
        self.pause().await;
        self.calls.embed_requests.fetch_add(1, Ordering::SeqCst);
        if self.fail_embed {
            return Err(LlmError::Other("mock embedding error".into()));
        }
        self.calls
            .embedded_texts
            .fetch_add(texts.len(), Ordering::SeqCst);
        Ok(EmbeddingBatch {
            embeddings: texts.iter().map(|t| self.vector_for(t)).collect(),
            total_tokens: texts.iter().map(|t| token_count(t)).sum(),
        })
    }
}

impl CompletionProvider for MockProvider {
    async fn complete(
        &self,
        messages: &[Message],
        _model: &str,
        _max_tokens: u32,
    ) -> Result<Completion, LlmError> {
        self.pause().await;
        self.calls.completions.fetch_add(1, Ordering::SeqCst);
        if self.fail_complete {
            return Err(LlmError::Other("mock completion error".into()));
        }
        let prompt: String = messages.iter().map(|m| m.content.as_str()).collect();
        let text = self.context_response.clone().unwrap_or_else(|| {
            let first = prompt.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
            format!("Mock context: {}", first.trim())
        });
        Ok(Completion {
            output_tokens: token_count(&text),
            input_tokens: token_count(&prompt),
            text,
        })
    }
}

impl RerankProvider for MockProvider {
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        _model: &str,
    ) -> Result<RerankBatch, LlmError> {
        self.pause().await;
        self.calls.rerank_requests.fetch_add(1, Ordering::SeqCst);
        if self.fail_rerank {
            return Err(LlmError::Other("mock rerank error".into()));
        }
        let query_words: Vec<String> = words(query).collect();
        let scores = documents
            .iter()
            .enumerate()
            .map(|(index, doc)| {
                let doc_words: Vec<String> = words(doc).collect();
                let hits = query_words.iter().filter(|w| doc_words.contains(w)).count();
                #[allow(clippy::cast_precision_loss)]
                let relevance_score = if query_words.is_empty() {
                    0.0
                } else {
                    hits as f32 / query_words.len() as f32
                };
                RerankScore {
                    index,
                    relevance_score,
                }
            })
            .collect();
        Ok(RerankBatch {
            scores,
            total_tokens: token_count(query) * documents.len() as u64
                + documents.iter().map(|d| token_count(d)).sum::<u64>(),
        })
    }
}
