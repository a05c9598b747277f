//! Hybrid code search: query classification, fusion search, exact symbol
//! merge.

use std::collections::HashSet;
use std::sync::Arc;

use delve_llm::{EmbeddingProvider, InputType};
use tracing::debug;

use crate::embedder::Embedder;
use crate::error::{IndexError, Result};
use crate::store::{CodeStore, FusionWeights, QueryVectors, SearchFilters, SearchResult};
use crate::workspace::Workspace;

/// How a query reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
    /// Natural language only.
    Semantic,
    /// Names code symbols only.
    Symbol,
    /// Natural language that also names symbols.
    Hybrid,
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub top_k: usize,
    pub weights: FusionWeights,
    /// Added to the score of results whose `function_name` matches a symbol
    /// named in the query.
    pub keyword_boost: f32,
    pub keyword_enabled: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            weights: FusionWeights::default(),
            keyword_boost: 0.15,
            keyword_enabled: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HybridResults {
    pub results: Vec<SearchResult>,
    pub kind: QueryKind,
    /// Results that matched a query symbol by exact name.
    pub keyword_matches: usize,
    pub query_cached: bool,
    pub query_cost_usd: f64,
}

pub struct HybridSearch<E> {
    embedder: Arc<Embedder<E>>,
    store: CodeStore,
    config: SearchConfig,
}

impl<E: EmbeddingProvider> HybridSearch<E> {
    #[must_use]
    pub fn new(embedder: Arc<Embedder<E>>, store: CodeStore, config: SearchConfig) -> Self {
        Self {
            embedder,
            store,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Search `workspace` for `query`, optionally restricted to `language`.
    ///
    /// # Errors
    ///
    /// See [`HybridSearch::search_filtered`].
    pub async fn search(
        &self,
        workspace: &Workspace,
        query: &str,
        top_k: usize,
        language: Option<&str>,
    ) -> Result<HybridResults> {
        let filters = SearchFilters {
            language: language.map(str::to_owned),
            ..SearchFilters::default()
        };
        self.search_filtered(workspace, query, top_k, filters).await
    }

    /// The workspace id filter is always applied on top of `filters`.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace has no collection, the query cannot
    /// be embedded, the vector store fails, or a result belongs to another
    /// workspace.
    pub async fn search_filtered(
        &self,
        workspace: &Workspace,
        query: &str,
        top_k: usize,
        mut filters: SearchFilters,
    ) -> Result<HybridResults> {
        let kind = classify_query(query);
        let mut hybrid = HybridResults {
            results: Vec::new(),
            kind,
            keyword_matches: 0,
            query_cached: false,
            query_cost_usd: 0.0,
        };
        let query = query.trim();
        if query.is_empty() || top_k == 0 {
            return Ok(hybrid);
        }

        let collection = workspace.collection();
        if !self.store.collection_exists(collection).await? {
            return Err(IndexError::NotIndexed(workspace.root().to_path_buf()));
        }
        filters.workspace_id = Some(workspace.id().to_owned());

        let embedded = self
            .embedder
            .embed(query, self.embedder.model(), InputType::Query)
            .await?;
        hybrid.query_cached = embedded.cached;
        hybrid.query_cost_usd = embedded.cost_usd;

        let mut results = self
            .store
            .search(
                collection,
                &QueryVectors::all(embedded.embedding),
                top_k,
                Some(&filters),
                Some(&self.config.weights),
            )
            .await?;

        if self.config.keyword_enabled && kind != QueryKind::Semantic {
            let limit = u32::try_from(top_k).unwrap_or(u32::MAX);
            let mut exact = Vec::new();
            for symbol in extract_symbols(query) {
                exact.extend(
                    self.store
                        .find_by_symbol(collection, &symbol, Some(&filters), limit)
                        .await?,
                );
            }
            hybrid.keyword_matches =
                merge_keyword_hits(&mut results, exact, self.config.keyword_boost);
            results.truncate(top_k);
        }

        verify_isolation(workspace, &results)?;
        debug!(
            collection,
            ?kind,
            results = results.len(),
            keyword_matches = hybrid.keyword_matches,
            "hybrid search"
        );
        hybrid.results = results;
        Ok(hybrid)
    }
}

/// Boost fused results that also matched by name. Name matches missing from
/// the fused list enter at the lowest fused score plus the boost. Returns
/// the number of distinct matched results.
fn merge_keyword_hits(
    results: &mut Vec<SearchResult>,
    exact: Vec<SearchResult>,
    boost: f32,
) -> usize {
    let floor = results.iter().map(|r| r.score).reduce(f32::min).unwrap_or(0.0);
    let mut seen: HashSet<String> = HashSet::new();
    for mut hit in exact {
        if !seen.insert(hit.id.clone()) {
            continue;
        }
        if let Some(existing) = results.iter_mut().find(|r| r.id == hit.id) {
            existing.score += boost;
        } else {
            hit.score = floor + boost;
            results.push(hit);
        }
    }
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    seen.len()
}

/// Every result must carry the workspace's own id.
fn verify_isolation(workspace: &Workspace, results: &[SearchResult]) -> Result<()> {
    match results.iter().find(|r| r.workspace_id != workspace.id()) {
        Some(leak) => Err(IndexError::IsolationViolation {
            expected: workspace.id().to_owned(),
            found: leak.workspace_id.clone(),
        }),
        None => Ok(()),
    }
}

const CONCEPTUAL_WORDS: [&str; 7] = ["how", "where", "why", "what", "find", "explain", "which"];

/// Classify a query by whether it names code symbols, asks a question, or
/// both. Question words only count as whole words.
#[must_use]
pub fn classify_query(query: &str) -> QueryKind {
    let has_symbol_pattern = query.contains("::")
        || query.contains("fn ")
        || query.contains("struct ")
        || query.contains("impl ")
        || query.contains("trait ")
        || query.contains("class ")
        || query.contains("def ")
        || query.contains("func ")
        || !extract_symbols(query).is_empty();

    let lower = query.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .collect();
    let has_conceptual = words
        .iter()
        .any(|w| CONCEPTUAL_WORDS.contains(w))
        || words.windows(2).any(|pair| pair == ["show", "me"]);

    match (has_symbol_pattern, has_conceptual) {
        (true, true) => QueryKind::Hybrid,
        (true, false) => QueryKind::Symbol,
        (false, _) => QueryKind::Semantic,
    }
}

/// Identifier-like tokens in `query`, in order of appearance. Paths such as
/// `Config::load` or `config.load` contribute each qualifying segment.
#[must_use]
pub fn extract_symbols(query: &str) -> Vec<String> {
    let mut symbols: Vec<String> = Vec::new();
    for token in query.split_whitespace() {
        let token = token.trim_matches(|c: char| !(c.is_alphanumeric() || c == '_'));
        for segment in token.split("::").flat_map(|s| s.split('.')) {
            let segment = segment.trim_end_matches("()");
            if (is_snake_case(segment) || is_camel_case(segment))
                && !symbols.iter().any(|s| s == segment)
            {
                symbols.push(segment.to_owned());
            }
        }
    }
    symbols
}

fn is_identifier(word: &str) -> bool {
    word.starts_with(|c: char| c.is_alphabetic() || c == '_')
        && word.chars().all(|c| c.is_alphanumeric() || c == '_')
}

fn is_camel_case(word: &str) -> bool {
    let chars: Vec<char> = word.chars().collect();
    chars.len() >= 3
        && is_identifier(word)
        && chars.iter().any(|c| c.is_lowercase())
        && chars.iter().skip(1).any(|c| c.is_uppercase())
}

fn is_snake_case(word: &str) -> bool {
    word.len() >= 3
        && is_identifier(word)
        && word.contains('_')
        && word.trim_matches('_').contains('_')
        && word.chars().any(char::is_lowercase)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;

    use delve_llm::mock::MockProvider;

    use super::*;
    use crate::chunker::ChunkType;
    use crate::embedder::EmbedderConfig;
    use crate::in_memory_store::InMemoryVectorStore;
    use crate::store::{ChunkPayload, IndexedPoint, point_id};
    use crate::vector_store::HnswParams;

    const DIMS: usize = 64;

    #[test]
    fn classify_symbol_query() {
        assert_eq!(classify_query("SkillMatcher::match_skills"), QueryKind::Symbol);
        assert_eq!(classify_query("my_function"), QueryKind::Symbol);
    }

    #[test]
    fn question_words_inside_identifiers_do_not_count() {
        assert_eq!(classify_query("show_user"), QueryKind::Symbol);
        assert_eq!(classify_query("find_user"), QueryKind::Symbol);
        assert_eq!(classify_query("somewhere_else"), QueryKind::Symbol);
        assert_eq!(classify_query("show me parse_config"), QueryKind::Hybrid);
    }

    #[test]
    fn classify_conceptual_query() {
        assert_eq!(
            classify_query("how does skill matching work?"),
            QueryKind::Semantic
        );
        assert_eq!(classify_query("help"), QueryKind::Semantic);
    }

    #[test]
    fn classify_mixed_query() {
        assert_eq!(
            classify_query("where is SkillMatcher used?"),
            QueryKind::Hybrid
        );
    }

    #[test]
    fn symbol_extraction() {
        assert_eq!(
            extract_symbols("where is `SkillMatcher::match_skills()` called?"),
            vec!["SkillMatcher", "match_skills"]
        );
        assert_eq!(extract_symbols("call getUser and getUser"), vec!["getUser"]);
        assert_eq!(extract_symbols("config.load_all"), vec!["load_all"]);
        assert!(extract_symbols("plain words HTTP ab a_").is_empty());
    }

    #[test]
    fn camel_and_snake_detection() {
        assert!(is_camel_case("HttpClient"));
        assert!(is_camel_case("parseConfig"));
        assert!(!is_camel_case("HTTP"));
        assert!(!is_camel_case("Ab"));
        assert!(is_snake_case("a_b"));
        assert!(is_snake_case("load_settings"));
        assert!(!is_snake_case("_private"));
        assert!(!is_snake_case("NoSnake"));
    }

    struct Fixture {
        provider: MockProvider,
        store: CodeStore,
        search: HybridSearch<MockProvider>,
        workspace: Workspace,
    }

    async fn fixture(provider: MockProvider) -> Fixture {
        let provider = provider.with_dimensions(DIMS);
        let store = CodeStore::new(
            Arc::new(InMemoryVectorStore::new()),
            DIMS,
            HnswParams::default(),
        );
        let workspace = Workspace::from_canonical(PathBuf::from("/ws/search"));
        store.create_collection(workspace.collection()).await.unwrap();
        let embedder = Arc::new(Embedder::new(
            Arc::new(provider.clone()),
            EmbedderConfig {
                dimensions: DIMS,
                ..EmbedderConfig::default()
            },
        ));
        Fixture {
            search: HybridSearch::new(embedder, store.clone(), SearchConfig::default()),
            provider,
            store,
            workspace,
        }
    }

    impl Fixture {
        async fn add(&self, file: &str, name: &str, text: &str, language: &str) {
            self.add_to(self.workspace.id(), file, name, text, language).await;
        }

        async fn add_to(&self, workspace_id: &str, file: &str, name: &str, text: &str, language: &str) {
            let vector = self.provider.vector_for(text);
            let point = IndexedPoint {
                id: point_id(file, 0),
                content_vec: vector.clone(),
                title_vec: vector.clone(),
                breadcrumb_vec: vector,
                payload: ChunkPayload {
                    workspace_id: workspace_id.to_owned(),
                    file_path: file.to_owned(),
                    function_name: Some(name.to_owned()),
                    parent_symbol: None,
                    language: language.to_owned(),
                    chunk_type: ChunkType::Function,
                    chunk_index: 0,
                    start_line: 0,
                    end_line: 1,
                    complexity: 0.2,
                    content: text.to_owned(),
                    context_snippet: String::new(),
                },
            };
            self.store
                .upsert(self.workspace.collection(), vec![point])
                .await
                .unwrap();
        }
    }

    fn names(results: &HybridResults) -> Vec<&str> {
        results
            .results
            .iter()
            .map(|r| r.function_name.as_deref().unwrap_or_default())
            .collect()
    }

    #[tokio::test]
    async fn ranks_by_fused_similarity() {
        let f = fixture(MockProvider::default()).await;
        f.add("a.py", "parse", "parse the config file", "python").await;
        f.add("b.py", "render", "render an html page", "python").await;

        let hits = f
            .search
            .search(&f.workspace, "parse config", 5, None)
            .await
            .unwrap();
        assert_eq!(hits.kind, QueryKind::Semantic);
        assert_eq!(names(&hits)[0], "parse");
        assert!(hits.results[0].score >= hits.results[1].score);
    }

    #[tokio::test]
    async fn language_filter_is_a_prefilter() {
        let f = fixture(MockProvider::default()).await;
        f.add("a.py", "parse", "parse the config file", "python").await;
        f.add("b.rs", "render", "render an html page", "rust").await;

        let hits = f
            .search
            .search(&f.workspace, "parse config", 1, Some("rust"))
            .await
            .unwrap();
        assert_eq!(names(&hits), vec!["render"]);
    }

    #[tokio::test]
    async fn exact_symbol_match_is_merged_and_boosted() {
        let f = fixture(MockProvider::default()).await;
        f.add("a.py", "read_file", "where is the settings file loaded", "python")
            .await;
        f.add("b.py", "load_settings", "open toml and deserialize", "python")
            .await;

        let hits = f
            .search
            .search(&f.workspace, "where is load_settings", 1, None)
            .await
            .unwrap();
        assert_eq!(hits.kind, QueryKind::Hybrid);
        assert_eq!(hits.keyword_matches, 1);
        assert_eq!(names(&hits), vec!["load_settings"]);
    }

    #[tokio::test]
    async fn query_embedding_is_cached() {
        let f = fixture(MockProvider::default()).await;
        f.add("a.py", "parse", "parse the config file", "python").await;

        let first = f.search.search(&f.workspace, "parse", 5, None).await.unwrap();
        let second = f.search.search(&f.workspace, "parse", 5, None).await.unwrap();
        assert!(!first.query_cached);
        assert!(second.query_cached);
        assert!(second.query_cost_usd.abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn foreign_workspace_result_is_a_violation() {
        let f = fixture(MockProvider::default()).await;
        f.add_to("someone-else", "x.py", "leak", "leaked code", "python")
            .await;
        let filters = SearchFilters {
            workspace_id: Some("ignored".into()),
            ..SearchFilters::default()
        };

        let results = vec![SearchResult {
            id: "1".into(),
            score: 1.0,
            workspace_id: "someone-else".into(),
            file_path: "x.py".into(),
            function_name: None,
            parent_symbol: None,
            language: "python".into(),
            chunk_type: ChunkType::Block,
            start_line: 0,
            end_line: 0,
            content: String::new(),
            context_snippet: String::new(),
        }];
        let err = verify_isolation(&f.workspace, &results).unwrap_err();
        assert!(matches!(err, IndexError::IsolationViolation { .. }));

        let hits = f
            .search
            .search_filtered(&f.workspace, "leaked code", 5, filters)
            .await
            .unwrap();
        assert!(hits.results.is_empty());
    }

    #[tokio::test]
    async fn embedding_failure_fails_the_query() {
        let f = fixture(MockProvider::default().failing_embed()).await;
        f.add("a.py", "parse", "parse the config file", "python").await;
        let err = f
            .search
            .search(&f.workspace, "parse", 5, None)
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Embedding(_)));
    }

    #[tokio::test]
    async fn unindexed_workspace_is_reported() {
        let f = fixture(MockProvider::default()).await;
        let other = Workspace::from_canonical(PathBuf::from("/ws/other"));
        let err = f.search.search(&other, "parse", 5, None).await.unwrap_err();
        assert!(matches!(err, IndexError::NotIndexed(_)));
    }

    #[tokio::test]
    async fn blank_query_returns_nothing() {
        let f = fixture(MockProvider::default()).await;
        let hits = f.search.search(&f.workspace, "   ", 5, None).await.unwrap();
        assert!(hits.results.is_empty());
        assert_eq!(f.provider.embed_requests(), 0);
    }

    #[test]
    fn keyword_merge_boosts_existing_once() {
        let base = |id: &str, score: f32| SearchResult {
            id: id.into(),
            score,
            workspace_id: "w".into(),
            file_path: "f".into(),
            function_name: Some(id.into()),
            parent_symbol: None,
            language: "rust".into(),
            chunk_type: ChunkType::Function,
            start_line: 0,
            end_line: 0,
            content: String::new(),
            context_snippet: String::new(),
        };
        let mut results = vec![base("a", 0.9), base("b", 0.8)];
        let exact = vec![base("b", 0.0), base("b", 0.0), base("c", 0.0)];
        let matched = merge_keyword_hits(&mut results, exact, 0.15);
        assert_eq!(matched, 2);
        let scores: HashMap<_, _> = results.iter().map(|r| (r.id.as_str(), r.score)).collect();
        assert!((scores["b"] - 0.95).abs() < 1e-6);
        assert!((scores["c"] - 0.95).abs() < 1e-6);
        assert_eq!(results[0].id, "b");
    }
}
