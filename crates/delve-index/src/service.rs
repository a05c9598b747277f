//! Workspace-level facade over indexing, search, and reranking.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use delve_llm::{CompletionProvider, EmbeddingProvider, RerankProvider};
use serde::Serialize;
use tracing::info;

use crate::context::ContextGenerator;
use crate::cost::CostSummary;
use crate::embedder::Embedder;
use crate::error::Result;
use crate::indexer::{CodeIndexer, IndexOptions, IndexReport, IndexerConfig};
use crate::reranker::{RerankResponse, Reranker, RerankerConfig};
use crate::search::{HybridSearch, QueryKind, SearchConfig};
use crate::store::CodeStore;
use crate::workspace::Workspace;

#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub indexer: IndexerConfig,
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub workspace_id: String,
    pub kind: QueryKind,
    pub keyword_matches: usize,
    pub query_cached: bool,
    pub query_cost_usd: f64,
    pub ranking: RerankResponse,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub workspace: PathBuf,
    pub workspace_id: String,
    pub collection: String,
    pub indexed: bool,
    pub vector_count: u64,
    /// Files recorded in the last committed snapshot.
    pub tracked_files: usize,
    pub embedding: CostSummary,
    pub context: CostSummary,
    pub rerank: Option<CostSummary>,
    pub embedding_cache_entries: usize,
    pub context_cache_entries: usize,
    pub rerank_cache_entries: usize,
}

pub struct CodeSearchService<E, C, R> {
    indexer: Arc<CodeIndexer<E, C>>,
    search: HybridSearch<E>,
    reranker: Option<Reranker<R>>,
}

impl<E, C, R> CodeSearchService<E, C, R>
where
    E: EmbeddingProvider,
    C: CompletionProvider,
    R: RerankProvider,
{
    /// Reranking is unavailable when `reranker` is `None`.
    #[must_use]
    pub fn new(
        embedder: Arc<Embedder<E>>,
        contexts: Arc<ContextGenerator<C>>,
        store: CodeStore,
        reranker: Option<Reranker<R>>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            search: HybridSearch::new(Arc::clone(&embedder), store.clone(), config.search),
            indexer: Arc::new(CodeIndexer::new(embedder, contexts, store, config.indexer)),
            reranker,
        }
    }

    /// Shared with [`crate::watcher::IndexWatcher`].
    #[must_use]
    pub fn indexer(&self) -> &Arc<CodeIndexer<E, C>> {
        &self.indexer
    }

    /// # Errors
    ///
    /// See [`CodeIndexer::index_workspace`].
    pub async fn index_workspace(
        &self,
        path: &Path,
        include: &[String],
        max_files: Option<usize>,
    ) -> Result<IndexReport> {
        self.indexer.index_workspace(path, include, max_files).await
    }

    /// # Errors
    ///
    /// See [`CodeIndexer::index_workspace_with`].
    pub async fn index_workspace_with(
        &self,
        path: &Path,
        options: IndexOptions,
    ) -> Result<IndexReport> {
        self.indexer.index_workspace_with(path, options).await
    }

    /// Retrieve `top_k` candidates and rerank them when `use_reranking` is set
    /// and a reranker is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace is missing or unindexed, or the
    /// search itself fails. Reranking failures only clear
    /// [`RerankResponse::reranked`].
    pub async fn search_code(
        &self,
        path: &Path,
        query: &str,
        top_k: usize,
        language: Option<&str>,
        use_reranking: bool,
    ) -> Result<SearchResponse> {
        let workspace = Workspace::resolve(path)?;
        let hybrid = self.search.search(&workspace, query, top_k, language).await?;

        let ranking = match &self.reranker {
            Some(reranker) if use_reranking => reranker.rerank(query, hybrid.results).await,
            Some(reranker) => RerankResponse::original_order(hybrid.results, reranker.config()),
            None => RerankResponse::original_order(hybrid.results, &RerankerConfig::default()),
        };

        Ok(SearchResponse {
            query: query.to_owned(),
            workspace_id: workspace.id().to_owned(),
            kind: hybrid.kind,
            keyword_matches: hybrid.keyword_matches,
            query_cached: hybrid.query_cached,
            query_cost_usd: hybrid.query_cost_usd,
            ranking,
        })
    }

    /// # Errors
    ///
    /// Returns an error if the workspace is missing or the vector store
    /// cannot be reached.
    pub async fn get_index_status(&self, path: &Path) -> Result<IndexStatus> {
        let workspace = Workspace::resolve(path)?;
        let store = self.indexer.store();
        let indexed = store.collection_exists(workspace.collection()).await?;
        let vector_count = if indexed {
            store.count(workspace.collection()).await?
        } else {
            0
        };
        let sync = self.indexer.synchronizer(&workspace, &[]);
        let tracked_files = tokio::task::spawn_blocking(move || sync.load_snapshot())
            .await??
            .files
            .len();

        Ok(IndexStatus {
            workspace: workspace.root().to_path_buf(),
            workspace_id: workspace.id().to_owned(),
            collection: workspace.collection().to_owned(),
            indexed,
            vector_count,
            tracked_files,
            embedding: self.indexer.embedder().cost_summary(),
            context: self.indexer.contexts().cost_summary(),
            rerank: self.reranker.as_ref().map(Reranker::cost_summary),
            embedding_cache_entries: self.indexer.embedder().cache_len(),
            context_cache_entries: self.indexer.contexts().cache_len(),
            rerank_cache_entries: self.reranker.as_ref().map_or(0, Reranker::cache_len),
        })
    }

    /// Drop the workspace's collection and snapshot. The next index run
    /// starts from scratch.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace is missing, the collection cannot
    /// be deleted, or the snapshot cannot be removed.
    pub async fn clear_index(&self, path: &Path) -> Result<()> {
        let workspace = Workspace::resolve(path)?;
        let store = self.indexer.store();
        if store.collection_exists(workspace.collection()).await? {
            store.delete_collection(workspace.collection()).await?;
        }
        self.indexer.synchronizer(&workspace, &[]).clear()?;
        info!(collection = workspace.collection(), "index cleared");
        Ok(())
    }
}
