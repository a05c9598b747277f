//! Workspace indexing orchestrator: sync → chunk → describe → embed → store.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use delve_llm::{CompletionProvider, EmbeddingProvider, InputType};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chunker::{Chunker, ChunkerConfig};
use crate::context::{
    ContextGenerator, breadcrumb_text, contextualize_for_embedding, title_text,
};
use crate::embedder::Embedder;
use crate::error::Result;
use crate::languages::language_tag;
use crate::store::{ChunkPayload, CodeStore, IndexedPoint, point_id};
use crate::sync::{SyncConfig, Synchronizer};
use crate::workspace::Workspace;

#[derive(Debug, Clone, Default)]
pub struct IndexerConfig {
    pub sync: SyncConfig,
    pub chunker: ChunkerConfig,
    /// Files (re)indexed per run; the rest wait for the next run.
    pub max_files: Option<usize>,
    /// Snapshot directory, relative to the workspace root unless absolute.
    /// Defaults to `<root>/.delve/snapshots`.
    pub snapshot_dir: Option<PathBuf>,
}

/// Emitted after each file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexProgress {
    pub files_total: usize,
    pub files_processed: usize,
    pub chunks_indexed: usize,
    pub current_file: String,
}

#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    /// Overrides the configured include globs when non-empty.
    pub include: Vec<String>,
    pub max_files: Option<usize>,
    /// Drop the collection and snapshot first.
    pub full: bool,
    pub progress: Option<mpsc::UnboundedSender<IndexProgress>>,
    pub cancel: CancellationToken,
}

/// Summary of an indexing run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexReport {
    pub collection: String,
    pub files_scanned: usize,
    pub files_indexed: usize,
    pub files_removed: usize,
    pub files_unchanged: usize,
    pub files_deferred: usize,
    pub chunks_indexed: usize,
    pub cost_usd: f64,
    pub errors: Vec<String>,
    pub cancelled: bool,
    pub duration_ms: u64,
}

pub struct CodeIndexer<E, C> {
    embedder: Arc<Embedder<E>>,
    contexts: Arc<ContextGenerator<C>>,
    store: CodeStore,
    chunker: Chunker,
    config: IndexerConfig,
}

impl<E: EmbeddingProvider, C: CompletionProvider> CodeIndexer<E, C> {
    #[must_use]
    pub fn new(
        embedder: Arc<Embedder<E>>,
        contexts: Arc<ContextGenerator<C>>,
        store: CodeStore,
        config: IndexerConfig,
    ) -> Self {
        Self {
            chunker: Chunker::new(config.chunker.clone()),
            embedder,
            contexts,
            store,
            config,
        }
    }

    #[must_use]
    pub fn embedder(&self) -> &Embedder<E> {
        &self.embedder
    }

    #[must_use]
    pub fn contexts(&self) -> &ContextGenerator<C> {
        &self.contexts
    }

    #[must_use]
    pub fn store(&self) -> &CodeStore {
        &self.store
    }

    /// Change detector for `workspace`, with `include` replacing the
    /// configured include globs when non-empty.
    #[must_use]
    pub fn synchronizer(&self, workspace: &Workspace, include: &[String]) -> Synchronizer {
        let dir = match &self.config.snapshot_dir {
            Some(dir) => workspace.root().join(dir),
            None => workspace.root().join(".delve").join("snapshots"),
        };
        let mut config = self.config.sync.clone();
        if !include.is_empty() {
            config.include = include.to_vec();
        }
        Synchronizer::new(
            workspace.root().to_path_buf(),
            dir.join(format!("{}.json", workspace.collection())),
            config,
        )
    }

    /// Incrementally index the workspace at `path`.
    ///
    /// # Errors
    ///
    /// See [`CodeIndexer::index_workspace_with`].
    pub async fn index_workspace(
        &self,
        path: &Path,
        include: &[String],
        max_files: Option<usize>,
    ) -> Result<IndexReport> {
        self.index_workspace_with(
            path,
            IndexOptions {
                include: include.to_vec(),
                max_files,
                ..IndexOptions::default()
            },
        )
        .await
    }

    /// Index only the files that changed since the last run.
    ///
    /// A modified file's new points overwrite the old ids before its stale
    /// tail is deleted. Files that fail are reported in
    /// [`IndexReport::errors`] and retried next run; they never abort the run.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace does not exist, the collection
    /// cannot be created, or the snapshot cannot be read or written.
    pub async fn index_workspace_with(
        &self,
        path: &Path,
        options: IndexOptions,
    ) -> Result<IndexReport> {
        let start = std::time::Instant::now();
        let workspace = Workspace::resolve(path)?;
        let collection = workspace.collection();
        let sync = self.synchronizer(&workspace, &options.include);

        if options.full {
            self.store.delete_collection(collection).await?;
            sync.clear()?;
        }
        self.store.create_collection(collection).await?;

        let plan = {
            let sync = sync.clone();
            tokio::task::spawn_blocking(move || sync.plan()).await??
        };

        let mut report = IndexReport {
            collection: collection.to_owned(),
            files_scanned: plan.current.files.len(),
            ..IndexReport::default()
        };
        let mut failed: HashSet<String> = HashSet::new();
        let mut to_index = plan.changes.to_index();
        report.files_unchanged = report.files_scanned - to_index.len();

        if let Some(max) = options.max_files.or(self.config.max_files)
            && to_index.len() > max
        {
            let deferred = to_index.split_off(max);
            info!(deferred = deferred.len(), "file limit reached, deferring the rest");
            report.files_deferred = deferred.len();
            failed.extend(deferred);
        }

        let total = to_index.len();
        info!(
            collection,
            total,
            removed = plan.changes.removed.len(),
            "indexing started"
        );

        for removed in &plan.changes.removed {
            match self.store.delete_file(collection, removed).await {
                Ok(()) => report.files_removed += 1,
                Err(e) => {
                    warn!(file = %removed, "failed to remove points: {e}");
                    report.errors.push(format!("{removed}: {e}"));
                    failed.insert(removed.clone());
                }
            }
        }

        for (i, rel) in to_index.iter().enumerate() {
            if options.cancel.is_cancelled() {
                info!(remaining = total - i, "indexing cancelled");
                report.cancelled = true;
                failed.extend(to_index[i..].iter().cloned());
                break;
            }
            match self.index_file(&workspace, rel).await {
                Ok((chunks, cost)) => {
                    report.files_indexed += 1;
                    report.chunks_indexed += chunks;
                    report.cost_usd += cost;
                    debug!(file = %rel, progress = format_args!("{}/{total}", i + 1), chunks);
                }
                Err(e) => {
                    warn!(file = %rel, "indexing failed: {e}");
                    report.errors.push(format!("{rel}: {e}"));
                    failed.insert(rel.clone());
                }
            }
            if let Some(progress) = &options.progress {
                let _ = progress.send(IndexProgress {
                    files_total: total,
                    files_processed: i + 1,
                    chunks_indexed: report.chunks_indexed,
                    current_file: rel.clone(),
                });
            }
        }

        tokio::task::spawn_blocking(move || sync.commit(&plan, &failed)).await??;

        report.duration_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        info!(
            collection,
            files = report.files_indexed,
            chunks = report.chunks_indexed,
            removed = report.files_removed,
            errors = report.errors.len(),
            duration_ms = report.duration_ms,
            "indexing finished"
        );
        Ok(report)
    }

    /// Replace the points of one file. Returns the chunk count and the
    /// provider cost.
    async fn index_file(&self, workspace: &Workspace, rel: &str) -> Result<(usize, f64)> {
        let collection = workspace.collection();
        let abs = workspace.root().join(rel);
        let bytes = tokio::fs::read(&abs).await?;
        let text = String::from_utf8_lossy(&bytes);
        let language = language_tag(&abs);

        let chunks = self.chunker.chunk(&text, &language);
        if chunks.is_empty() {
            self.store.delete_file(collection, rel).await?;
            return Ok((0, 0.0));
        }

        let module = module_name(rel);
        let contexts = self
            .contexts
            .generate_contexts_batch(&chunks, &[rel], module.as_deref())
            .await;

        let content_texts: Vec<String> = chunks
            .iter()
            .zip(&contexts)
            .map(|(chunk, ctx)| contextualize_for_embedding(chunk, rel, &ctx.context))
            .collect();
        let title_texts: Vec<String> = chunks.iter().map(|c| title_text(c, rel)).collect();
        let breadcrumb_texts: Vec<String> =
            chunks.iter().map(|c| breadcrumb_text(c, rel)).collect();

        let model = self.embedder.model();
        let (content, titles, breadcrumbs) = tokio::try_join!(
            self.embedder
                .embed_batch(&content_texts, model, InputType::Document),
            self.embedder
                .embed_batch(&title_texts, model, InputType::Document),
            self.embedder
                .embed_batch(&breadcrumb_texts, model, InputType::Document),
        )?;

        let cost: f64 = contexts.iter().map(|c| c.cost_usd).sum::<f64>()
            + [&content, &titles, &breadcrumbs]
                .iter()
                .flat_map(|batch| batch.iter())
                .map(|r| r.cost_usd)
                .sum::<f64>();

        let vectors = content.into_iter().zip(titles).zip(breadcrumbs);
        let points: Vec<IndexedPoint> = chunks
            .into_iter()
            .zip(contexts)
            .zip(vectors)
            .enumerate()
            .map(|(chunk_index, ((chunk, ctx), ((content, title), breadcrumb)))| {
                IndexedPoint {
                    id: point_id(rel, chunk_index),
                    content_vec: content.embedding,
                    title_vec: title.embedding,
                    breadcrumb_vec: breadcrumb.embedding,
                    payload: ChunkPayload {
                        workspace_id: workspace.id().to_owned(),
                        file_path: rel.to_owned(),
                        function_name: chunk.symbol_name,
                        parent_symbol: chunk.parent_symbol,
                        language: chunk.language,
                        chunk_type: chunk.chunk_type,
                        chunk_index,
                        start_line: chunk.start_line,
                        end_line: chunk.end_line,
                        complexity: chunk.complexity,
                        content: chunk.content,
                        context_snippet: ctx.context,
                    },
                }
            })
            .collect();

        let count = points.len();
        self.store.upsert(collection, points).await?;
        self.store.delete_stale(collection, rel, count).await?;
        Ok((count, cost))
    }
}

/// Dotted module path of a relative file path: `src/auth/login.py` becomes
/// `src.auth.login`.
fn module_name(rel: &str) -> Option<String> {
    let stem = match rel.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() && !stem.ends_with('/') => stem,
        _ => rel,
    };
    let module = stem.replace('/', ".");
    (!module.is_empty()).then_some(module)
}
