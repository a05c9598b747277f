//! Debounced filesystem watcher that keeps a workspace index current.

use std::path::{Component, Path};
use std::sync::Arc;
use std::time::Duration;

use delve_llm::{CompletionProvider, EmbeddingProvider};
use notify_debouncer_mini::{DebounceEventResult, DebouncedEventKind, new_debouncer};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::indexer::{CodeIndexer, IndexOptions};
use crate::workspace::Workspace;

/// Supervised background task that re-runs incremental indexing after
/// debounced file changes. Stop it with [`IndexWatcher::shutdown`].
pub struct IndexWatcher {
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl IndexWatcher {
    /// # Errors
    ///
    /// Returns an error if the workspace does not exist or the filesystem
    /// watcher cannot be initialized.
    pub fn start<E, C>(
        root: &Path,
        indexer: Arc<CodeIndexer<E, C>>,
        debounce: Duration,
        include: Vec<String>,
    ) -> Result<Self>
    where
        E: EmbeddingProvider + 'static,
        C: CompletionProvider + 'static,
    {
        let root = Workspace::resolve(root)?.root().to_path_buf();
        // Capacity 1: a pending signal already covers every later change.
        let (signal_tx, mut signal_rx) = mpsc::channel::<()>(1);

        let filter_root = root.clone();
        let mut debouncer = new_debouncer(debounce, move |events: DebounceEventResult| {
            let events = match events {
                Ok(events) => events,
                Err(e) => {
                    warn!("index watcher error: {e}");
                    return;
                }
            };
            if events
                .iter()
                .any(|e| e.kind == DebouncedEventKind::Any && is_watched(&filter_root, &e.path))
            {
                let _ = signal_tx.try_send(());
            }
        })?;
        debouncer
            .watcher()
            .watch(&root, notify::RecursiveMode::Recursive)?;

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let _debouncer = debouncer;
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    signal = signal_rx.recv() => {
                        if signal.is_none() {
                            break;
                        }
                        reindex(&indexer, &root, &include, token.child_token()).await;
                    }
                }
            }
            debug!("index watcher stopped");
        });

        info!("index watcher started");
        Ok(Self { cancel, handle })
    }

    /// Cancel the task, including a run in progress, and wait for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the task panicked.
    pub async fn shutdown(self) -> Result<()> {
        self.cancel.cancel();
        self.handle.await?;
        Ok(())
    }
}

async fn reindex<E, C>(
    indexer: &CodeIndexer<E, C>,
    root: &Path,
    include: &[String],
    cancel: CancellationToken,
) where
    E: EmbeddingProvider,
    C: CompletionProvider,
{
    let options = IndexOptions {
        include: include.to_vec(),
        cancel,
        ..IndexOptions::default()
    };
    match indexer.index_workspace_with(root, options).await {
        Ok(report) if report.files_indexed + report.files_removed > 0 => info!(
            files = report.files_indexed,
            removed = report.files_removed,
            chunks = report.chunks_indexed,
            "incremental index updated"
        ),
        Ok(_) => debug!("no indexable changes"),
        Err(e) => warn!("incremental index failed: {e}"),
    }
}

/// Changes under hidden directories (`.git`, the snapshot store) are ignored.
fn is_watched(root: &Path, path: &Path) -> bool {
    path.strip_prefix(root).is_ok_and(|rel| {
        !rel.components().any(|c| match c {
            Component::Normal(name) => name.to_string_lossy().starts_with('.'),
            _ => false,
        })
    })
}
