//! `delve` command-line interface: index a workspace, search it, inspect or
//! clear its index, or keep it current while files change.

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use delve_index::context::ContextGenerator;
use delve_index::embedder::Embedder;
use delve_index::indexer::{IndexOptions, IndexProgress, IndexReport};
use delve_index::qdrant_ops::QdrantOps;
use delve_index::reranker::Reranker;
use delve_index::service::{CodeSearchService, IndexStatus, SearchResponse};
use delve_index::store::CodeStore;
use delve_index::watcher::IndexWatcher;
use delve_llm::openai::OpenAiProvider;
use delve_llm::voyage::VoyageProvider;
use tokio_util::sync::CancellationToken;

use crate::config::Config;

type Service = CodeSearchService<VoyageProvider, OpenAiProvider, VoyageProvider>;

#[derive(Parser)]
#[command(name = "delve", version, about = "Semantic code search over local workspaces")]
struct Cli {
    /// Configuration file. Falls back to `DELVE_CONFIG`, then `config/delve.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index new and changed files.
    Index {
        #[arg(default_value = ".")]
        path: PathBuf,
        /// Glob to index; repeatable. Replaces the configured include list.
        #[arg(long)]
        include: Vec<String>,
        #[arg(long)]
        max_files: Option<usize>,
        /// Drop the existing index and start over.
        #[arg(long)]
        full: bool,
    },
    /// Search an indexed workspace.
    Search {
        query: String,
        #[arg(long, default_value = ".")]
        path: PathBuf,
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        #[arg(long)]
        language: Option<String>,
        #[arg(long)]
        no_rerank: bool,
        /// Move this many held-back results into the displayed set.
        #[arg(long, default_value_t = 0)]
        more: usize,
    },
    /// Show index size, costs, and cache usage.
    Status {
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// Delete the index and its snapshot.
    Clear {
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// Re-index incrementally whenever files change. Stops on Ctrl-C.
    Watch {
        #[arg(default_value = ".")]
        path: PathBuf,
        #[arg(long)]
        include: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config.as_deref());
    let config = Config::load(&config_path)?;
    config.validate()?;
    let service = build_service(&config)?;

    match cli.command {
        Command::Index {
            path,
            include,
            max_files,
            full,
        } => {
            let report = run_index(&service, &path, include, max_files, full, cli.json).await?;
            emit_report(&report, cli.json)?;
        }
        Command::Search {
            query,
            path,
            top_k,
            language,
            no_rerank,
            more,
        } => {
            let top_k = top_k.unwrap_or(config.search.top_k);
            let use_reranking = config.rerank.enabled && !no_rerank;
            let mut response = service
                .search_code(&path, &query, top_k, language.as_deref(), use_reranking)
                .await?;
            if more > 0 {
                response.ranking.reveal(more);
            }
            if cli.json {
                print_json(&response)?;
            } else {
                print_search(&response);
            }
        }
        Command::Status { path } => {
            let status = service.get_index_status(&path).await?;
            if cli.json {
                print_json(&status)?;
            } else {
                print_status(&status);
            }
        }
        Command::Clear { path } => {
            service.clear_index(&path).await?;
            println!("index cleared for {}", path.display());
        }
        Command::Watch { path, include } => {
            let report = run_index(&service, &path, include.clone(), None, false, cli.json).await?;
            emit_report(&report, cli.json)?;
            let watcher = IndexWatcher::start(
                &path,
                Arc::clone(service.indexer()),
                Duration::from_millis(config.indexing.watch_debounce_ms),
                include,
            )?;
            if !cli.json {
                println!("watching {} (Ctrl-C to stop)", path.display());
            }
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C")?;
            watcher.shutdown().await?;
        }
    }

    Ok(())
}

fn init_subscriber() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_config_path(flag: Option<&Path>) -> PathBuf {
    if let Some(path) = flag {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var("DELVE_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("config/delve.toml")
}

fn build_service(config: &Config) -> anyhow::Result<Service> {
    let voyage_key = config
        .secrets
        .voyage_api_key
        .clone()
        .context("DELVE_VOYAGE_API_KEY is not set")?;
    let dimension =
        u32::try_from(config.embedding.dimensions).context("embedding.dimensions is too large")?;
    let voyage = Arc::new(
        VoyageProvider::new(voyage_key, config.embedding.base_url.clone())?
            .with_output_dimension(dimension),
    );

    let mut context_config = config.context_config();
    let openai_key = config.secrets.openai_api_key.clone().unwrap_or_default();
    if context_config.enabled && openai_key.is_empty() {
        tracing::warn!("DELVE_OPENAI_API_KEY is not set, using structural chunk context");
        context_config.enabled = false;
    }
    let completions = Arc::new(OpenAiProvider::new(
        openai_key,
        config.context.base_url.clone(),
    )?);

    let hnsw = config.hnsw_params();
    let qdrant = QdrantOps::new(
        &config.qdrant.url,
        Duration::from_secs(config.qdrant.timeout_secs),
    )?
    .with_search_ef(hnsw.ef_search);
    let store = CodeStore::new(Arc::new(qdrant), config.embedding.dimensions, hnsw);

    let reranker = config
        .rerank
        .enabled
        .then(|| Reranker::new(Arc::clone(&voyage), config.reranker_config()));

    Ok(CodeSearchService::new(
        Arc::new(Embedder::new(voyage, config.embedder_config())),
        Arc::new(ContextGenerator::new(completions, context_config)),
        store,
        reranker,
        config.service_config(),
    ))
}

async fn run_index(
    service: &Service,
    path: &Path,
    include: Vec<String>,
    max_files: Option<usize>,
    full: bool,
    quiet: bool,
) -> anyhow::Result<IndexReport> {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, finishing the current file");
            on_interrupt.cancel();
        }
    });

    let (progress_tx, mut progress_rx) = tokio::sync::mpsc::unbounded_channel::<IndexProgress>();
    let printer = tokio::spawn(async move {
        while let Some(p) = progress_rx.recv().await {
            if !quiet {
                eprintln!(
                    "[{}/{}] {} ({} chunks)",
                    p.files_processed, p.files_total, p.current_file, p.chunks_indexed
                );
            }
        }
    });

    let options = IndexOptions {
        include,
        max_files,
        full,
        progress: Some(progress_tx),
        cancel,
    };
    let result = service.index_workspace_with(path, options).await;
    interrupt.abort();
    printer.await?;
    Ok(result?)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn emit_report(report: &IndexReport, json: bool) -> anyhow::Result<()> {
    if json {
        print_json(report)
    } else {
        print_report(report);
        Ok(())
    }
}

fn print_report(report: &IndexReport) {
    println!(
        "{}: {} indexed, {} unchanged, {} removed, {} deferred ({} chunks, ${:.4}, {} ms)",
        report.collection,
        report.files_indexed,
        report.files_unchanged,
        report.files_removed,
        report.files_deferred,
        report.chunks_indexed,
        report.cost_usd,
        report.duration_ms,
    );
    if report.cancelled {
        println!("cancelled; remaining files will be picked up by the next run");
    }
    for error in &report.errors {
        println!("  error: {error}");
    }
}

fn print_search(response: &SearchResponse) {
    let ranking = &response.ranking;
    if ranking.top_results.is_empty() {
        println!("no results for {:?}", response.query);
        return;
    }
    for r in &ranking.top_results {
        let symbol = r.result.function_name.as_deref().unwrap_or("-");
        println!(
            "{:>3}. {}:{}-{}  {symbol}  ({:.3})",
            r.new_rank + 1,
            r.result.file_path,
            r.result.start_line,
            r.result.end_line,
            r.relevance_score,
        );
        if !r.result.context_snippet.is_empty() {
            println!("     {}", r.result.context_snippet);
        }
    }
    if !ranking.cached_results.is_empty() {
        println!(
            "{} more held back (use --more N)",
            ranking.cached_results.len()
        );
    }
    println!(
        "{} query, {} keyword matches, reranked: {}, ${:.5}",
        format!("{:?}", response.kind).to_lowercase(),
        response.keyword_matches,
        ranking.reranked,
        response.query_cost_usd + ranking.cost_usd,
    );
}

fn print_status(status: &IndexStatus) {
    println!("workspace:  {}", status.workspace.display());
    println!("collection: {}", status.collection);
    if !status.indexed {
        println!("not indexed");
        return;
    }
    println!("vectors:    {}", status.vector_count);
    println!("files:      {}", status.tracked_files);
    println!(
        "embedding:  {} requests, {} tokens, ${:.4}, {} cached",
        status.embedding.total_requests,
        status.embedding.total_tokens,
        status.embedding.total_cost_usd,
        status.embedding_cache_entries,
    );
    println!(
        "context:    {} requests, {} tokens, ${:.4}, {} cached",
        status.context.total_requests,
        status.context.total_tokens,
        status.context.total_cost_usd,
        status.context_cache_entries,
    );
    if let Some(rerank) = &status.rerank {
        println!(
            "rerank:     {} requests, {} tokens, ${:.4}, {} cached",
            rerank.total_requests,
            rerank.total_tokens,
            rerank.total_cost_usd,
            status.rerank_cache_entries,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_search_flags() {
        let cli = Cli::try_parse_from([
            "delve", "--json", "search", "where is login", "-k", "5", "--language", "python",
            "--no-rerank",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Command::Search {
                query,
                top_k,
                language,
                no_rerank,
                more,
                ..
            } => {
                assert_eq!(query, "where is login");
                assert_eq!(top_k, Some(5));
                assert_eq!(language.as_deref(), Some("python"));
                assert!(no_rerank);
                assert_eq!(more, 0);
            }
            _ => panic!("expected search"),
        }
    }

    #[test]
    fn cli_parses_repeated_includes() {
        let cli = Cli::try_parse_from([
            "delve", "index", "repo", "--include", "*.rs", "--include", "*.py", "--full",
        ])
        .unwrap();
        match cli.command {
            Command::Index {
                path,
                include,
                full,
                max_files,
            } => {
                assert_eq!(path, PathBuf::from("repo"));
                assert_eq!(include, vec!["*.rs", "*.py"]);
                assert!(full);
                assert!(max_files.is_none());
            }
            _ => panic!("expected index"),
        }
    }

    #[test]
    fn json_flag_applies_to_watch() {
        for args in [
            ["delve", "--json", "watch", "repo"],
            ["delve", "watch", "repo", "--json"],
        ] {
            let cli = Cli::try_parse_from(args).unwrap();
            assert!(cli.json);
            match cli.command {
                Command::Watch { path, include } => {
                    assert_eq!(path, PathBuf::from("repo"));
                    assert!(include.is_empty());
                }
                _ => panic!("expected watch"),
            }
        }
    }

    #[test]
    fn config_flag_takes_precedence() {
        let path = resolve_config_path(Some(Path::new("custom.toml")));
        assert_eq!(path, PathBuf::from("custom.toml"));
    }
}
