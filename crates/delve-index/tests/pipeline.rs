use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use delve_index::IndexError;
use delve_index::chunker::{ChunkType, Chunker, ChunkerConfig};
use delve_index::context::{ContextConfig, ContextGenerator};
use delve_index::embedder::{Embedder, EmbedderConfig};
use delve_index::in_memory_store::InMemoryVectorStore;
use delve_index::reranker::{Reranker, RerankerConfig};
use delve_index::service::{CodeSearchService, ServiceConfig};
use delve_index::store::CodeStore;
use delve_index::vector_store::{HnswParams, VectorStore};
use delve_llm::mock::MockProvider;

const DIMS: usize = 256;

type Service = CodeSearchService<MockProvider, MockProvider, MockProvider>;

#[derive(Default)]
struct Providers {
    embed: MockProvider,
    context: MockProvider,
    rerank: MockProvider,
}

fn service_on(backend: Arc<dyn VectorStore>, providers: &Providers) -> Service {
    let embed = Arc::new(providers.embed.clone().with_dimensions(DIMS));
    CodeSearchService::new(
        Arc::new(Embedder::new(
            embed,
            EmbedderConfig {
                dimensions: DIMS,
                ..EmbedderConfig::default()
            },
        )),
        Arc::new(ContextGenerator::new(
            Arc::new(providers.context.clone()),
            ContextConfig::default(),
        )),
        CodeStore::new(backend, DIMS, HnswParams::default()),
        Some(Reranker::new(
            Arc::new(providers.rerank.clone()),
            RerankerConfig::default(),
        )),
        ServiceConfig::default(),
    )
}

fn service(providers: &Providers) -> Service {
    service_on(Arc::new(InMemoryVectorStore::new()), providers)
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

const THREE_FUNCTIONS: &str = "\
def a():
    return 'alpha'

def b():
    return 'bravo'

def c():
    return 'charlie'
";

#[test]
fn three_function_file_yields_three_function_chunks() {
    let chunks = Chunker::new(ChunkerConfig::default()).chunk(THREE_FUNCTIONS, "python");
    assert_eq!(chunks.len(), 3);
    let names: Vec<_> = chunks.iter().map(|c| c.symbol_name.as_deref()).collect();
    assert_eq!(names, vec![Some("a"), Some("b"), Some("c")]);
    assert!(chunks.iter().all(|c| c.chunk_type == ChunkType::Function));
    assert!(chunks.windows(2).all(|w| w[0].end_line < w[1].start_line));
}

#[tokio::test]
async fn index_then_search_finds_the_function() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "pkg/letters.py", THREE_FUNCTIONS);
    let service = service(&Providers::default());

    let report = service.index_workspace(dir.path(), &[], None).await.unwrap();
    assert_eq!(report.files_indexed, 1);
    assert_eq!(report.chunks_indexed, 3);

    let response = service
        .search_code(dir.path(), "charlie", 3, Some("python"), false)
        .await
        .unwrap();
    let top = &response.ranking.top_results[0].result;
    assert_eq!(top.function_name.as_deref(), Some("c"));
    assert_eq!(top.file_path, "pkg/letters.py");
    assert!(top.context_snippet.starts_with("Mock context"));
    assert!(top.content.contains("return 'charlie'"));
}

#[tokio::test]
async fn workspaces_never_see_each_other() {
    let one = tempfile::tempdir().unwrap();
    let two = tempfile::tempdir().unwrap();
    write(one.path(), "one.py", "def shared_name():\n    return 'first'\n");
    write(two.path(), "two.py", "def shared_name():\n    return 'second'\n");

    let backend: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
    let service = service_on(backend, &Providers::default());
    service.index_workspace(one.path(), &[], None).await.unwrap();
    service.index_workspace(two.path(), &[], None).await.unwrap();

    let status_one = service.get_index_status(one.path()).await.unwrap();
    let status_two = service.get_index_status(two.path()).await.unwrap();
    assert_ne!(status_one.collection, status_two.collection);

    for (dir, file) in [(&one, "one.py"), (&two, "two.py")] {
        let response = service
            .search_code(dir.path(), "where is shared_name", 10, None, false)
            .await
            .unwrap();
        assert!(!response.ranking.top_results.is_empty());
        assert!(
            response
                .ranking
                .iter()
                .all(|r| r.result.file_path == file)
        );
    }
}

#[tokio::test]
async fn incremental_run_touches_only_changed_files() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.py", "def a():\n    pass\n");
    write(dir.path(), "b.py", "def b():\n    pass\n");
    let providers = Providers::default();
    let service = service(&providers);

    service.index_workspace(dir.path(), &[], None).await.unwrap();
    let completions = providers.context.completions();
    let embeds = providers.embed.embed_requests();

    let unchanged = service.index_workspace(dir.path(), &[], None).await.unwrap();
    assert_eq!(unchanged.files_indexed, 0);
    assert_eq!(providers.context.completions(), completions);
    assert_eq!(providers.embed.embed_requests(), embeds);

    write(dir.path(), "b.py", "def b():\n    return 'changed'\n");
    let changed = service.index_workspace(dir.path(), &[], None).await.unwrap();
    assert_eq!(changed.files_indexed, 1);
    assert_eq!(changed.files_unchanged, 1);
    assert_eq!(providers.context.completions(), completions + 1);

    let status = service.get_index_status(dir.path()).await.unwrap();
    assert_eq!(status.vector_count, 2);
}

#[tokio::test]
async fn include_patterns_limit_the_walk() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "src/lib.rs", "fn lib() {}\n");
    write(dir.path(), "scripts/run.py", "def run():\n    pass\n");
    let service = service(&Providers::default());

    let report = service
        .index_workspace(dir.path(), &["*.rs".to_owned()], None)
        .await
        .unwrap();
    assert_eq!(report.files_scanned, 1);
    assert_eq!(report.files_indexed, 1);
}

#[tokio::test]
async fn fifty_candidates_are_split_for_progressive_disclosure() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = String::new();
    for i in 0..50 {
        let _ = write!(source, "def handler_{i}():\n    return 'request {i}'\n\n");
    }
    write(dir.path(), "handlers.py", &source);
    let providers = Providers::default();
    let service = service(&providers);
    service.index_workspace(dir.path(), &[], None).await.unwrap();

    let mut response = service
        .search_code(dir.path(), "request handler", 50, None, true)
        .await
        .unwrap();
    let ranking = &mut response.ranking;
    assert!(ranking.reranked);
    assert_eq!(ranking.top_results.len(), 10);
    assert_eq!(ranking.cached_results.len(), 40);
    assert_eq!(ranking.total_results, 50);
    assert_eq!(providers.rerank.rerank_requests(), 1);

    let new_ranks: Vec<_> = ranking.iter().map(|r| r.new_rank).collect();
    assert_eq!(new_ranks, (0..50).collect::<Vec<_>>());
    assert_eq!(ranking.reveal(10), 10);
    assert_eq!(ranking.top_results.len(), 20);
}

#[tokio::test]
async fn rerank_outage_keeps_search_order() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "app.py", THREE_FUNCTIONS);
    let providers = Providers {
        rerank: MockProvider::default().failing_rerank(),
        ..Providers::default()
    };
    let service = service(&providers);
    service.index_workspace(dir.path(), &[], None).await.unwrap();

    let plain = service
        .search_code(dir.path(), "bravo", 3, None, false)
        .await
        .unwrap();
    let degraded = service
        .search_code(dir.path(), "bravo", 3, None, true)
        .await
        .unwrap();
    assert!(!degraded.ranking.reranked);
    assert_eq!(degraded.ranking.tokens_used, 0);
    assert!(degraded.ranking.cost_usd.abs() < f64::EPSILON);
    let ids = |r: &delve_index::reranker::RerankResponse| {
        r.iter().map(|x| x.result.id.clone()).collect::<Vec<_>>()
    };
    assert_eq!(ids(&plain.ranking), ids(&degraded.ranking));
}

#[tokio::test]
async fn context_outage_falls_back_without_failing_the_file() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "svc/app.py", "def serve():\n    pass\n");
    let providers = Providers {
        context: MockProvider::default().failing_complete(),
        ..Providers::default()
    };
    let service = service(&providers);

    let report = service.index_workspace(dir.path(), &[], None).await.unwrap();
    assert_eq!(report.files_indexed, 1);
    let response = service
        .search_code(dir.path(), "serve", 1, None, false)
        .await
        .unwrap();
    assert!(
        response.ranking.top_results[0]
            .result
            .context_snippet
            .contains("svc/app.py")
    );
}

#[tokio::test]
async fn query_embedding_failure_is_not_an_empty_result() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "app.py", THREE_FUNCTIONS);
    let backend: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
    service_on(Arc::clone(&backend), &Providers::default())
        .index_workspace(dir.path(), &[], None)
        .await
        .unwrap();

    let failing = service_on(
        backend,
        &Providers {
            embed: MockProvider::default().failing_embed(),
            ..Providers::default()
        },
    );
    let err = failing
        .search_code(dir.path(), "alpha", 3, None, false)
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::Embedding(_)));
}

#[tokio::test]
async fn clear_index_forces_full_reindex() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.py", "def a():\n    pass\n");
    let service = service(&Providers::default());
    service.index_workspace(dir.path(), &[], None).await.unwrap();

    service.clear_index(dir.path()).await.unwrap();
    let err = service
        .search_code(dir.path(), "a", 1, None, false)
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::NotIndexed(_)));

    let report = service.index_workspace(dir.path(), &[], None).await.unwrap();
    assert_eq!(report.files_indexed, 1);
}
