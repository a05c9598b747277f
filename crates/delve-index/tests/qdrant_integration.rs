use std::sync::Arc;
use std::time::Duration;

use delve_index::chunker::ChunkType;
use delve_index::qdrant_ops::QdrantOps;
use delve_index::store::{
    ChunkPayload, CodeStore, FusionWeights, IndexedPoint, QueryVectors, SearchFilters, point_id,
};
use delve_index::vector_store::HnswParams;
use testcontainers::ContainerAsync;
use testcontainers::GenericImage;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;

const QDRANT_GRPC_PORT: ContainerPort = ContainerPort::Tcp(6334);
const COLLECTION: &str = "delve_code_test";

fn qdrant_image() -> GenericImage {
    GenericImage::new("qdrant/qdrant", "v1.16.0")
        .with_wait_for(WaitFor::message_on_stdout("gRPC listening"))
        .with_exposed_port(QDRANT_GRPC_PORT)
}

async fn setup_with_qdrant() -> (CodeStore, ContainerAsync<GenericImage>) {
    let container = qdrant_image().start().await.unwrap();
    let grpc_port = container.get_host_port_ipv4(6334).await.unwrap();
    let url = format!("http://127.0.0.1:{grpc_port}");
    let ops = QdrantOps::new(&url, Duration::from_secs(10)).unwrap();
    (
        CodeStore::new(Arc::new(ops), 2, HnswParams::default()),
        container,
    )
}

fn point(file: &str, name: &str, index: usize, language: &str, content: [f32; 2]) -> IndexedPoint {
    IndexedPoint {
        id: point_id(file, index),
        content_vec: content.to_vec(),
        title_vec: vec![0.0, 1.0],
        breadcrumb_vec: vec![0.0, 1.0],
        payload: ChunkPayload {
            workspace_id: "ws".into(),
            file_path: file.into(),
            function_name: Some(name.into()),
            parent_symbol: None,
            language: language.into(),
            chunk_type: ChunkType::Function,
            chunk_index: index,
            start_line: index * 3,
            end_line: index * 3 + 2,
            complexity: 0.3,
            content: format!("fn {name}() {{}}"),
            context_snippet: format!("{name} helper"),
        },
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn create_collection_is_idempotent() {
    let (store, _container) = setup_with_qdrant().await;
    store.create_collection(COLLECTION).await.unwrap();
    store.create_collection(COLLECTION).await.unwrap();
    assert!(store.collection_exists(COLLECTION).await.unwrap());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn fusion_search_with_prefilter_round_trips_payload() {
    let (store, _container) = setup_with_qdrant().await;
    store.create_collection(COLLECTION).await.unwrap();
    store
        .upsert(
            COLLECTION,
            vec![
                point("a.rs", "alpha", 0, "rust", [1.0, 0.0]),
                point("a.rs", "beta", 1, "rust", [0.8, 0.6]),
                point("b.py", "gamma", 0, "python", [1.0, 0.0]),
            ],
        )
        .await
        .unwrap();

    let weights = FusionWeights {
        content: 1.0,
        title: 0.0,
        breadcrumb: 0.0,
    };
    let filters = SearchFilters {
        workspace_id: Some("ws".into()),
        language: Some("rust".into()),
        file_path: None,
    };
    let results = store
        .search(
            COLLECTION,
            &QueryVectors::content_only(vec![1.0, 0.0]),
            5,
            Some(&filters),
            Some(&weights),
        )
        .await
        .unwrap();

    let names: Vec<_> = results
        .iter()
        .map(|r| r.function_name.as_deref().unwrap())
        .collect();
    assert_eq!(names, vec!["alpha", "beta"]);
    assert_eq!(results[0].context_snippet, "alpha helper");
    assert_eq!(results[1].start_line, 3);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn stale_tail_and_symbol_lookup() {
    let (store, _container) = setup_with_qdrant().await;
    store.create_collection(COLLECTION).await.unwrap();
    store
        .upsert(
            COLLECTION,
            vec![
                point("a.rs", "alpha", 0, "rust", [1.0, 0.0]),
                point("a.rs", "beta", 1, "rust", [0.8, 0.6]),
                point("a.rs", "gamma", 2, "rust", [0.6, 0.8]),
            ],
        )
        .await
        .unwrap();

    store.delete_stale(COLLECTION, "a.rs", 1).await.unwrap();
    assert_eq!(store.count(COLLECTION).await.unwrap(), 1);

    let hits = store
        .find_by_symbol(COLLECTION, "alpha", None, 10)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].file_path, "a.rs");

    store.delete_collection(COLLECTION).await.unwrap();
    assert!(!store.collection_exists(COLLECTION).await.unwrap());
}
