use std::io::Write;

use serial_test::serial;

use super::*;

const ENV_KEYS: [&str; 12] = [
    "DELVE_QDRANT_URL",
    "DELVE_EMBEDDING_MODEL",
    "DELVE_EMBEDDING_BASE_URL",
    "DELVE_EMBEDDING_DIMENSIONS",
    "DELVE_CONTEXT_MODEL",
    "DELVE_CONTEXT_BASE_URL",
    "DELVE_CONTEXT_ENABLED",
    "DELVE_RERANK_ENABLED",
    "DELVE_SEARCH_TOP_K",
    "DELVE_INDEX_MAX_FILES",
    "DELVE_VOYAGE_API_KEY",
    "DELVE_OPENAI_API_KEY",
];

fn clear_env() {
    for key in ENV_KEYS {
        unsafe { std::env::remove_var(key) };
    }
}

fn write_config(dir: &tempfile::TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("delve.toml");
    let mut f = std::fs::File::create(&path).unwrap();
    write!(f, "{body}").unwrap();
    path
}

#[test]
fn defaults_when_file_missing() {
    let config = Config::default();
    assert_eq!(config.qdrant.url, "http://localhost:6334");
    assert_eq!(config.embedding.model, "voyage-code-3");
    assert_eq!(config.embedding.dimensions, 1024);
    assert_eq!(config.embedding.batch_size, 128);
    assert_eq!(config.rerank.top_n_display, 10);
    assert_eq!(config.rerank.max_cache, 40);
    assert!(config.context.enabled);
    assert!((config.search.content_weight - 0.7).abs() < f32::EPSILON);
    assert!((config.search.title_weight - 0.2).abs() < f32::EPSILON);
    assert!((config.search.breadcrumb_weight - 0.1).abs() < f32::EPSILON);
    assert!(config.indexing.exclude.iter().any(|p| p.contains("target")));
    config.validate().unwrap();
}

#[test]
#[serial]
fn missing_file_loads_defaults() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.embedding.dimensions, 1024);
    assert!(config.secrets.voyage_api_key.is_none());
}

#[test]
#[serial]
fn partial_toml_keeps_section_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"
[qdrant]
url = "http://qdrant:6334"

[embedding]
dimensions = 512

[search]
title_weight = 0.3

[indexing]
include = ["src/**/*.rs"]
max_files = 200
"#,
    );
    clear_env();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.qdrant.url, "http://qdrant:6334");
    assert_eq!(config.qdrant.timeout_secs, 30);
    assert_eq!(config.embedding.dimensions, 512);
    assert_eq!(config.embedding.batch_size, 128);
    assert!((config.search.title_weight - 0.3).abs() < f32::EPSILON);
    assert!((config.search.content_weight - 0.7).abs() < f32::EPSILON);
    assert_eq!(config.indexing.include, vec!["src/**/*.rs"]);
    assert_eq!(config.indexing.max_files, Some(200));
    assert_eq!(config.rerank.model, "rerank-2.5");
}

#[test]
#[serial]
fn malformed_toml_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[embedding\nmodel = ");
    clear_env();
    assert!(Config::load(&path).is_err());
}

#[test]
#[serial]
fn env_overrides() {
    clear_env();
    let mut config = Config::default();

    unsafe {
        std::env::set_var("DELVE_QDRANT_URL", "http://remote:6334");
        std::env::set_var("DELVE_EMBEDDING_MODEL", "voyage-3-large");
        std::env::set_var("DELVE_CONTEXT_ENABLED", "false");
        std::env::set_var("DELVE_RERANK_ENABLED", "false");
        std::env::set_var("DELVE_VOYAGE_API_KEY", "pa-test");
    };
    config.apply_env_overrides();
    clear_env();

    assert_eq!(config.qdrant.url, "http://remote:6334");
    assert_eq!(config.embedding.model, "voyage-3-large");
    assert!(!config.context.enabled);
    assert!(!config.rerank.enabled);
    assert_eq!(config.secrets.voyage_api_key.as_deref(), Some("pa-test"));
    assert!(config.secrets.openai_api_key.is_none());
}

#[test]
#[serial]
fn invalid_env_values_are_ignored() {
    clear_env();
    let mut config = Config::default();

    unsafe {
        std::env::set_var("DELVE_CONTEXT_ENABLED", "maybe");
        std::env::set_var("DELVE_EMBEDDING_DIMENSIONS", "many");
        std::env::set_var("DELVE_SEARCH_TOP_K", "-3");
    };
    config.apply_env_overrides();
    clear_env();

    assert!(config.context.enabled);
    assert_eq!(config.embedding.dimensions, 1024);
    assert_eq!(config.search.top_k, 10);
}

#[test]
#[serial]
fn blank_api_key_is_unset() {
    clear_env();
    let mut config = Config::default();
    unsafe { std::env::set_var("DELVE_OPENAI_API_KEY", "  ") };
    config.apply_env_overrides();
    clear_env();
    assert!(config.secrets.openai_api_key.is_none());
}

#[test]
fn secrets_are_redacted_in_debug() {
    let secrets = ResolvedSecrets {
        voyage_api_key: Some("pa-secret".into()),
        openai_api_key: None,
    };
    let debug = format!("{secrets:?}");
    assert!(!debug.contains("pa-secret"));
    assert!(debug.contains("<redacted>"));
}

#[test]
fn validate_rejects_zero_dimensions_and_batch() {
    let mut config = Config::default();
    config.embedding.dimensions = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.embedding.batch_size = 0;
    assert!(config.validate().is_err());
}

#[test]
fn validate_rejects_bad_weights() {
    let mut config = Config::default();
    config.search.title_weight = -0.1;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.search.content_weight = 0.0;
    config.search.title_weight = 0.0;
    config.search.breadcrumb_weight = 0.0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.search.content_weight = 1.0;
    config.search.title_weight = 0.0;
    config.search.breadcrumb_weight = 0.0;
    config.validate().unwrap();
}

#[test]
fn conversions_carry_settings() {
    let mut config = Config::default();
    config.embedding.batch_size = 64;
    config.context.enabled = false;
    config.rerank.top_n_display = 5;
    config.qdrant.hnsw_ef = 64;
    config.indexing.fallback_window_lines = 30;
    config.indexing.include = vec!["*.py".into()];
    config.search.keyword_boost = 0.25;

    assert_eq!(config.embedder_config().max_batch_size, 64);
    assert!(!config.context_config().enabled);
    assert_eq!(config.reranker_config().top_n_display, 5);
    assert_eq!(config.reranker_config().max_cache, 40);
    assert_eq!(config.hnsw_params().ef_search, 64);

    let service = config.service_config();
    assert_eq!(service.indexer.chunker.fallback_window_lines, 30);
    assert_eq!(service.indexer.sync.include, vec!["*.py"]);
    assert!(service.indexer.sync.respect_gitignore);
    assert!((service.search.keyword_boost - 0.25).abs() < f32::EPSILON);
    assert!((service.search.weights.content - 0.7).abs() < f32::EPSILON);
}

#[test]
#[serial]
fn shipped_config_matches_defaults() {
    clear_env();
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/delve.toml");
    let config = Config::load(&path).unwrap();
    config.validate().unwrap();
    let defaults = Config::default();
    assert_eq!(config.qdrant.url, defaults.qdrant.url);
    assert_eq!(config.embedding.model, defaults.embedding.model);
    assert_eq!(config.indexing.exclude, defaults.indexing.exclude);
    assert_eq!(config.rerank.max_cache, defaults.rerank.max_cache);
}
