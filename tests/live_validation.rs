use std::{env, sync::Once};

use chunklab::chunking::ChunkingMethod;
use chunklab::index::{IndexPoint, build_vector_index};
use chunklab::metrics::ServiceMetrics;
use chunklab::{chunking, config, embedding};
use std::sync::Arc;

static INIT: Once = Once::new();

fn set_default_env(key: &str, value: &str) {
    let needs_value = env::var(key).map(|v| v.trim().is_empty()).unwrap_or(true);
    if needs_value {
        // SAFETY: Tests run serially via Once and we intentionally mutate process env.
        unsafe {
            env::set_var(key, value);
        }
    }
}

fn init_config_once() {
    INIT.call_once(|| {
        set_default_env("VECTOR_BACKEND", "qdrant");
        set_default_env("QDRANT_URL", "http://127.0.0.1:6333");
        set_default_env("QDRANT_COLLECTION_PREFIX", "chunklab-live");
        set_default_env("EMBEDDING_PROVIDER", "ollama");
        set_default_env("EMBEDDING_MODEL", "nomic-embed-text");
        set_default_env("EMBEDDING_DIMENSION", "768");
        set_default_env("OLLAMA_URL", "http://127.0.0.1:11434");
        config::init_config();
    });
}

#[tokio::test]
#[ignore = "Requires live Qdrant"]
async fn live_qdrant_partition_roundtrip() {
    init_config_once();
    let config = config::get_config();
    let index = build_vector_index(config, Arc::new(ServiceMetrics::new()))
        .expect("qdrant index");
    let chunks = chunking::chunk_document(
        "live",
        "Paris is the capital of France.",
        chunking::strategy_for(ChunkingMethod::Sentence, &config.chunking_settings())
            .expect("strategy")
            .as_ref(),
    )
    .expect("chunks");
    let mut vector = vec![0.0; config.embedding_dimension];
    vector[0] = 1.0;
    let points: Vec<IndexPoint> = chunks
        .iter()
        .map(|chunk| IndexPoint::from_chunk(chunk, vector.clone()))
        .collect();

    index.upsert("live-check", points).await.expect("upsert");
    assert_eq!(index.count("live-check").await.expect("count"), chunks.len());
    let hits = index.query("live-check", &vector, 3).await.expect("query");
    assert!(!hits.is_empty(), "expected at least one hit");
    index.drop_partition("live-check").await.expect("drop");
}

#[tokio::test]
#[ignore = "Requires live Ollama embeddings"]
async fn live_ollama_embedding_roundtrip() {
    init_config_once();
    let config = config::get_config();
    let client = embedding::build_embedding_client(config, Arc::new(ServiceMetrics::new()))
        .expect("embedding client");
    let vectors = client
        .generate_embeddings(vec!["chunklab live embedding".to_string()])
        .await
        .expect("failed to request embeddings from provider");
    assert_eq!(vectors.len(), 1, "expected embedding per input text");
    assert_eq!(
        vectors[0].len(),
        config.embedding_dimension,
        "embedding dimension mismatch"
    );
}
