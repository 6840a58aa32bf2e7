//! Vector Store Integration Tests
//!
//! Stores built through the ingestor must answer queries after the process
//! reopens them from disk.

use std::sync::Arc;

use serde_json::json;

use deep_reader::services::knowledge::chunker::RagChunker;
use deep_reader::services::knowledge::{
    DocumentIngestor, IngestStatus, LocalHashEmbeddingProvider, VectorStore,
};

fn ingestor(dir: &std::path::Path) -> DocumentIngestor {
    DocumentIngestor::new(
        dir.join("memory"),
        Arc::new(LocalHashEmbeddingProvider::new(64)),
        RagChunker::new(200, 20).unwrap(),
        4,
    )
}

#[tokio::test]
async fn test_exact_query_returns_added_text_first() {
    let dir = tempfile::tempdir().unwrap();
    let store = VectorStore::open(
        dir.path(),
        "fresh",
        Arc::new(LocalHashEmbeddingProvider::new(64)),
        2,
    )
    .await
    .unwrap();

    let text = "Forty ships entered the harbour before the storm.".to_string();
    let ids = store.add(&[text.clone()], &[json!({"source": "log"})]).await.unwrap();
    assert_eq!(ids.len(), 1);

    let hits = store.search(&text, 5).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].content, text);
    assert_eq!(hits[0].id, ids[0]);
    assert_eq!(hits[0].metadata["source"], "log");
}

#[tokio::test]
async fn test_ingested_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let document = "The harbour master kept a log. ".repeat(40)
        + "A storm closed the port for three days in March. "
        + &"Cargo was counted at the quay. ".repeat(40);

    let first = ingestor(dir.path());
    let report = first.ingest("/docs/harbour.md", &document).await.unwrap();
    assert_eq!(report.status, IngestStatus::Created);
    assert!(report.chunk_count > 1);
    drop(first);

    let second = ingestor(dir.path());
    let again = second.ingest("/docs/harbour.md", &document).await.unwrap();
    assert_eq!(again.status, IngestStatus::SkippedExisting);
    assert_eq!(again.store_name, report.store_name);

    let store = second.open_store("/docs/harbour.md").await.unwrap();
    assert_eq!(store.len().await.unwrap(), report.chunk_count);
    let hits = store.search("storm closed the port", 3).await.unwrap();
    assert!(!hits.is_empty());
    assert!(hits.iter().any(|h| h.content.contains("storm")));
}

#[tokio::test]
async fn test_ids_keep_growing_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let embedder = Arc::new(LocalHashEmbeddingProvider::new(32));

    let first_ids = {
        let store = VectorStore::open(dir.path(), "grow", embedder.clone(), 8).await.unwrap();
        store
            .add(&["alpha".to_string(), "beta".to_string()], &[json!({}), json!({})])
            .await
            .unwrap()
    };

    let store = VectorStore::open(dir.path(), "grow", embedder, 8).await.unwrap();
    let next = store.add(&["gamma".to_string()], &[json!({})]).await.unwrap();

    assert!(next[0] > *first_ids.iter().max().unwrap());
    assert_eq!(store.len().await.unwrap(), 3);
    assert_eq!(store.search("gamma", 1).await.unwrap()[0].content, "gamma");
}
