//! Document Ingestion
//!
//! Builds the per-document vector store the reading and writing stages
//! retrieve evidence from. The store name is the SHA-256 of the document
//! path, so a second run over the same document reuses the existing store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::chunker::RagChunker;
use super::embedding_provider::EmbeddingProvider;
use super::vector_store::VectorStore;
use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::sha256_hex;

/// What ingestion did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Created,
    SkippedExisting,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub store_name: String,
    pub status: IngestStatus,
    /// Chunks added by this call. Zero when the store was reused.
    pub chunk_count: usize,
}

pub struct DocumentIngestor {
    memory_dir: PathBuf,
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: RagChunker,
    batch_size: usize,
}

impl DocumentIngestor {
    pub fn new(
        memory_dir: impl Into<PathBuf>,
        embedder: Arc<dyn EmbeddingProvider>,
        chunker: RagChunker,
        batch_size: usize,
    ) -> Self {
        Self {
            memory_dir: memory_dir.into(),
            embedder,
            chunker,
            batch_size,
        }
    }

    /// Store name for a document path.
    pub fn store_name(document_path: &str) -> String {
        sha256_hex(document_path)
    }

    pub fn memory_dir(&self) -> &Path {
        &self.memory_dir
    }

    /// Open the store for `document_path`, creating it empty if needed.
    pub async fn open_store(&self, document_path: &str) -> AppResult<VectorStore> {
        VectorStore::open(
            &self.memory_dir,
            &Self::store_name(document_path),
            Arc::clone(&self.embedder),
            self.batch_size,
        )
        .await
    }

    /// Chunk and embed `content` into the store for `document_path`, unless
    /// that store already exists on disk.
    pub async fn ingest(&self, document_path: &str, content: &str) -> AppResult<IngestReport> {
        let store_name = Self::store_name(document_path);

        if VectorStore::files_exist(&self.memory_dir, &store_name) {
            info!(store = %store_name, "Vector store already exists, skipping ingestion");
            return Ok(IngestReport {
                store_name,
                status: IngestStatus::SkippedExisting,
                chunk_count: 0,
            });
        }

        if content.trim().is_empty() {
            return Err(AppError::validation(format!(
                "document {} has no content to ingest",
                document_path
            )));
        }

        let chunks = self.chunker.chunk(content);
        let metadatas: Vec<_> = (0..chunks.len())
            .map(|i| json!({ "source_id": store_name, "chunk_index": i }))
            .collect();

        let store = self.open_store(document_path).await?;
        let ids = store.add(&chunks, &metadatas).await?;
        info!(store = %store_name, chunks = ids.len(), "Ingested document into vector store");

        Ok(IngestReport {
            store_name,
            status: IngestStatus::Created,
            chunk_count: ids.len(),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
