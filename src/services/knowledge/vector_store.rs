//! Vector Store
//!
//! Persistent evidence store pairing a SQLite content table with an HNSW
//! similarity index. Records are identified by the SQLite autoincrement id,
//! which doubles as the HNSW data id, so ids stay stable across restarts.
//!
//! Layout per store, all under one directory and named after the store:
//! - `<name>.sqlite`: `chunks(id, content, metadata, embedding, created_at)`
//! - `<name>.hnsw.graph` / `<name>.hnsw.data`: the persisted index
//!
//! SQLite is authoritative. On open the index is loaded from disk and
//! rebuilt from the stored embeddings when it is missing or its point count
//! disagrees with the table.
//!
//! ## Concurrency
//!
//! One writer per store. `add` calls on the same `VectorStore` value are
//! serialized by an internal lock, but two `VectorStore` values (or two
//! processes) opened on the same name are not coordinated. Store names are
//! derived from the document path hash so separate documents never share
//! a store.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, params_from_iter};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::embedding_provider::{EmbeddingError, EmbeddingProvider, EmbeddingResult};
use super::hnsw_index::HnswIndex;
use crate::storage::database::Database;
use crate::utils::error::{AppError, AppResult};

/// Attempts per embedding call; only transient errors are retried.
const EMBED_ATTEMPTS: u32 = 3;
const MAX_EMBED_DELAY_SECS: u64 = 8;

/// One retrieved record, in similarity order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: i64,
    pub content: String,
    pub metadata: Value,
    /// Cosine distance to the query (0 = identical).
    pub distance: f32,
}

/// Top-k evidence lookup, the only capability the reading and report
/// stages need from the store.
#[async_trait]
pub trait EvidenceRetriever: Send + Sync {
    async fn search(&self, query: &str, k: usize) -> AppResult<Vec<SearchHit>>;
}

pub struct VectorStore {
    name: String,
    dir: PathBuf,
    db: Database,
    index: HnswIndex,
    embedder: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    write_lock: Mutex<()>,
}

impl VectorStore {
    pub fn sqlite_path(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{}.sqlite", name))
    }

    /// Whether both the content table and the persisted index exist for
    /// `name`, meaning ingestion can be skipped.
    pub fn files_exist(dir: &Path, name: &str) -> bool {
        Self::sqlite_path(dir, name).exists()
            && HnswIndex::new(dir, name, 0).files_exist()
    }

    /// Open or create the store `name` under `dir`. `batch_size` is capped
    /// at what the embedder accepts per request.
    pub async fn open(
        dir: &Path,
        name: &str,
        embedder: Arc<dyn EmbeddingProvider>,
        batch_size: usize,
    ) -> AppResult<Self> {
        std::fs::create_dir_all(dir)?;
        let db = Database::open(&Self::sqlite_path(dir, name))?;
        Self::init_schema(&db)?;

        let batch_size = batch_size.min(embedder.max_batch_size()).max(1);
        debug!(
            store = name,
            embedder = embedder.display_name(),
            batch_size,
            "Opening vector store"
        );

        let store = Self {
            name: name.to_string(),
            dir: dir.to_path_buf(),
            index: HnswIndex::new(dir, name, embedder.dimension()),
            db,
            embedder,
            batch_size,
            write_lock: Mutex::new(()),
        };
        store.load_or_rebuild_index().await?;
        Ok(store)
    }

    fn init_schema(db: &Database) -> AppResult<()> {
        let conn = db.get_connection()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                content TEXT NOT NULL,
                metadata TEXT NOT NULL,
                embedding BLOB NOT NULL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;
        Ok(())
    }

    async fn load_or_rebuild_index(&self) -> AppResult<()> {
        let rows = self.len().await?;
        if self.index.load_from_disk().await && self.index.live_count().await == rows {
            return Ok(());
        }

        if rows == 0 {
            self.index.initialize().await;
            return Ok(());
        }

        let vectors = self.all_embeddings()?;
        let inserted = self.index.rebuild_from_vectors(&vectors).await;
        info!(store = %self.name, rows, inserted, "Rebuilt similarity index from SQLite");
        if inserted != rows {
            return Err(AppError::index(format!(
                "store {} holds {} rows but only {} embeddings match dimension {}",
                self.name,
                rows,
                inserted,
                self.index.dimension()
            )));
        }
        self.index.save_to_disk().await.map_err(AppError::index)
    }

    fn all_embeddings(&self) -> AppResult<Vec<(usize, Vec<f32>)>> {
        let conn = self.db.get_connection()?;
        let mut stmt = conn.prepare("SELECT id, embedding FROM chunks ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            let id: i64 = row.get(0)?;
            let blob: Vec<u8> = row.get(1)?;
            Ok((id as usize, bytes_to_embedding(&blob)))
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(AppError::from)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of stored records.
    pub async fn len(&self) -> AppResult<usize> {
        let conn = self.db.get_connection()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub async fn is_empty(&self) -> AppResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Texts sent to the embedder per request.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Run an embedding call, retrying transient failures with exponential
    /// backoff. A provider-suggested wait longer than the backoff wins.
    async fn embed_with_retry<T, F, Fut>(&self, mut call: F) -> EmbeddingResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EmbeddingResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt + 1 < EMBED_ATTEMPTS => {
                    let delay = std::cmp::min(1u64 << attempt, MAX_EMBED_DELAY_SECS);
                    let wait = e.retry_after_secs().map_or(delay, |r| std::cmp::max(r, delay));
                    warn!(
                        store = %self.name,
                        error = %e,
                        attempt = attempt + 1,
                        wait_secs = wait,
                        "Embedding failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Embed and persist `texts` with their `metadatas`, returning the new ids
    /// in input order.
    ///
    /// All embedding batches run before anything is written, so an embedding
    /// failure leaves the store untouched. Rows are inserted in one
    /// transaction, then indexed, then the index is saved. If saving fails
    /// the new rows are deleted and their index points marked stale, so the
    /// table and the index never disagree.
    pub async fn add(&self, texts: &[String], metadatas: &[Value]) -> AppResult<Vec<i64>> {
        if texts.len() != metadatas.len() {
            return Err(AppError::validation(format!(
                "got {} texts but {} metadata objects",
                texts.len(),
                metadatas.len()
            )));
        }
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let _guard = self.write_lock.lock().await;

        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let refs: Vec<&str> = batch.iter().map(String::as_str).collect();
            let vectors = self
                .embed_with_retry(|| self.embedder.embed_documents(&refs))
                .await?;
            if vectors.len() != batch.len() {
                return Err(AppError::Embedding(EmbeddingError::ParseError {
                    message: format!(
                        "expected {} embeddings, provider returned {}",
                        batch.len(),
                        vectors.len()
                    ),
                }));
            }
            if let Some(v) = vectors.iter().find(|v| v.len() != self.index.dimension()) {
                return Err(AppError::Embedding(EmbeddingError::DimensionMismatch {
                    expected: self.index.dimension(),
                    actual: v.len(),
                }));
            }
            embeddings.extend(vectors);
        }
        debug!(store = %self.name, count = texts.len(), "Embedded chunks");

        let ids = self.insert_rows(texts, metadatas, &embeddings)?;

        let items: Vec<(usize, Vec<f32>)> = ids
            .iter()
            .map(|id| *id as usize)
            .zip(embeddings)
            .collect();
        let indexed = match self.index.batch_insert(&items).await {
            Ok(()) => self.index.save_to_disk().await,
            Err(e) => Err(e),
        };

        if let Err(e) = indexed {
            warn!(store = %self.name, error = %e, "Index update failed, rolling back rows");
            self.index.mark_stale(ids.iter().map(|id| *id as usize)).await;
            self.delete_rows(&ids)?;
            return Err(AppError::index(e));
        }

        info!(store = %self.name, added = ids.len(), "Added chunks to vector store");
        Ok(ids)
    }

    fn insert_rows(
        &self,
        texts: &[String],
        metadatas: &[Value],
        embeddings: &[Vec<f32>],
    ) -> AppResult<Vec<i64>> {
        let mut conn = self.db.get_connection()?;
        let tx = conn.transaction()?;
        let mut ids = Vec::with_capacity(texts.len());
        {
            let mut stmt =
                tx.prepare("INSERT INTO chunks (content, metadata, embedding) VALUES (?1, ?2, ?3)")?;
            for ((text, metadata), embedding) in texts.iter().zip(metadatas).zip(embeddings) {
                stmt.execute(params![
                    text,
                    serde_json::to_string(metadata)?,
                    embedding_to_bytes(embedding)
                ])?;
                ids.push(tx.last_insert_rowid());
            }
        }
        tx.commit()?;
        Ok(ids)
    }

    fn delete_rows(&self, ids: &[i64]) -> AppResult<()> {
        let conn = self.db.get_connection()?;
        let placeholders = vec!["?"; ids.len()].join(",");
        conn.execute(
            &format!("DELETE FROM chunks WHERE id IN ({})", placeholders),
            params_from_iter(ids.iter()),
        )?;
        Ok(())
    }

    fn fetch_rows(&self, ids: &[i64]) -> AppResult<HashMap<i64, (String, Value)>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let conn = self.db.get_connection()?;
        let placeholders = vec!["?"; ids.len()].join(",");
        let mut stmt = conn.prepare(&format!(
            "SELECT id, content, metadata FROM chunks WHERE id IN ({})",
            placeholders
        ))?;
        let rows = stmt.query_map(params_from_iter(ids.iter()), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut out = HashMap::new();
        for row in rows {
            let (id, content, metadata) = row?;
            let metadata = serde_json::from_str(&metadata).unwrap_or(Value::Null);
            out.insert(id, (content, metadata));
        }
        Ok(out)
    }

    /// Top-`k` records for `query` in similarity order. Index hits whose
    /// row is missing from SQLite are dropped.
    pub async fn search(&self, query: &str, k: usize) -> AppResult<Vec<SearchHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query_vec = self
            .embed_with_retry(|| self.embedder.embed_query(query))
            .await?;
        let neighbours = self.index.search(&query_vec, k).await;
        let ids: Vec<i64> = neighbours.iter().map(|(id, _)| *id as i64).collect();
        let mut rows = self.fetch_rows(&ids)?;

        let hits: Vec<SearchHit> = neighbours
            .into_iter()
            .filter_map(|(id, distance)| {
                let id = id as i64;
                match rows.remove(&id) {
                    Some((content, metadata)) => Some(SearchHit {
                        id,
                        content,
                        metadata,
                        distance,
                    }),
                    None => {
                        debug!(store = %self.name, id, "Index hit has no row, dropping");
                        None
                    }
                }
            })
            .collect();
        Ok(hits)
    }
}

#[async_trait]
impl EvidenceRetriever for VectorStore {
    async fn search(&self, query: &str, k: usize) -> AppResult<Vec<SearchHit>> {
        VectorStore::search(self, query, k).await
    }
}

/// Join retrieved contents with the evidence separator used in prompts.
pub fn join_evidence(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|h| h.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

/// Serialize an f32 vector to bytes (little-endian) for BLOB storage.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for val in embedding {
        bytes.extend_from_slice(&val.to_le_bytes());
    }
    bytes
}

/// Deserialize bytes (little-endian) back to an f32 vector.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
