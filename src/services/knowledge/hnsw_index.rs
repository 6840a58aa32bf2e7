//! HNSW Vector Index
//!
//! Wraps the `hnsw_rs` crate for approximate nearest neighbor search over
//! store embeddings. The index is a derived cache: the vector store's
//! SQLite table keeps every embedding, and the HNSW files can be deleted
//! and rebuilt from it at any time.
//!
//! ## Persistence
//!
//! Two sidecar files per store, named after the store:
//! - `<dir>/<name>.hnsw.graph`
//! - `<dir>/<name>.hnsw.data`
//!
//! ## Soft-Delete
//!
//! `hnsw_rs` cannot remove points, so ids rolled back by a failed add are
//! tracked as stale and filtered from search results.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hnsw_rs::prelude::*;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// HNSW tuning parameters.
const MAX_NB_CONNECTION: usize = 24;
const MAX_LAYER: usize = 16;
const EF_CONSTRUCTION: usize = 200;
const EF_SEARCH: usize = 64;

/// Initial capacity hint; the graph can grow past it.
const DEFAULT_MAX_ELEMENTS: usize = 100_000;

pub struct HnswIndex {
    index_dir: PathBuf,
    basename: String,
    dimension: usize,
    /// `None` until `initialize`, `load_from_disk`, or a rebuild.
    inner: RwLock<Option<Arc<HnswInner>>>,
    stale_ids: RwLock<HashSet<usize>>,
    /// Points inserted, including stale ones.
    count: RwLock<usize>,
}

/// Newtype so the graph can cross threads.
///
/// The `'static` lifetime holds because graphs created with `Hnsw::new()`
/// own their data, and the `HnswIo` used for loading is leaked so the
/// loaded graph may borrow from it.
struct HnswInner {
    hnsw: Hnsw<'static, f32, DistCosine>,
}

// SAFETY: hnsw_rs::Hnsw<'static, f32, DistCosine> uses Arc-based internal
// storage and is safe to share across threads.
unsafe impl Send for HnswInner {}
unsafe impl Sync for HnswInner {}

impl HnswInner {
    fn empty() -> Self {
        Self {
            hnsw: Hnsw::<f32, DistCosine>::new(
                MAX_NB_CONNECTION,
                DEFAULT_MAX_ELEMENTS,
                MAX_LAYER,
                EF_CONSTRUCTION,
                DistCosine,
            ),
        }
    }
}

impl HnswIndex {
    pub fn new(index_dir: impl AsRef<Path>, basename: impl Into<String>, dimension: usize) -> Self {
        Self {
            index_dir: index_dir.as_ref().to_path_buf(),
            basename: basename.into(),
            dimension,
            inner: RwLock::new(None),
            stale_ids: RwLock::new(HashSet::new()),
            count: RwLock::new(0),
        }
    }

    pub fn graph_path(&self) -> PathBuf {
        self.index_dir.join(format!("{}.hnsw.graph", self.basename))
    }

    pub fn data_path(&self) -> PathBuf {
        self.index_dir.join(format!("{}.hnsw.data", self.basename))
    }

    /// Whether both persisted files exist.
    pub fn files_exist(&self) -> bool {
        self.graph_path().exists() && self.data_path().exists()
    }

    /// Initialize the index with an empty HNSW graph.
    pub async fn initialize(&self) {
        *self.inner.write().await = Some(Arc::new(HnswInner::empty()));
        *self.count.write().await = 0;
        self.stale_ids.write().await.clear();
    }

    /// Try to load the index from disk.
    ///
    /// Returns `true` if loaded, `false` if the files are missing or
    /// unreadable. Corrupt files are removed so the caller can rebuild.
    pub async fn load_from_disk(&self) -> bool {
        let graph_file = self.graph_path();
        let data_file = self.data_path();

        if !graph_file.exists() || !data_file.exists() {
            debug!(index = %self.basename, "HNSW load_from_disk: files not found");
            return false;
        }

        // hnsw_rs can panic on empty files
        let non_empty = |p: &Path| std::fs::metadata(p).map(|m| m.len() > 0).unwrap_or(false);
        if !non_empty(&graph_file) || !non_empty(&data_file) {
            warn!(index = %self.basename, "HNSW load_from_disk: files exist but are empty");
            return false;
        }

        let index_dir = self.index_dir.clone();
        let basename = self.basename.clone();
        let load_result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let io = Box::leak(Box::new(HnswIo::new(&index_dir, &basename)));
            let result: Result<Hnsw<'static, f32, DistCosine>, _> =
                io.load_hnsw_with_dist(DistCosine);
            result
        }));

        match load_result {
            Ok(Ok(hnsw)) => {
                let nb_point = hnsw.get_nb_point();
                *self.inner.write().await = Some(Arc::new(HnswInner { hnsw }));
                *self.count.write().await = nb_point;
                self.stale_ids.write().await.clear();
                info!(index = %self.basename, points = nb_point, "HNSW loaded from disk");
                true
            }
            Ok(Err(e)) => {
                warn!(index = %self.basename, error = %e, "HNSW load_from_disk failed");
                false
            }
            Err(_panic) => {
                warn!(index = %self.basename, "HNSW files are corrupt, removing them");
                let _ = std::fs::remove_file(&graph_file);
                let _ = std::fs::remove_file(&data_file);
                false
            }
        }
    }

    /// Save the index to disk, creating the directory if needed.
    pub async fn save_to_disk(&self) -> Result<(), String> {
        let inner = match self.inner.read().await.as_ref() {
            Some(inner) => Arc::clone(inner),
            None => return Err("HNSW index not initialized".to_string()),
        };

        let index_dir = self.index_dir.clone();
        let basename = self.basename.clone();

        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&index_dir)
                .map_err(|e| format!("failed to create HNSW dir: {}", e))?;
            inner
                .hnsw
                .file_dump(&index_dir, &basename)
                .map_err(|e| format!("HNSW file_dump failed: {}", e))?;
            Ok(())
        })
        .await
        .map_err(|e| format!("spawn_blocking panicked: {}", e))?
    }

    /// Insert vectors under their data ids.
    pub async fn batch_insert(&self, items: &[(usize, Vec<f32>)]) -> Result<(), String> {
        if items.is_empty() {
            return Ok(());
        }
        if let Some((id, v)) = items.iter().find(|(_, v)| v.len() != self.dimension) {
            return Err(format!(
                "vector for id {} has dimension {}, index expects {}",
                id,
                v.len(),
                self.dimension
            ));
        }
        let guard = self.inner.read().await;
        let inner = guard
            .as_ref()
            .ok_or_else(|| "HNSW index not initialized".to_string())?;
        for (id, embedding) in items {
            inner.hnsw.insert_slice((embedding, *id));
        }
        drop(guard);
        *self.count.write().await += items.len();
        Ok(())
    }

    /// Replace the graph with one built from `vectors`.
    ///
    /// Vectors of the wrong dimension are skipped. Returns how many were
    /// inserted.
    pub async fn rebuild_from_vectors(&self, vectors: &[(usize, Vec<f32>)]) -> usize {
        let fresh = HnswInner::empty();
        let mut inserted = 0;
        for (id, embedding) in vectors {
            if embedding.len() != self.dimension {
                warn!(index = %self.basename, id, "skipping vector with mismatched dimension");
                continue;
            }
            fresh.hnsw.insert_slice((embedding, *id));
            inserted += 1;
        }
        *self.inner.write().await = Some(Arc::new(fresh));
        *self.count.write().await = inserted;
        self.stale_ids.write().await.clear();
        inserted
    }

    /// Search for the `top_k` nearest neighbors of `query`.
    ///
    /// Returns `(data_id, distance)` pairs sorted by distance ascending,
    /// with stale ids removed. Fewer than `top_k` pairs come back when the
    /// index holds fewer live points.
    pub async fn search(&self, query: &[f32], top_k: usize) -> Vec<(usize, f32)> {
        if top_k == 0 {
            return Vec::new();
        }
        let inner = match self.inner.read().await.as_ref() {
            Some(inner) => Arc::clone(inner),
            None => return Vec::new(),
        };
        let stale_snapshot: HashSet<usize> = self.stale_ids.read().await.clone();
        let query_vec = query.to_vec();

        let result = tokio::task::spawn_blocking(move || {
            let ef = EF_SEARCH.max(top_k * 2);
            let request_k = top_k + stale_snapshot.len();
            let neighbours = inner.hnsw.search(&query_vec, request_k, ef);

            let mut results: Vec<(usize, f32)> = neighbours
                .into_iter()
                .filter(|n| !stale_snapshot.contains(&n.d_id))
                .map(|n| (n.d_id, n.distance))
                .collect();

            results.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
            results.truncate(top_k);
            results
        })
        .await;

        result.unwrap_or_default()
    }

    /// Mark data ids as stale (soft-delete).
    pub async fn mark_stale(&self, ids: impl IntoIterator<Item = usize>) {
        self.stale_ids.write().await.extend(ids);
    }

    /// Number of live (non-stale) points.
    pub async fn live_count(&self) -> usize {
        let count = *self.count.read().await;
        count.saturating_sub(self.stale_ids.read().await.len())
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
