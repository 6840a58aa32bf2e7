//! Run Checkpointer
//!
//! Snapshots of a document run taken at step boundaries, enabling:
//! - resume after a crash or an interrupted run
//! - inspection of a failed run (`status`)
//!
//! ## Implementations
//! - `InMemoryCheckpointer` - for tests
//! - `SqliteCheckpointer` - persistent (see checkpoint_store.rs)

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::models::state::{RunStage, RunState};
use crate::utils::error::AppResult;

// ============================================================================
// RunCheckpoint
// ============================================================================

/// A snapshot of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCheckpoint {
    /// Unique checkpoint identifier.
    pub id: String,
    /// Document identifier; groups the checkpoints of one document.
    pub thread_id: String,
    /// Stage the run was in when the snapshot was taken.
    pub stage: RunStage,
    pub state: RunState,
    /// Fixed-width RFC 3339 timestamp, so string order is time order.
    pub created_at: String,
}

impl RunCheckpoint {
    pub fn new(thread_id: impl Into<String>, state: RunState) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            thread_id: thread_id.into(),
            stage: state.stage,
            state,
            created_at: chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        }
    }

    /// `true` unless the run finished.
    pub fn is_resumable(&self) -> bool {
        self.stage != RunStage::Completed
    }
}

// ============================================================================
// Checkpointer Trait
// ============================================================================

/// Persists and loads run checkpoints.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Save a checkpoint. A checkpoint with the same ID is replaced.
    async fn save(&self, checkpoint: RunCheckpoint) -> AppResult<()>;

    /// Most recent checkpoint of a thread.
    async fn load(&self, thread_id: &str) -> AppResult<Option<RunCheckpoint>>;

    async fn load_by_id(&self, checkpoint_id: &str) -> AppResult<Option<RunCheckpoint>>;

    /// All checkpoints of a thread, newest first.
    async fn list(&self, thread_id: &str) -> AppResult<Vec<RunCheckpoint>>;

    /// Delete one checkpoint. Returns whether it existed.
    async fn delete(&self, checkpoint_id: &str) -> AppResult<bool>;

    /// Keep only the `keep` newest checkpoints of a thread. Returns how many
    /// were removed.
    async fn prune(&self, thread_id: &str, keep: usize) -> AppResult<usize>;
}

// ============================================================================
// InMemoryCheckpointer
// ============================================================================

/// Checkpoints in a `HashMap`. Lost when the process exits.
pub struct InMemoryCheckpointer {
    store: Arc<RwLock<HashMap<String, (u64, RunCheckpoint)>>>,
    seq: AtomicU64,
}

impl InMemoryCheckpointer {
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(HashMap::new())),
            seq: AtomicU64::new(0),
        }
    }

    async fn sorted(&self, thread_id: &str) -> Vec<RunCheckpoint> {
        let store = self.store.read().await;
        let mut entries: Vec<&(u64, RunCheckpoint)> = store
            .values()
            .filter(|(_, cp)| cp.thread_id == thread_id)
            .collect();
        // Newest first; save order breaks timestamp ties.
        entries.sort_by(|(sa, a), (sb, b)| b.created_at.cmp(&a.created_at).then(sb.cmp(sa)));
        entries.into_iter().map(|(_, cp)| cp.clone()).collect()
    }
}

impl Default for InMemoryCheckpointer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn save(&self, checkpoint: RunCheckpoint) -> AppResult<()> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let mut store = self.store.write().await;
        store.insert(checkpoint.id.clone(), (seq, checkpoint));
        Ok(())
    }

    async fn load(&self, thread_id: &str) -> AppResult<Option<RunCheckpoint>> {
        Ok(self.sorted(thread_id).await.into_iter().next())
    }

    async fn load_by_id(&self, checkpoint_id: &str) -> AppResult<Option<RunCheckpoint>> {
        let store = self.store.read().await;
        Ok(store.get(checkpoint_id).map(|(_, cp)| cp.clone()))
    }

    async fn list(&self, thread_id: &str) -> AppResult<Vec<RunCheckpoint>> {
        Ok(self.sorted(thread_id).await)
    }

    async fn delete(&self, checkpoint_id: &str) -> AppResult<bool> {
        let mut store = self.store.write().await;
        Ok(store.remove(checkpoint_id).is_some())
    }

    async fn prune(&self, thread_id: &str, keep: usize) -> AppResult<usize> {
        let stale: Vec<String> = self
            .sorted(thread_id)
            .await
            .into_iter()
            .skip(keep)
            .map(|cp| cp.id)
            .collect();
        let mut store = self.store.write().await;
        for id in &stale {
            store.remove(id);
        }
        Ok(stale.len())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint(id: &str, thread: &str, stage: RunStage, created_at: &str) -> RunCheckpoint {
        let mut state = RunState::new("/tmp/doc.md", None, None);
        state.stage = stage;
        RunCheckpoint {
            id: id.to_string(),
            thread_id: thread.to_string(),
            stage,
            state,
            created_at: created_at.to_string(),
        }
    }

    // ========================================================================
    // RunCheckpoint Tests
    // ========================================================================

    #[test]
    fn test_checkpoint_new_copies_stage() {
        let mut state = RunState::new("/tmp/doc.md", None, None);
        state.stage = RunStage::Reading;
        let cp = RunCheckpoint::new("thread-1", state);

        assert!(!cp.id.is_empty());
        assert_eq!(cp.stage, RunStage::Reading);
        assert!(cp.is_resumable());
        assert!(cp.created_at.ends_with('Z'));
    }

    #[test]
    fn test_completed_checkpoint_is_not_resumable() {
        let cp = checkpoint("cp-1", "t", RunStage::Completed, "2026-01-01T00:00:00.000000Z");
        assert!(!cp.is_resumable());
    }

    // ========================================================================
    // InMemoryCheckpointer Tests
    // ========================================================================

    #[tokio::test]
    async fn test_in_memory_save_and_load() {
        let store = InMemoryCheckpointer::new();
        let cp = RunCheckpoint::new("thread-1", RunState::new("/tmp/doc.md", None, None));
        let id = cp.id.clone();

        store.save(cp).await.unwrap();

        let loaded = store.load("thread-1").await.unwrap().unwrap();
        assert_eq!(loaded.id, id);
        assert!(store.load("other").await.unwrap().is_none());
        assert!(store.load_by_id(&id).await.unwrap().is_some());
        assert!(store.load_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_in_memory_list_newest_first() {
        let store = InMemoryCheckpointer::new();
        store
            .save(checkpoint("cp-1", "t1", RunStage::Ingest, "2026-01-01T00:00:00.000000Z"))
            .await
            .unwrap();
        store
            .save(checkpoint("cp-2", "t1", RunStage::Reading, "2026-01-02T00:00:00.000000Z"))
            .await
            .unwrap();
        store
            .save(checkpoint("cp-3", "t2", RunStage::Report, "2026-01-03T00:00:00.000000Z"))
            .await
            .unwrap();

        let list = store.list("t1").await.unwrap();
        let ids: Vec<&str> = list.iter().map(|cp| cp.id.as_str()).collect();
        assert_eq!(ids, vec!["cp-2", "cp-1"]);
        assert_eq!(store.load("t1").await.unwrap().unwrap().id, "cp-2");
        assert!(store.list("none").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_in_memory_tie_uses_save_order() {
        let store = InMemoryCheckpointer::new();
        let ts = "2026-01-01T00:00:00.000000Z";
        store.save(checkpoint("a", "t", RunStage::Ingest, ts)).await.unwrap();
        store.save(checkpoint("b", "t", RunStage::Reading, ts)).await.unwrap();
        assert_eq!(store.load("t").await.unwrap().unwrap().id, "b");
    }

    #[tokio::test]
    async fn test_in_memory_delete() {
        let store = InMemoryCheckpointer::new();
        store
            .save(checkpoint("cp-1", "t", RunStage::Ingest, "2026-01-01T00:00:00.000000Z"))
            .await
            .unwrap();

        assert!(store.delete("cp-1").await.unwrap());
        assert!(store.load_by_id("cp-1").await.unwrap().is_none());
        assert!(!store.delete("cp-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_in_memory_prune_keeps_newest() {
        let store = InMemoryCheckpointer::new();
        for (id, day) in [("cp-1", "01"), ("cp-2", "02"), ("cp-3", "03")] {
            let ts = format!("2026-01-{}T00:00:00.000000Z", day);
            store.save(checkpoint(id, "t", RunStage::Reading, &ts)).await.unwrap();
        }
        store
            .save(checkpoint("other", "t2", RunStage::Ingest, "2026-01-01T00:00:00.000000Z"))
            .await
            .unwrap();

        assert_eq!(store.prune("t", 1).await.unwrap(), 2);

        let ids: Vec<String> = store.list("t").await.unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["cp-3"]);
        assert_eq!(store.list("t2").await.unwrap().len(), 1);
        assert_eq!(store.prune("t", 1).await.unwrap(), 0);
    }
}
