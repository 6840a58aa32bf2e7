//! SQLite Checkpointer
//!
//! `Checkpointer` backed by SQLite so runs survive process restarts. The
//! run state is stored as one JSON column next to the few fields needed to
//! find and list checkpoints without decoding it.

use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::Row;

use super::checkpointer::{Checkpointer, RunCheckpoint};
use crate::models::state::{RunStage, RunState};
use crate::storage::database::DbPool;
use crate::utils::error::{AppError, AppResult};

const SELECT_COLUMNS: &str = "SELECT id, thread_id, stage, state, created_at FROM run_checkpoints";

pub struct SqliteCheckpointer {
    pool: Arc<DbPool>,
}

impl SqliteCheckpointer {
    /// Wrap `pool`, creating the checkpoints table if needed.
    pub fn new(pool: Arc<DbPool>) -> AppResult<Self> {
        let conn = pool
            .get()
            .map_err(|e| AppError::database(format!("Failed to get connection: {}", e)))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS run_checkpoints (
                id TEXT PRIMARY KEY,
                thread_id TEXT NOT NULL,
                stage TEXT NOT NULL,
                state TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_run_checkpoints_thread_id
                ON run_checkpoints(thread_id, created_at DESC);",
        )
        .map_err(|e| AppError::database(format!("Failed to create checkpoints table: {}", e)))?;

        Ok(Self { pool })
    }

    /// Run `f` with a pooled connection on the blocking thread pool.
    async fn with_conn<T, F>(&self, f: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> AppResult<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool
                .get()
                .map_err(|e| AppError::database(format!("Failed to get connection: {}", e)))?;
            f(&conn)
        })
        .await
        .map_err(|e| AppError::database(format!("Task join error: {}", e)))?
    }
}

#[async_trait]
impl Checkpointer for SqliteCheckpointer {
    async fn save(&self, checkpoint: RunCheckpoint) -> AppResult<()> {
        self.with_conn(move |conn| {
            let state_json = serde_json::to_string(&checkpoint.state)?;
            conn.execute(
                "INSERT OR REPLACE INTO run_checkpoints (id, thread_id, stage, state, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    checkpoint.id,
                    checkpoint.thread_id,
                    checkpoint.stage.to_string(),
                    state_json,
                    checkpoint.created_at,
                ],
            )
            .map_err(|e| AppError::database(format!("Failed to save checkpoint: {}", e)))?;
            Ok(())
        })
        .await
    }

    async fn load(&self, thread_id: &str) -> AppResult<Option<RunCheckpoint>> {
        let tid = thread_id.to_string();
        self.with_conn(move |conn| {
            let sql = format!(
                "{} WHERE thread_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                SELECT_COLUMNS
            );
            query_optional(conn, &sql, &tid)
        })
        .await
    }

    async fn load_by_id(&self, checkpoint_id: &str) -> AppResult<Option<RunCheckpoint>> {
        let cid = checkpoint_id.to_string();
        self.with_conn(move |conn| {
            let sql = format!("{} WHERE id = ?1", SELECT_COLUMNS);
            query_optional(conn, &sql, &cid)
        })
        .await
    }

    async fn list(&self, thread_id: &str) -> AppResult<Vec<RunCheckpoint>> {
        let tid = thread_id.to_string();
        self.with_conn(move |conn| {
            let sql = format!(
                "{} WHERE thread_id = ?1 ORDER BY created_at DESC, rowid DESC",
                SELECT_COLUMNS
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| AppError::database(format!("Failed to prepare statement: {}", e)))?;
            let rows = stmt
                .query_map(rusqlite::params![tid], raw_row)
                .map_err(|e| AppError::database(format!("Failed to query checkpoints: {}", e)))?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(parse_checkpoint_row).collect()
        })
        .await
    }

    async fn delete(&self, checkpoint_id: &str) -> AppResult<bool> {
        let cid = checkpoint_id.to_string();
        self.with_conn(move |conn| {
            let deleted = conn
                .execute("DELETE FROM run_checkpoints WHERE id = ?1", rusqlite::params![cid])
                .map_err(|e| AppError::database(format!("Failed to delete checkpoint: {}", e)))?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn prune(&self, thread_id: &str, keep: usize) -> AppResult<usize> {
        let tid = thread_id.to_string();
        let keep = i64::try_from(keep).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            let deleted = conn
                .execute(
                    "DELETE FROM run_checkpoints
                     WHERE thread_id = ?1 AND id NOT IN (
                         SELECT id FROM run_checkpoints WHERE thread_id = ?1
                         ORDER BY created_at DESC, rowid DESC LIMIT ?2
                     )",
                    rusqlite::params![tid, keep],
                )
                .map_err(|e| AppError::database(format!("Failed to prune checkpoints: {}", e)))?;
            Ok(deleted)
        })
        .await
    }
}

// ============================================================================
// Internal Helpers
// ============================================================================

/// Row data before the JSON state is decoded.
struct RawCheckpointRow {
    id: String,
    thread_id: String,
    stage: String,
    state: String,
    created_at: String,
}

fn raw_row(row: &Row<'_>) -> rusqlite::Result<RawCheckpointRow> {
    Ok(RawCheckpointRow {
        id: row.get(0)?,
        thread_id: row.get(1)?,
        stage: row.get(2)?,
        state: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn query_optional(
    conn: &rusqlite::Connection,
    sql: &str,
    key: &str,
) -> AppResult<Option<RunCheckpoint>> {
    match conn.query_row(sql, rusqlite::params![key], raw_row) {
        Ok(raw) => Ok(Some(parse_checkpoint_row(raw)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(AppError::database(format!("Failed to load checkpoint: {}", e))),
    }
}

fn parse_checkpoint_row(raw: RawCheckpointRow) -> AppResult<RunCheckpoint> {
    let state: RunState = serde_json::from_str(&raw.state).map_err(|e| {
        AppError::database(format!("Checkpoint {} has an unreadable state: {}", raw.id, e))
    })?;
    let stage: RunStage = serde_json::from_value(serde_json::Value::String(raw.stage.clone()))
        .map_err(|_| AppError::database(format!("Unknown checkpoint stage '{}'", raw.stage)))?;

    Ok(RunCheckpoint {
        id: raw.id,
        thread_id: raw.thread_id,
        stage,
        state,
        created_at: raw.created_at,
    })
}

// ============================================================================
// Tests
// ============================================================================
