//! Cross-Platform Path Utilities
//!
//! Resolves the Deep Reader data directory (~/.deep-reader/) and derives
//! the content-hash names used for vector stores and run checkpoints.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::utils::error::{AppError, AppResult};

/// Get the user's home directory
pub fn home_dir() -> AppResult<PathBuf> {
    dirs::home_dir().ok_or_else(|| AppError::config("Could not determine home directory"))
}

/// Get the Deep Reader directory (~/.deep-reader/)
pub fn deep_reader_dir() -> AppResult<PathBuf> {
    Ok(home_dir()?.join(".deep-reader"))
}

/// Get the default config file path (~/.deep-reader/config.toml)
pub fn config_path() -> AppResult<PathBuf> {
    Ok(deep_reader_dir()?.join("config.toml"))
}

/// Vector stores live in `<data_dir>/memory/`.
pub fn memory_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("memory")
}

/// Checkpoint database path (`<data_dir>/cache/checkpoints.sqlite`)
pub fn checkpoint_db_path(data_dir: &Path) -> PathBuf {
    data_dir.join("cache").join("checkpoints.sqlite")
}

pub fn output_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("output")
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> AppResult<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// SHA-256 hex digest of a string.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Stable identifier for a document: the hash of its canonical path, or of
/// the path as given when it cannot be canonicalized.
pub fn document_id(path: &Path) -> String {
    let resolved = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    sha256_hex(&resolved.to_string_lossy())
}
