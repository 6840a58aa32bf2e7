//! Deep Reader - Library
//!
//! Reads a long Markdown document segment by segment with a set of LLM
//! agents, keeps a rolling memory and a per-document vector store, and
//! assembles a structured report from what it read.
//!
//! It includes:
//! - Configuration and SQLite storage
//! - Chunkers, embedding providers, and the vector store
//! - The reading controller and the report pipeline
//! - The checkpointed workflow driver and artifact rendering

pub mod models;
pub mod services;
pub mod state;
pub mod storage;
pub mod utils;

pub use models::settings::{ConfigOverrides, DeepReaderConfig};
pub use models::state::{RunStage, RunState};
pub use state::AppState;
pub use utils::error::{AppError, AppResult};
