//! Run Workflow
//!
//! Checkpointing and the pipeline driver for one document run.
//!
//! - `checkpointer.rs` - Checkpointer trait and InMemoryCheckpointer
//! - `checkpoint_store.rs` - SqliteCheckpointer for persistence
//! - `document.rs` - source document loading and run keys
//! - `driver.rs` - ingest, reading loop, and report with checkpoints

pub mod checkpoint_store;
pub mod checkpointer;
pub mod document;
pub mod driver;

pub use checkpoint_store::SqliteCheckpointer;
pub use checkpointer::{Checkpointer, InMemoryCheckpointer, RunCheckpoint};
pub use document::SourceDocument;
pub use driver::{run_status, RunRequest, RunStatus, WorkflowDriver};
