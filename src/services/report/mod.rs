//! Report Assembly
//!
//! Narrative, themes and critique, outline, and section writing.

pub mod actions;
pub mod outline;
pub mod pipeline;

pub use outline::{enforce_outline, outline_constraints};
pub use pipeline::{next_stage, ReportPipeline, ReportStage};
