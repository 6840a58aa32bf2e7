//! Services
//!
//! The reading pipeline, leaves first: retrieval (`knowledge`), prompt
//! templates, answer reconciliation, the reading loop, report assembly, the
//! checkpointed workflow driver, and artifact rendering.

pub mod artifacts;
pub mod knowledge;
pub mod prompts;
pub mod reading;
pub mod reconcile;
pub mod report;
pub mod workflow;
