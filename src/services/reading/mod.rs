//! Iterative Reading
//!
//! Segment-by-segment reading with rolling memory and question answering.

pub mod agents;
pub mod controller;

pub use controller::{build_segments, ReadingController, ReadingSettings, StepOutcome};
