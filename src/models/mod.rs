//! Data Models
//!
//! Configuration and run-state structures shared by every stage.

pub mod settings;
pub mod state;

pub use settings::*;
pub use state::*;
