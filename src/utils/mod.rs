//! Utilities
//!
//! Error types and path helpers used throughout the application.

pub mod error;
pub mod paths;

pub use error::*;
pub use paths::*;
