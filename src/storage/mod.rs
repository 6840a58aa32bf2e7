//! Storage Layer
//!
//! SQLite connection pooling and TOML configuration loading.

pub mod config;
pub mod database;

pub use config::*;
pub use database::*;
