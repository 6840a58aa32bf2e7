//! Deep Reader Core
//!
//! Foundational error and configuration types shared by every crate in the
//! Deep Reader workspace. This crate has no dependencies on storage, model
//! providers, or the reading pipeline.
//!
//! ## Module Organization
//!
//! - `error` - Core error types (`CoreError`, `CoreResult`)
//! - `proxy` - Proxy configuration data types shared across workspace crates

pub mod error;
pub mod proxy;

// ── Error Types ────────────────────────────────────────────────────────
pub use error::{CoreError, CoreResult};

// ── Proxy Types ────────────────────────────────────────────────────────
pub use proxy::{ProxyConfig, ProxyProtocol};
