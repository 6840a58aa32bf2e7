//! Deep Reader LLM
//!
//! Text-generation layer for the reading pipeline:
//! - `LlmProvider` trait with a single `complete(prompt)` operation
//! - OpenAI-compatible chat completions and Ollama (local inference)
//! - `ModelRoles`: the fast / smart / writer / search role table
//! - permissive JSON repair and the structured-call wrapper with bounded retry

pub mod http_client;
pub mod json_repair;
pub mod ollama;
pub mod openai;
pub mod provider;
pub mod roles;
pub mod structured;
pub mod types;

// Re-export main types
pub use http_client::build_http_client;
pub use ollama::OllamaProvider;
pub use openai::OpenAIProvider;
pub use provider::{create_provider, LlmProvider};
pub use roles::ModelRoles;
pub use structured::{CallOutcome, Reply, Shape, DEFAULT_MAX_ATTEMPTS};
pub use types::*;
