//! LLM Provider Trait
//!
//! The common interface for all generation backends. The pipeline only ever
//! needs one operation: turn a prompt into text.

use std::sync::Arc;

use async_trait::async_trait;

use crate::ollama::OllamaProvider;
use crate::openai::OpenAIProvider;
use crate::types::{LlmError, LlmResult, ProviderConfig, ProviderType};

/// Trait that all LLM providers must implement.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Returns the provider name for identification.
    fn name(&self) -> &'static str;

    /// Returns the current model being used.
    fn model(&self) -> &str;

    /// Generate a completion for a single user prompt.
    ///
    /// An empty string is a legal return value here; callers treat it as a
    /// failure signal (see `ModelRoles::complete`).
    async fn complete(&self, prompt: &str) -> LlmResult<String>;

    /// Check if the provider is healthy and reachable.
    ///
    /// For API providers, this validates the API key.
    /// For Ollama, this checks if the server is running.
    async fn health_check(&self) -> LlmResult<()>;
}

/// Create an LLM provider from a ProviderConfig.
pub fn create_provider(config: ProviderConfig) -> LlmResult<Arc<dyn LlmProvider>> {
    let provider: Arc<dyn LlmProvider> = match config.provider {
        ProviderType::OpenAI => Arc::new(OpenAIProvider::new(config)?),
        ProviderType::Ollama => Arc::new(OllamaProvider::new(config)?),
    };
    Ok(provider)
}

/// Helper function to create an error for missing API key
pub fn missing_api_key_error(provider: &str) -> LlmError {
    LlmError::AuthenticationFailed {
        message: format!("API key not configured for {}", provider),
    }
}

/// Helper function to parse HTTP error status codes
pub fn parse_http_error(status: u16, body: &str, provider: &str) -> LlmError {
    match status {
        401 => LlmError::AuthenticationFailed {
            message: format!("{}: Invalid API key", provider),
        },
        403 => LlmError::AuthenticationFailed {
            message: format!("{}: Access denied", provider),
        },
        404 => LlmError::ModelNotFound {
            model: body.to_string(),
        },
        429 => LlmError::RateLimited {
            message: body.to_string(),
            retry_after: None,
        },
        400 => LlmError::InvalidRequest {
            message: body.to_string(),
        },
        500..=599 => LlmError::ServerError {
            message: body.to_string(),
            status: Some(status),
        },
        _ => LlmError::Other {
            message: format!("HTTP {}: {}", status, body),
        },
    }
}
