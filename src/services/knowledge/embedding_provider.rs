//! Embedding Provider Abstraction Layer
//!
//! Defines the async `EmbeddingProvider` trait used by the vector store and
//! the two backends behind it: the OpenAI-compatible embeddings API and a
//! local feature-hashing embedder that needs no network access.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use deep_reader_core::proxy::ProxyConfig;
use serde::{Deserialize, Serialize};

use super::embedding_provider_local::LocalHashEmbeddingProvider;
use super::embedding_provider_openai::OpenAIEmbeddingProvider;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur during embedding operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EmbeddingError {
    /// Authentication failed (invalid or missing API key).
    AuthenticationFailed { message: String },

    /// The requested model was not found or is not available.
    ModelNotFound { model: String },

    /// The provider is not reachable or not running.
    ProviderUnavailable { message: String },

    /// The input text exceeds the provider's maximum token/character limit.
    InputTooLong { message: String },

    NetworkError { message: String },

    /// The provider returned an unexpected or unparseable response.
    ParseError { message: String },

    ServerError {
        message: String,
        status: Option<u16>,
    },

    RateLimited {
        message: String,
        retry_after: Option<u32>,
    },

    /// Configuration is invalid or incomplete.
    InvalidConfig { message: String },

    /// Vectors of a different width than the store was created with.
    DimensionMismatch { expected: usize, actual: usize },

    Other { message: String },
}

impl fmt::Display for EmbeddingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthenticationFailed { message } => {
                write!(f, "authentication failed: {}", message)
            }
            Self::ModelNotFound { model } => write!(f, "model not found: {}", model),
            Self::ProviderUnavailable { message } => {
                write!(f, "provider unavailable: {}", message)
            }
            Self::InputTooLong { message } => write!(f, "input too long: {}", message),
            Self::NetworkError { message } => write!(f, "network error: {}", message),
            Self::ParseError { message } => write!(f, "parse error: {}", message),
            Self::ServerError { message, status } => {
                if let Some(code) = status {
                    write!(f, "server error (HTTP {}): {}", code, message)
                } else {
                    write!(f, "server error: {}", message)
                }
            }
            Self::RateLimited { message, .. } => write!(f, "rate limited: {}", message),
            Self::InvalidConfig { message } => write!(f, "invalid config: {}", message),
            Self::DimensionMismatch { expected, actual } => write!(
                f,
                "embedding dimension mismatch: expected {}, got {}",
                expected, actual
            ),
            Self::Other { message } => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for EmbeddingError {}

impl EmbeddingError {
    /// Whether this error is transient and the operation should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EmbeddingError::NetworkError { .. }
                | EmbeddingError::RateLimited { .. }
                | EmbeddingError::ServerError { .. }
        )
    }

    /// For rate-limited errors, return the suggested wait time in seconds.
    pub fn retry_after_secs(&self) -> Option<u64> {
        if let EmbeddingError::RateLimited { retry_after, .. } = self {
            retry_after.map(|s| s as u64)
        } else {
            None
        }
    }
}

/// Convenience alias for embedding operation results.
pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

// ---------------------------------------------------------------------------
// Provider type enum
// ---------------------------------------------------------------------------

/// Identifies the embedding backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProviderType {
    /// OpenAI embedding models or any compatible endpoint.
    #[serde(rename = "openai", alias = "open_ai")]
    OpenAI,
    /// Feature-hashing embedder, fully offline.
    Local,
}

impl EmbeddingProviderType {
    pub fn requires_api_key(&self) -> bool {
        matches!(self, Self::OpenAI)
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAI => "text-embedding-3-small",
            Self::Local => "feature-hash",
        }
    }

    pub fn default_dimension(&self) -> usize {
        match self {
            Self::OpenAI => 1536,
            Self::Local => 256,
        }
    }
}

impl fmt::Display for EmbeddingProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenAI => write!(f, "openai"),
            Self::Local => write!(f, "local"),
        }
    }
}

// ---------------------------------------------------------------------------
// Provider configuration
// ---------------------------------------------------------------------------

/// Configuration for an embedding provider instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingProviderConfig {
    pub provider: EmbeddingProviderType,

    /// Model identifier (e.g., "text-embedding-3-small").
    pub model: String,

    /// API key for remote providers. Not needed for local providers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL override for the provider API.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Desired embedding dimension. If `None`, the provider's default is used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimension: Option<usize>,

    /// Maximum number of texts to embed in a single request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub proxy: Option<ProxyConfig>,
}

fn default_batch_size() -> usize {
    100
}

impl EmbeddingProviderConfig {
    pub fn new(provider: EmbeddingProviderType) -> Self {
        Self {
            provider,
            model: provider.default_model().to_string(),
            api_key: None,
            base_url: None,
            dimension: None,
            batch_size: default_batch_size(),
            proxy: None,
        }
    }

    /// Validate the configuration and return the first problem found.
    pub fn validate(&self) -> EmbeddingResult<()> {
        if self.provider.requires_api_key() && self.api_key.is_none() {
            return Err(EmbeddingError::InvalidConfig {
                message: format!(
                    "{} embeddings require an API key but none was provided",
                    self.provider
                ),
            });
        }
        if self.model.trim().is_empty() {
            return Err(EmbeddingError::InvalidConfig {
                message: "model name must not be empty".to_string(),
            });
        }
        if self.batch_size == 0 {
            return Err(EmbeddingError::InvalidConfig {
                message: "batch_size must be at least 1".to_string(),
            });
        }
        if self.dimension == Some(0) {
            return Err(EmbeddingError::InvalidConfig {
                message: "dimension must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Returns the effective dimension: the configured dimension or the provider's default.
    pub fn effective_dimension(&self) -> usize {
        self.dimension
            .unwrap_or_else(|| self.provider.default_dimension())
    }
}

// ---------------------------------------------------------------------------
// Embedding provider trait
// ---------------------------------------------------------------------------

/// Async trait for embedding providers.
///
/// Object-safe and `Send + Sync` so a single provider can be shared by the
/// vector store across concurrent retrieval tasks.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of document texts; one vector per input, all of
    /// `self.dimension()` width.
    async fn embed_documents(&self, documents: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>>;

    /// Embed a single query text. Defaults to a one-element document batch.
    async fn embed_query(&self, query: &str) -> EmbeddingResult<Vec<f32>> {
        let results = self.embed_documents(&[query]).await?;
        results.into_iter().next().ok_or_else(|| EmbeddingError::Other {
            message: "embed_documents returned empty results for single query".to_string(),
        })
    }

    fn dimension(&self) -> usize;

    async fn health_check(&self) -> EmbeddingResult<()>;

    /// Returns whether this provider runs locally without network calls.
    fn is_local(&self) -> bool;

    /// Largest batch accepted in one `embed_documents` call.
    fn max_batch_size(&self) -> usize;

    fn provider_type(&self) -> EmbeddingProviderType;

    /// Returns a human-readable name for this provider instance.
    fn display_name(&self) -> &str;
}

/// Build the provider described by `config`.
pub fn create_embedding_provider(
    config: &EmbeddingProviderConfig,
) -> EmbeddingResult<Arc<dyn EmbeddingProvider>> {
    config.validate()?;
    let provider: Arc<dyn EmbeddingProvider> = match config.provider {
        EmbeddingProviderType::OpenAI => Arc::new(OpenAIEmbeddingProvider::new(config)?),
        EmbeddingProviderType::Local => {
            Arc::new(LocalHashEmbeddingProvider::new(config.effective_dimension()))
        }
    };
    Ok(provider)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
