//! LLM Types
//!
//! Provider configuration, model roles, and the error taxonomy shared by
//! every generation call.

use deep_reader_core::proxy::ProxyConfig;
use serde::{Deserialize, Serialize};

/// Supported LLM provider types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    /// Any OpenAI-compatible chat completions endpoint.
    OpenAI,
    Ollama,
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderType::OpenAI => write!(f, "openai"),
            ProviderType::Ollama => write!(f, "ollama"),
        }
    }
}

/// The named generation roles used by the pipeline.
///
/// - `Fast`: per-segment analysis, extraction, and evidence answers
/// - `Smart`: memory synthesis, narrative, themes, critique
/// - `Writer`: outline and section writing
/// - `Search`: network-augmented variant, falls back to `Smart`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelRole {
    Fast,
    Smart,
    Writer,
    Search,
}

impl std::fmt::Display for ModelRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelRole::Fast => write!(f, "fast"),
            ModelRole::Smart => write!(f, "smart"),
            ModelRole::Writer => write!(f, "writer"),
            ModelRole::Search => write!(f, "search"),
        }
    }
}

/// Configuration for an LLM provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider: ProviderType,
    /// API key (not needed for Ollama)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Base URL override (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub model: String,
    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Temperature (0.0 - 1.0)
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyConfig>,
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: ProviderType::OpenAI,
            api_key: None,
            base_url: None,
            model: "gpt-4o-mini".to_string(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            proxy: None,
        }
    }
}

/// Error types for LLM operations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LlmError {
    /// Authentication failed (invalid API key)
    AuthenticationFailed { message: String },
    /// Rate limit exceeded
    RateLimited {
        message: String,
        retry_after: Option<u32>,
    },
    /// Model not found or not available
    ModelNotFound { model: String },
    /// Invalid request (bad parameters)
    InvalidRequest { message: String },
    /// Server error from the provider
    ServerError {
        message: String,
        status: Option<u16>,
    },
    /// Network/connection error
    NetworkError { message: String },
    /// Response parsing error
    ParseError { message: String },
    /// Provider not available (e.g., Ollama not running)
    ProviderUnavailable { message: String },
    /// The model answered with blank text.
    EmptyResponse { model: String },
    /// Other error
    Other { message: String },
}

impl LlmError {
    /// Transient failures are retried by the structured-call wrapper; the
    /// rest propagate to the run state.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. }
                | LlmError::ServerError { .. }
                | LlmError::NetworkError { .. }
                | LlmError::ParseError { .. }
                | LlmError::EmptyResponse { .. }
        )
    }
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmError::AuthenticationFailed { message } => {
                write!(f, "Authentication failed: {}", message)
            }
            LlmError::RateLimited { message, .. } => {
                write!(f, "Rate limited: {}", message)
            }
            LlmError::ModelNotFound { model } => {
                write!(f, "Model not found: {}", model)
            }
            LlmError::InvalidRequest { message } => {
                write!(f, "Invalid request: {}", message)
            }
            LlmError::ServerError { message, status } => {
                if let Some(s) = status {
                    write!(f, "Server error ({}): {}", s, message)
                } else {
                    write!(f, "Server error: {}", message)
                }
            }
            LlmError::NetworkError { message } => {
                write!(f, "Network error: {}", message)
            }
            LlmError::ParseError { message } => {
                write!(f, "Parse error: {}", message)
            }
            LlmError::ProviderUnavailable { message } => {
                write!(f, "Provider unavailable: {}", message)
            }
            LlmError::EmptyResponse { model } => {
                write!(f, "Empty response from model {}", model)
            }
            LlmError::Other { message } => {
                write!(f, "Error: {}", message)
            }
        }
    }
}

impl std::error::Error for LlmError {}

impl From<serde_json::Error> for LlmError {
    fn from(e: serde_json::Error) -> Self {
        LlmError::ParseError {
            message: e.to_string(),
        }
    }
}

/// Result type for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_config_default() {
        let config = ProviderConfig::default();
        assert_eq!(config.provider, ProviderType::OpenAI);
        assert_eq!(config.max_tokens, 4096);
        assert!((config.temperature - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn test_provider_config_deserialize_defaults() {
        let config: ProviderConfig =
            serde_json::from_str(r#"{"provider":"ollama","model":"qwen3:8b"}"#).unwrap();
        assert_eq!(config.provider, ProviderType::Ollama);
        assert_eq!(config.max_tokens, 4096);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(LlmError::RateLimited {
            message: "slow down".into(),
            retry_after: Some(3)
        }
        .is_retryable());
        assert!(LlmError::EmptyResponse {
            model: "m".into()
        }
        .is_retryable());
        assert!(!LlmError::AuthenticationFailed {
            message: "bad key".into()
        }
        .is_retryable());
        assert!(!LlmError::ProviderUnavailable {
            message: "down".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_error_serialization_is_tagged() {
        let err = LlmError::ServerError {
            message: "boom".into(),
            status: Some(502),
        };
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"type\":\"server_error\""));
        assert_eq!(err.to_string(), "Server error (502): boom");
    }

    #[test]
    fn test_model_role_display() {
        assert_eq!(ModelRole::Writer.to_string(), "writer");
        let parsed: ModelRole = serde_json::from_str("\"search\"").unwrap();
        assert_eq!(parsed, ModelRole::Search);
    }
}
