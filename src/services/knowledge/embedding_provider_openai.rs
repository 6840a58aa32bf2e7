//! OpenAI Embedding Provider
//!
//! `EmbeddingProvider` over the OpenAI embeddings API (or any compatible
//! endpoint configured through `base_url`).
//!
//! - Endpoint: `POST https://api.openai.com/v1/embeddings`
//! - Body: `{ model, input: ["text1", ...], dimensions? }`
//! - Response: `{ data: [{ embedding, index }] }`

use async_trait::async_trait;
use deep_reader_llm::build_http_client;
use serde::Deserialize;

use super::embedding_provider::{
    EmbeddingError, EmbeddingProvider, EmbeddingProviderConfig, EmbeddingProviderType,
    EmbeddingResult,
};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const OPENAI_EMBEDDING_API_URL: &str = "https://api.openai.com/v1/embeddings";

const DEFAULT_MODEL: &str = "text-embedding-3-small";

/// Native width of text-embedding-3-small.
const DEFAULT_DIMENSION: usize = 1536;

/// Maximum batch size supported by OpenAI embedding API.
const MAX_BATCH_SIZE: usize = 2048;

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingResponse {
    data: Vec<OpenAIEmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorResponse {
    error: Option<OpenAIErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorDetail {
    message: Option<String>,
}

// ---------------------------------------------------------------------------
// Provider implementation
// ---------------------------------------------------------------------------

pub struct OpenAIEmbeddingProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    dimension: usize,
    display_name: String,
}

impl OpenAIEmbeddingProvider {
    pub fn new(config: &EmbeddingProviderConfig) -> EmbeddingResult<Self> {
        let model = if config.model.trim().is_empty() {
            DEFAULT_MODEL.to_string()
        } else {
            config.model.trim().to_string()
        };
        let base_url = config
            .base_url
            .as_deref()
            .unwrap_or(OPENAI_EMBEDDING_API_URL)
            .to_string();
        let client =
            build_http_client(config.proxy.as_ref()).map_err(|e| EmbeddingError::InvalidConfig {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            api_key: config.api_key.clone().unwrap_or_default(),
            display_name: format!("OpenAI ({})", model),
            dimension: config.dimension.unwrap_or(DEFAULT_DIMENSION),
            model,
            base_url,
        })
    }

    fn build_request_body(&self, input: serde_json::Value) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "input": input,
        });
        // Only text-embedding-3-* accept a reduced output width.
        if self.dimension != DEFAULT_DIMENSION || self.model.contains("text-embedding-3") {
            body["dimensions"] = serde_json::json!(self.dimension);
        }
        body
    }

    async fn post_embeddings(
        &self,
        body: &serde_json::Value,
    ) -> EmbeddingResult<OpenAIEmbeddingResponse> {
        if self.api_key.is_empty() {
            return Err(EmbeddingError::AuthenticationFailed {
                message: "OpenAI embedding API key is not configured".to_string(),
            });
        }

        let response = self
            .client
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;

        let status = response.status().as_u16();
        let body_text = response
            .text()
            .await
            .map_err(|e| EmbeddingError::NetworkError {
                message: format!("failed to read response body: {}", e),
            })?;

        if status != 200 {
            return Err(self.map_http_error(status, &body_text));
        }

        serde_json::from_str::<OpenAIEmbeddingResponse>(&body_text).map_err(|e| {
            EmbeddingError::ParseError {
                message: format!("failed to parse embedding response: {}", e),
            }
        })
    }

    fn map_reqwest_error(&self, err: reqwest::Error) -> EmbeddingError {
        if err.is_connect() {
            EmbeddingError::ProviderUnavailable {
                message: format!("Cannot connect to embedding API at {}", self.base_url),
            }
        } else if err.is_timeout() {
            EmbeddingError::NetworkError {
                message: format!("Request to embedding API timed out: {}", err),
            }
        } else {
            EmbeddingError::NetworkError {
                message: err.to_string(),
            }
        }
    }

    fn map_http_error(&self, status: u16, body_text: &str) -> EmbeddingError {
        let detail = serde_json::from_str::<OpenAIErrorResponse>(body_text)
            .ok()
            .and_then(|r| r.error)
            .and_then(|d| d.message);
        let message = detail.as_deref().unwrap_or(body_text);

        match status {
            401 | 403 => EmbeddingError::AuthenticationFailed {
                message: message.to_string(),
            },
            429 => EmbeddingError::RateLimited {
                message: message.to_string(),
                retry_after: None,
            },
            400 if message.contains("token") || message.contains("length") => {
                EmbeddingError::InputTooLong {
                    message: message.to_string(),
                }
            }
            400 => EmbeddingError::InvalidConfig {
                message: format!("bad request: {}", message),
            },
            404 => EmbeddingError::ModelNotFound {
                model: format!("'{}' not found at {}", self.model, self.base_url),
            },
            _ => EmbeddingError::ServerError {
                message: message.to_string(),
                status: Some(status),
            },
        }
    }

    /// Restore input order and check the count.
    fn extract_embeddings(
        mut response: OpenAIEmbeddingResponse,
        expected_count: usize,
    ) -> EmbeddingResult<Vec<Vec<f32>>> {
        if response.data.len() != expected_count {
            return Err(EmbeddingError::ParseError {
                message: format!(
                    "expected {} embeddings but the API returned {}",
                    expected_count,
                    response.data.len()
                ),
            });
        }
        response.data.sort_by_key(|d| d.index);
        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed_documents(&self, documents: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        if documents.len() > MAX_BATCH_SIZE {
            return Err(EmbeddingError::InvalidConfig {
                message: format!(
                    "batch of {} exceeds the maximum of {}",
                    documents.len(),
                    MAX_BATCH_SIZE
                ),
            });
        }

        let body = self.build_request_body(serde_json::json!(documents));
        let response = self.post_embeddings(&body).await?;
        Self::extract_embeddings(response, documents.len())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn health_check(&self) -> EmbeddingResult<()> {
        let body = self.build_request_body(serde_json::json!("health check"));
        self.post_embeddings(&body).await?;
        Ok(())
    }

    fn is_local(&self) -> bool {
        false
    }

    fn max_batch_size(&self) -> usize {
        MAX_BATCH_SIZE
    }

    fn provider_type(&self) -> EmbeddingProviderType {
        EmbeddingProviderType::OpenAI
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn default_config() -> EmbeddingProviderConfig {
        EmbeddingProviderConfig {
            api_key: Some("sk-test-api-key".to_string()),
            ..EmbeddingProviderConfig::new(EmbeddingProviderType::OpenAI)
        }
    }

    #[test]
    fn test_defaults() {
        let provider = OpenAIEmbeddingProvider::new(&default_config()).unwrap();
        assert_eq!(provider.dimension(), DEFAULT_DIMENSION);
        assert_eq!(provider.base_url, OPENAI_EMBEDDING_API_URL);
        assert_eq!(provider.display_name(), "OpenAI (text-embedding-3-small)");
        assert!(!provider.is_local());
    }

    #[test]
    fn test_request_body_includes_dimensions() {
        let provider = OpenAIEmbeddingProvider::new(&EmbeddingProviderConfig {
            dimension: Some(512),
            ..default_config()
        })
        .unwrap();
        let body = provider.build_request_body(serde_json::json!(["a"]));
        assert_eq!(body["dimensions"], 512);
        assert_eq!(body["model"], "text-embedding-3-small");
    }

    #[test]
    fn test_request_body_omits_dimensions_for_legacy_model() {
        let provider = OpenAIEmbeddingProvider::new(&EmbeddingProviderConfig {
            model: "text-embedding-ada-002".to_string(),
            ..default_config()
        })
        .unwrap();
        let body = provider.build_request_body(serde_json::json!(["a"]));
        assert!(body.get("dimensions").is_none());
    }

    #[test]
    fn test_extract_embeddings_restores_order() {
        let response: OpenAIEmbeddingResponse = serde_json::from_str(
            r#"{"data":[{"embedding":[2.0],"index":1},{"embedding":[1.0],"index":0}]}"#,
        )
        .unwrap();
        let out = OpenAIEmbeddingProvider::extract_embeddings(response, 2).unwrap();
        assert_eq!(out, vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn test_extract_embeddings_count_mismatch() {
        let response: OpenAIEmbeddingResponse =
            serde_json::from_str(r#"{"data":[{"embedding":[1.0],"index":0}]}"#).unwrap();
        assert!(OpenAIEmbeddingProvider::extract_embeddings(response, 2).is_err());
    }

    #[test]
    fn test_http_error_mapping() {
        let provider = OpenAIEmbeddingProvider::new(&default_config()).unwrap();
        assert!(matches!(
            provider.map_http_error(401, r#"{"error":{"message":"bad key"}}"#),
            EmbeddingError::AuthenticationFailed { message } if message == "bad key"
        ));
        assert!(matches!(
            provider.map_http_error(429, "slow down"),
            EmbeddingError::RateLimited { .. }
        ));
        assert!(matches!(
            provider.map_http_error(400, "maximum context length exceeded"),
            EmbeddingError::InputTooLong { .. }
        ));
        assert!(matches!(
            provider.map_http_error(502, "bad gateway"),
            EmbeddingError::ServerError { status: Some(502), .. }
        ));
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let provider = OpenAIEmbeddingProvider::new(&EmbeddingProviderConfig::new(
            EmbeddingProviderType::OpenAI,
        ))
        .unwrap();
        let err = provider.embed_documents(&["x"]).await.unwrap_err();
        assert!(matches!(err, EmbeddingError::AuthenticationFailed { .. }));
    }
}
