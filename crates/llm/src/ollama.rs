//! Ollama Provider
//!
//! Local inference through the ollama-rs native SDK. No API key required.

use async_trait::async_trait;
use ollama_rs::generation::chat::request::ChatMessageRequest;
use ollama_rs::generation::chat::ChatMessage;
use ollama_rs::models::ModelOptions;
use ollama_rs::Ollama;

use crate::http_client::build_http_client;
use crate::provider::LlmProvider;
use crate::types::{LlmError, LlmResult, ProviderConfig};
use deep_reader_core::proxy::ProxyConfig;

/// Default Ollama API endpoint
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// Ollama provider for local inference
pub struct OllamaProvider {
    config: ProviderConfig,
    client: Ollama,
}

impl OllamaProvider {
    pub fn new(config: ProviderConfig) -> LlmResult<Self> {
        let base_url = config.base_url.as_deref().unwrap_or(OLLAMA_DEFAULT_URL);
        let client = Self::create_client(base_url, config.proxy.as_ref())?;
        Ok(Self { config, client })
    }

    /// Create an Ollama SDK client from a base URL string.
    ///
    /// `Ollama::new()` takes host and port separately, so the URL is split
    /// first. Unparseable URLs fall back to `Ollama::default()`.
    fn create_client(base_url: &str, proxy: Option<&ProxyConfig>) -> LlmResult<Ollama> {
        let Ok(parsed) = url::Url::parse(base_url) else {
            return Ok(Ollama::default());
        };
        let host = parsed.host_str().unwrap_or("localhost");
        let port = parsed.port().unwrap_or(11434);
        let host_url = format!("{}://{}", parsed.scheme(), host);
        if proxy.is_some() {
            let http_client = build_http_client(proxy)?;
            Ok(Ollama::new_with_client(host_url, port, http_client))
        } else {
            Ok(Ollama::new(host_url, port))
        }
    }

    /// Get the base URL for the Ollama server (used in error messages)
    fn base_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(OLLAMA_DEFAULT_URL)
    }

    fn map_error(&self, msg: String) -> LlmError {
        if msg.contains("connect") || msg.contains("Connection refused") {
            LlmError::ProviderUnavailable {
                message: format!("Cannot connect to Ollama at {}: {}", self.base_url(), msg),
            }
        } else if msg.contains("not found") || msg.contains("404") {
            LlmError::ModelNotFound {
                model: self.config.model.clone(),
            }
        } else {
            LlmError::NetworkError { message: msg }
        }
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, prompt: &str) -> LlmResult<String> {
        let mut opts = ModelOptions::default().temperature(self.config.temperature);
        if self.config.max_tokens > 0 {
            opts = opts.num_predict(self.config.max_tokens as i32);
        }
        let request = ChatMessageRequest::new(
            self.config.model.clone(),
            vec![ChatMessage::user(prompt.to_string())],
        )
        .options(opts);

        let response = self
            .client
            .send_chat_messages(request)
            .await
            .map_err(|e| self.map_error(e.to_string()))?;

        Ok(response.message.content)
    }

    async fn health_check(&self) -> LlmResult<()> {
        self.client
            .list_local_models()
            .await
            .map_err(|e| self.map_error(e.to_string()))?;
        Ok(())
    }
}
