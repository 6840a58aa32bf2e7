//! Model role table.
//!
//! The pipeline addresses generation capabilities by role rather than by
//! provider, so each role can point at a different provider or model.

use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::provider::LlmProvider;
use crate::structured::{call_structured, call_text, Reply, Shape, DEFAULT_MAX_ATTEMPTS};
use crate::types::{LlmError, LlmResult, ModelRole};

/// Providers bound to the four named roles.
#[derive(Clone)]
pub struct ModelRoles {
    fast: Arc<dyn LlmProvider>,
    smart: Arc<dyn LlmProvider>,
    writer: Arc<dyn LlmProvider>,
    search: Option<Arc<dyn LlmProvider>>,
    max_attempts: usize,
}

impl ModelRoles {
    pub fn new(
        fast: Arc<dyn LlmProvider>,
        smart: Arc<dyn LlmProvider>,
        writer: Arc<dyn LlmProvider>,
    ) -> Self {
        Self {
            fast,
            smart,
            writer,
            search: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Bind every role to the same provider.
    pub fn uniform(provider: Arc<dyn LlmProvider>) -> Self {
        Self::new(provider.clone(), provider.clone(), provider)
    }

    pub fn with_search(mut self, search: Arc<dyn LlmProvider>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Provider for `role`. `Search` falls back to `Smart` when unset.
    pub fn provider(&self, role: ModelRole) -> &Arc<dyn LlmProvider> {
        match role {
            ModelRole::Fast => &self.fast,
            ModelRole::Smart => &self.smart,
            ModelRole::Writer => &self.writer,
            ModelRole::Search => self.search.as_ref().unwrap_or(&self.smart),
        }
    }

    /// Single unwrapped completion. Blank text is reported as
    /// `LlmError::EmptyResponse`.
    pub async fn complete(&self, role: ModelRole, prompt: &str) -> LlmResult<String> {
        let provider = self.provider(role);
        let text = provider.complete(prompt).await?;
        if text.trim().is_empty() {
            return Err(LlmError::EmptyResponse {
                model: provider.model().to_string(),
            });
        }
        Ok(text)
    }

    /// Structured call through the retry wrapper.
    pub async fn structured<T: DeserializeOwned>(
        &self,
        role: ModelRole,
        prompt: &str,
        shape: Shape,
    ) -> LlmResult<Reply<T>> {
        call_structured(self.provider(role).as_ref(), prompt, shape, self.max_attempts).await
    }

    /// Free-text call through the retry wrapper.
    pub async fn text(&self, role: ModelRole, prompt: &str) -> LlmResult<Reply<String>> {
        call_text(self.provider(role).as_ref(), prompt, self.max_attempts).await
    }
}

impl std::fmt::Debug for ModelRoles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRoles")
            .field("fast", &self.fast.model())
            .field("smart", &self.smart.model())
            .field("writer", &self.writer.model())
            .field("search", &self.search.as_ref().map(|p| p.model().to_string()))
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}
