//! Structured-Call Wrapper
//!
//! Wraps a single generation call with permissive JSON parsing, shape
//! validation, typed decoding, and a bounded retry. Recoverable failures
//! never escape: after the last attempt the caller receives
//! `Reply::Fallback` carrying the last error message and builds its own
//! well-formed placeholder from it. Fatal provider errors (bad key, missing
//! model, unreachable server) propagate as `Err`.

use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::json_repair::parse_lenient;
use crate::provider::LlmProvider;
use crate::types::{LlmError, LlmResult};

/// Attempts per structured call before degrading to a fallback.
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Longest provider-requested pause honored between attempts.
const MAX_RETRY_AFTER_SECS: u32 = 30;

// ============================================================================
// Outcomes
// ============================================================================

/// Result of one attempt.
#[derive(Debug)]
pub enum CallOutcome<T> {
    Ok(T),
    /// Malformed output or a transient provider failure; try again.
    RetriableParseError(String),
    /// Stop immediately and surface the error.
    FatalError(LlmError),
}

impl<T> CallOutcome<T> {
    pub fn from_provider_error(err: LlmError) -> Self {
        if err.is_retryable() {
            CallOutcome::RetriableParseError(err.to_string())
        } else {
            CallOutcome::FatalError(err)
        }
    }
}

/// Result of a whole structured call after retries.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply<T> {
    Valid(T),
    Fallback { error: String },
}

impl<T> Reply<T> {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Reply::Fallback { .. })
    }

    /// The error message carried by a fallback.
    pub fn error(&self) -> Option<&str> {
        match self {
            Reply::Valid(_) => None,
            Reply::Fallback { error } => Some(error),
        }
    }

    /// Take the valid value or build a placeholder from the error message.
    pub fn unwrap_or_else(self, fallback: impl FnOnce(&str) -> T) -> T {
        match self {
            Reply::Valid(value) => value,
            Reply::Fallback { error } => fallback(&error),
        }
    }

    pub fn valid(self) -> Option<T> {
        match self {
            Reply::Valid(value) => Some(value),
            Reply::Fallback { .. } => None,
        }
    }
}

// ============================================================================
// Shapes
// ============================================================================

/// Expected top-level shape of a structured response.
#[derive(Debug, Clone, Copy)]
pub enum Shape {
    /// A JSON object containing every listed key.
    Object(&'static [&'static str]),
    /// A JSON list whose items are objects containing every listed key.
    ListOf(&'static [&'static str]),
    /// A JSON list of anything.
    List,
}

impl Shape {
    /// Validate `value` and normalize common near-misses: a list wrapped in
    /// a single-key object, a lone object where a list was expected, or a
    /// one-element list where an object was expected.
    pub fn check(&self, value: Value) -> Result<Value, String> {
        match self {
            Shape::Object(keys) => {
                let value = match value {
                    Value::Array(mut items) if items.len() == 1 && items[0].is_object() => {
                        items.remove(0)
                    }
                    other => other,
                };
                require_keys(&value, keys, None)?;
                Ok(value)
            }
            Shape::ListOf(keys) => {
                let list = into_list(value, Some(keys))?;
                if let Value::Array(items) = &list {
                    for (i, item) in items.iter().enumerate() {
                        require_keys(item, keys, Some(i))?;
                    }
                }
                Ok(list)
            }
            Shape::List => into_list(value, None),
        }
    }
}

fn require_keys(value: &Value, keys: &[&str], index: Option<usize>) -> Result<(), String> {
    let location = index.map(|i| format!("item {}", i)).unwrap_or_else(|| "response".to_string());
    let obj = value
        .as_object()
        .ok_or_else(|| format!("{} is not a JSON object", location))?;
    match keys.iter().find(|k| !obj.contains_key(**k)) {
        Some(missing) => Err(format!("{} is missing required key '{}'", location, missing)),
        None => Ok(()),
    }
}

fn into_list(value: Value, item_keys: Option<&&[&str]>) -> Result<Value, String> {
    match value {
        Value::Array(_) => Ok(value),
        Value::Object(map) => {
            if let Some(keys) = item_keys {
                if keys.iter().all(|k| map.contains_key(*k)) {
                    return Ok(Value::Array(vec![Value::Object(map)]));
                }
            }
            let mut arrays = map.into_iter().filter(|(_, v)| v.is_array());
            match (arrays.next(), arrays.next()) {
                (Some((_, list)), None) => Ok(list),
                _ => Err("expected a JSON list".to_string()),
            }
        }
        _ => Err("expected a JSON list".to_string()),
    }
}

/// Parse, validate, and decode one raw response.
pub fn decode<T: DeserializeOwned>(raw: &str, shape: Shape) -> CallOutcome<T> {
    let value = match parse_lenient(raw).and_then(|v| shape.check(v)) {
        Ok(value) => value,
        Err(msg) => return CallOutcome::RetriableParseError(msg),
    };
    match serde_json::from_value(value) {
        Ok(decoded) => CallOutcome::Ok(decoded),
        Err(e) => CallOutcome::RetriableParseError(format!("unexpected field types: {}", e)),
    }
}

// ============================================================================
// Retry combinator
// ============================================================================

/// Run `attempt` up to `max_attempts` times.
///
/// `Ok` returns immediately, `RetriableParseError` moves on to the next
/// attempt, and `FatalError` aborts with `Err`. Exhaustion yields
/// `Reply::Fallback` with the last error message.
pub async fn retry_bounded<T, F, Fut>(
    label: &str,
    max_attempts: usize,
    mut attempt: F,
) -> LlmResult<Reply<T>>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = CallOutcome<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut last_error = String::from("no attempt was made");

    for n in 1..=max_attempts {
        match attempt(n).await {
            CallOutcome::Ok(value) => {
                if n > 1 {
                    debug!(call = label, attempt = n, "Structured call recovered after retry");
                }
                return Ok(Reply::Valid(value));
            }
            CallOutcome::RetriableParseError(msg) => {
                warn!(call = label, attempt = n, max_attempts, error = %msg, "Structured call attempt failed");
                last_error = msg;
            }
            CallOutcome::FatalError(err) => {
                error!(call = label, attempt = n, error = %err, "Structured call failed fatally");
                return Err(err);
            }
        }
    }

    warn!(call = label, error = %last_error, "Structured call exhausted retries, using fallback");
    Ok(Reply::Fallback { error: last_error })
}

async fn attempt_text(provider: &dyn LlmProvider, prompt: &str) -> CallOutcome<String> {
    match provider.complete(prompt).await {
        Ok(text) if text.trim().is_empty() => CallOutcome::from_provider_error(LlmError::EmptyResponse {
            model: provider.model().to_string(),
        }),
        Ok(text) => CallOutcome::Ok(text),
        Err(err) => {
            if let LlmError::RateLimited {
                retry_after: Some(secs),
                ..
            } = &err
            {
                tokio::time::sleep(Duration::from_secs(u64::from((*secs).min(MAX_RETRY_AFTER_SECS))))
                    .await;
            }
            CallOutcome::from_provider_error(err)
        }
    }
}

/// Call `provider` for a JSON response of the given shape and decode it.
pub async fn call_structured<T: DeserializeOwned>(
    provider: &dyn LlmProvider,
    prompt: &str,
    shape: Shape,
    max_attempts: usize,
) -> LlmResult<Reply<T>> {
    retry_bounded(provider.model(), max_attempts, |_| async move {
        match attempt_text(provider, prompt).await {
            CallOutcome::Ok(text) => decode(&text, shape),
            CallOutcome::RetriableParseError(msg) => CallOutcome::RetriableParseError(msg),
            CallOutcome::FatalError(err) => CallOutcome::FatalError(err),
        }
    })
    .await
}

/// Call `provider` for free text. Blank replies count as failures.
pub async fn call_text(
    provider: &dyn LlmProvider,
    prompt: &str,
    max_attempts: usize,
) -> LlmResult<Reply<String>> {
    retry_bounded(provider.model(), max_attempts, |_| async move {
        match attempt_text(provider, prompt).await {
            CallOutcome::Ok(text) => CallOutcome::Ok(text.trim().to_string()),
            other => other,
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::Mutex;

    // ========================================================================
    // Mock provider
    // ========================================================================

    /// Returns queued responses in order; each call pops the first one.
    struct ScriptedProvider {
        responses: Mutex<Vec<LlmResult<String>>>,
        calls: Mutex<usize>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<LlmResult<String>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(0),
            }
        }

        fn texts(texts: &[&str]) -> Self {
            Self::new(texts.iter().map(|t| Ok(t.to_string())).collect())
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn model(&self) -> &str {
            "scripted-model"
        }

        async fn complete(&self, _prompt: &str) -> LlmResult<String> {
            *self.calls.lock().unwrap() += 1;
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok(String::new())
            } else {
                responses.remove(0)
            }
        }

        async fn health_check(&self) -> LlmResult<()> {
            Ok(())
        }
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Themes {
        key_idea: String,
        key_conclusion: String,
        key_evidence: String,
    }

    const THEME_KEYS: &[&str] = &["key_idea", "key_conclusion", "key_evidence"];

    // ========================================================================
    // Retry contract
    // ========================================================================

    #[tokio::test]
    async fn test_succeeds_on_third_attempt() {
        let provider = ScriptedProvider::texts(&[
            "not json at all",
            "{\"key_idea\": \"only one key\"}",
            "```json\n{\"key_idea\": \"a\", \"key_conclusion\": \"b\", \"key_evidence\": \"c\",}\n```",
        ]);
        let reply: Reply<Themes> =
            call_structured(&provider, "themes", Shape::Object(THEME_KEYS), 3)
                .await
                .unwrap();
        assert_eq!(
            reply,
            Reply::Valid(Themes {
                key_idea: "a".into(),
                key_conclusion: "b".into(),
                key_evidence: "c".into(),
            })
        );
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_yields_fallback_with_error() {
        let provider = ScriptedProvider::texts(&["nope", "[1, 2", "still nope"]);
        let reply: Reply<Themes> =
            call_structured(&provider, "themes", Shape::Object(THEME_KEYS), 3)
                .await
                .unwrap();
        assert!(reply.is_fallback());
        assert!(!reply.error().unwrap().is_empty());
        assert_eq!(provider.calls(), 3);

        let themes = reply.unwrap_or_else(|e| Themes {
            key_idea: format!("Error parsing response after retries: {}", e),
            key_conclusion: String::new(),
            key_evidence: String::new(),
        });
        assert!(themes.key_idea.starts_with("Error parsing response"));
    }

    #[tokio::test]
    async fn test_fatal_error_propagates_without_retry() {
        let provider = ScriptedProvider::new(vec![Err(LlmError::AuthenticationFailed {
            message: "bad key".into(),
        })]);
        let result: LlmResult<Reply<Themes>> =
            call_structured(&provider, "themes", Shape::Object(THEME_KEYS), 3).await;
        assert!(matches!(result, Err(LlmError::AuthenticationFailed { .. })));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_transient_error_is_retried() {
        let provider = ScriptedProvider::new(vec![
            Err(LlmError::ServerError {
                message: "overloaded".into(),
                status: Some(503),
            }),
            Ok("[\"a\", \"b\"]".into()),
        ]);
        let reply: Reply<Vec<String>> = call_structured(&provider, "list", Shape::List, 3)
            .await
            .unwrap();
        assert_eq!(reply, Reply::Valid(vec!["a".to_string(), "b".to_string()]));
    }

    #[tokio::test]
    async fn test_call_text_treats_blank_as_failure() {
        let provider = ScriptedProvider::texts(&["", "   ", "  the narrative  "]);
        let reply = call_text(&provider, "narrate", 3).await.unwrap();
        assert_eq!(reply, Reply::Valid("the narrative".to_string()));

        let provider = ScriptedProvider::texts(&["", ""]);
        let reply = call_text(&provider, "narrate", 2).await.unwrap();
        assert!(reply.error().unwrap().contains("Empty response"));
    }

    // ========================================================================
    // Shape normalization
    // ========================================================================

    #[test]
    fn test_list_of_accepts_single_object() {
        let value = Shape::ListOf(&["title"]).check(json!({"title": "A"})).unwrap();
        assert_eq!(value, json!([{"title": "A"}]));
    }

    #[test]
    fn test_list_unwraps_single_array_field() {
        let value = Shape::List.check(json!({"titles": ["A", "B"]})).unwrap();
        assert_eq!(value, json!(["A", "B"]));
        assert!(Shape::List.check(json!({"a": [1], "b": [2]})).is_err());
        assert!(Shape::List.check(json!("text")).is_err());
    }

    #[test]
    fn test_list_of_reports_missing_key() {
        let err = Shape::ListOf(&["title", "questions"])
            .check(json!([{"title": "A", "questions": []}, {"title": "B"}]))
            .unwrap_err();
        assert!(err.contains("item 1"));
        assert!(err.contains("questions"));
    }

    #[test]
    fn test_object_unwraps_singleton_list() {
        let value = Shape::Object(&["question"])
            .check(json!([{"question": "q"}]))
            .unwrap();
        assert_eq!(value, json!({"question": "q"}));
    }

    #[test]
    fn test_decode_type_mismatch_is_retriable() {
        let outcome: CallOutcome<Themes> = decode(
            r#"{"key_idea": 1, "key_conclusion": "b", "key_evidence": "c"}"#,
            Shape::Object(THEME_KEYS),
        );
        assert!(matches!(outcome, CallOutcome::RetriableParseError(_)));
    }
}
