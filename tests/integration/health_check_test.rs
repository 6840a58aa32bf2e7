//! Startup Health Check Tests
//!
//! Every configured model and the embedder are checked before a command
//! starts work; one unreachable role is enough to stop it.

use std::sync::Arc;

use deep_reader::services::workflow::{Checkpointer, InMemoryCheckpointer};
use deep_reader::AppError;
use deep_reader_llm::{LlmError, ModelRoles};

use crate::support::{app_state, state_with_roles, ScriptedProvider};

#[tokio::test]
async fn test_reachable_providers_pass() {
    let dir = tempfile::tempdir().unwrap();
    let state = app_state(
        dir.path(),
        Arc::new(ScriptedProvider::new()),
        Arc::new(InMemoryCheckpointer::new()),
    );
    state.health_check().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_writer_fails_before_any_call() {
    let dir = tempfile::tempdir().unwrap();
    let healthy = Arc::new(ScriptedProvider::new());
    let roles = ModelRoles::new(
        healthy.clone(),
        healthy.clone(),
        Arc::new(ScriptedProvider::unreachable()),
    );
    let checkpointer = Arc::new(InMemoryCheckpointer::new());
    let state = state_with_roles(dir.path(), roles, checkpointer.clone());

    let err = state.health_check().await.unwrap_err();

    assert!(matches!(err, AppError::Llm(LlmError::ProviderUnavailable { .. })));
    assert_eq!(healthy.count("You are"), 0);
    assert!(checkpointer.list("any").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unreachable_search_role_fails() {
    let dir = tempfile::tempdir().unwrap();
    let roles = ModelRoles::uniform(Arc::new(ScriptedProvider::new()))
        .with_search(Arc::new(ScriptedProvider::unreachable()));
    let state = state_with_roles(dir.path(), roles, Arc::new(InMemoryCheckpointer::new()));

    assert!(state.health_check().await.is_err());
}
