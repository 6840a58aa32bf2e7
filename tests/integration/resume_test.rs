//! Resume Integration Tests
//!
//! A run that fails mid-reading keeps its progress in the SQLite
//! checkpointer; the next run of the same document continues from the
//! first unread segment. Completed runs and `fresh` requests start over.

use std::sync::Arc;

use deep_reader::models::state::RunStage;
use deep_reader::services::workflow::{run_status, RunRequest, SourceDocument};

use crate::support::{app_state, marked_document, sqlite_checkpointer, write_document, ScriptedProvider};

fn request(path: &std::path::Path, fresh: bool) -> RunRequest {
    SourceDocument::load(path)
        .unwrap()
        .into_request(Some("What happened?".to_string()), None, fresh)
}

// ============================================================================
// Failure and resume
// ============================================================================

#[tokio::test]
async fn test_failed_run_resumes_from_first_unread_segment() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_document(dir.path(), "harbour.md", &marked_document(3));

    // Second reading call fails with a non-retryable provider error.
    let failing = Arc::new(ScriptedProvider::failing_at_reading_call(1));
    let state = app_state(dir.path(), failing.clone(), sqlite_checkpointer(dir.path()));
    let failed = state.driver().run(&request(&path, false)).await.unwrap();

    assert_eq!(failed.stage, RunStage::Reading);
    let error = failed.error.clone().unwrap();
    assert!(error.contains("segment 2"), "error was: {}", error);
    assert_eq!(failed.read_count(), 1);
    assert_eq!(failed.snippet_analysis_history.len(), 1);
    assert_eq!(failing.count("You are the Narrative Analyst"), 0);

    let status = run_status(state.checkpointer().as_ref(), &request(&path, false).thread_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.segments_read, 1);
    assert_eq!(status.segments_total, 3);
    assert!(status.error.is_some());
    assert_eq!(
        state.checkpointer().list(&request(&path, false).thread_id).await.unwrap().len(),
        1
    );
    drop(state);

    // A new process: new provider, checkpointer reopened from disk.
    let healthy = Arc::new(ScriptedProvider::new());
    let state = app_state(dir.path(), healthy.clone(), sqlite_checkpointer(dir.path()));
    let resumed = state.driver().run(&request(&path, false)).await.unwrap();

    assert_eq!(resumed.stage, RunStage::Completed);
    assert!(resumed.error.is_none());
    assert_eq!(healthy.reading_calls(), 2);
    assert_eq!(resumed.read_count(), 3);
    assert_eq!(resumed.snippet_analysis_history.len(), 3);
    assert_eq!(resumed.chapter_summaries.len(), 3);
    assert_eq!(resumed.user_core_question, "What happened?");
}

#[tokio::test]
async fn test_fresh_request_ignores_unfinished_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_document(dir.path(), "harbour.md", &marked_document(2));

    let failing = Arc::new(ScriptedProvider::failing_at_reading_call(1));
    let state = app_state(dir.path(), failing, sqlite_checkpointer(dir.path()));
    let failed = state.driver().run(&request(&path, false)).await.unwrap();
    assert!(failed.error.is_some());

    let healthy = Arc::new(ScriptedProvider::new());
    let state = app_state(dir.path(), healthy.clone(), sqlite_checkpointer(dir.path()));
    let run = state.driver().run(&request(&path, true)).await.unwrap();

    assert_eq!(run.stage, RunStage::Completed);
    assert_eq!(healthy.reading_calls(), 2);
}

#[tokio::test]
async fn test_completed_run_starts_over() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_document(dir.path(), "harbour.md", &marked_document(2));
    let checkpointer = sqlite_checkpointer(dir.path());
    let thread_id = request(&path, false).thread_id;

    let first = Arc::new(ScriptedProvider::new());
    let state = app_state(dir.path(), first.clone(), checkpointer.clone());
    assert_eq!(
        state.driver().run(&request(&path, false)).await.unwrap().stage,
        RunStage::Completed
    );
    let first_id = checkpointer.load(&thread_id).await.unwrap().unwrap().id;

    let second = Arc::new(ScriptedProvider::new());
    let state = app_state(dir.path(), second.clone(), checkpointer.clone());
    let run = state.driver().run(&request(&path, false)).await.unwrap();

    assert_eq!(run.stage, RunStage::Completed);
    assert_eq!(second.reading_calls(), 2);

    let saved = checkpointer.list(&thread_id).await.unwrap();
    assert_eq!(saved.len(), 1);
    assert_ne!(saved[0].id, first_id);
    assert_eq!(saved[0].stage, RunStage::Completed);
}

// ============================================================================
// Checkpoint retention
// ============================================================================

#[tokio::test]
async fn test_checkpoints_stay_bounded_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_document(dir.path(), "harbour.md", &marked_document(3));
    let checkpointer = sqlite_checkpointer(dir.path());
    let thread_id = request(&path, false).thread_id;

    // Failed run, resumed run, then a completed run that starts over.
    let runs = [
        ScriptedProvider::failing_at_reading_call(1),
        ScriptedProvider::new(),
        ScriptedProvider::new(),
    ];
    for provider in runs {
        let state = app_state(dir.path(), Arc::new(provider), checkpointer.clone());
        state.driver().run(&request(&path, false)).await.unwrap();
        assert_eq!(checkpointer.list(&thread_id).await.unwrap().len(), 1);
    }

    let status = run_status(checkpointer.as_ref(), &thread_id).await.unwrap().unwrap();
    assert_eq!(status.stage, RunStage::Completed);
    assert_eq!(status.segments_read, 3);
}
