//! End-to-End Run Tests
//!
//! Drives a heading-free document through ingestion, the reading loop, and
//! the report with scripted agents, then renders the artifacts.

use std::collections::BTreeSet;
use std::sync::Arc;

use deep_reader::models::state::RunStage;
use deep_reader::services::artifacts::{write_artifacts, DRAFT_REPORT_FILE, FINAL_STATE_FILE};
use deep_reader::services::knowledge::IngestStatus;
use deep_reader::services::workflow::{run_status, Checkpointer, InMemoryCheckpointer, SourceDocument};
use deep_reader::RunState;

use crate::support::{app_state, marked_document, write_document, ScriptedProvider, STEP};

// ============================================================================
// Full run
// ============================================================================

#[tokio::test]
async fn test_three_segment_document_runs_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    let text = marked_document(3);
    let path = write_document(dir.path(), "harbour.md", &text);

    let provider = Arc::new(ScriptedProvider::new());
    let checkpointer = Arc::new(InMemoryCheckpointer::new());
    let state = app_state(dir.path(), provider.clone(), checkpointer.clone());

    let request = SourceDocument::load(&path)
        .unwrap()
        .into_request(Some("How busy was the harbour?".to_string()), None, false);
    let thread_id = request.thread_id.clone();
    let run = state.driver().run(&request).await.unwrap();

    assert_eq!(run.stage, RunStage::Completed);
    assert!(run.error.is_none(), "unexpected error: {:?}", run.error);

    // Fixed-size chunking: one segment per step, each read exactly once.
    let expected_segments = text.chars().count().div_ceil(STEP);
    assert_eq!(run.reading_snippets.len(), expected_segments);
    assert_eq!(run.read_count(), expected_segments);
    assert_eq!(provider.reading_calls(), expected_segments);
    assert_eq!(run.snippet_analysis_history.len(), expected_segments);

    let titles: BTreeSet<&str> = run.chapter_summaries.keys().map(String::as_str).collect();
    assert_eq!(titles, BTreeSet::from(["Chapter 1", "Chapter 2", "Chapter 3"]));
    let history_order: Vec<&str> = run
        .snippet_analysis_history
        .iter()
        .map(|chapters| chapters[0].title.as_str())
        .collect();
    assert_eq!(history_order, vec!["Chapter 1", "Chapter 2", "Chapter 3"]);

    // Sentinel items are filtered; one real item per segment.
    let names: Vec<&str> = run.key_information.iter().map(|k| k.data_name.as_str()).collect();
    assert_eq!(names, vec!["Figure 1", "Figure 2", "Figure 3"]);

    // Every echoed answer found its question.
    for chapters in &run.snippet_analysis_history {
        assert_eq!(chapters[0].reviewed_answers.len(), 1);
    }
    assert!(run.reconciliation_log.iter().all(|s| s.accepted == 1 && s.discarded == 0));

    // Outline trimmed to the test-mode caps.
    let outline = run.final_report_outline.as_ref().unwrap();
    assert!(outline.len() <= 2);
    assert!(outline.iter().all(|node| node.children.len() <= 2));
    assert!(run.outline_violations > 0);

    let draft = run.draft_report.as_ref().unwrap();
    let leaves: Vec<_> = draft
        .iter()
        .flat_map(|top| {
            if top.children.is_empty() {
                vec![top]
            } else {
                top.children.iter().collect()
            }
        })
        .collect();
    assert_eq!(leaves.len(), provider.count("You are the Report Writer"));
    for leaf in leaves {
        let paragraphs = leaf.written_content.as_ref().unwrap();
        assert_eq!(paragraphs, &vec![format!("Body of {}.", leaf.title)]);
        assert!(leaf.content_brief.is_none());
    }

    let status = run_status(checkpointer.as_ref(), &thread_id).await.unwrap().unwrap();
    assert_eq!(status.stage, RunStage::Completed);
    assert_eq!(status.segments_read, expected_segments);
    assert_eq!(checkpointer.list(&thread_id).await.unwrap().len(), 1);
    assert!(run.ingest.as_ref().is_some_and(|i| i.status == IngestStatus::Created));
}

#[tokio::test]
async fn test_artifacts_from_completed_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_document(dir.path(), "harbour.txt", &marked_document(2));
    let provider = Arc::new(ScriptedProvider::new());
    let state = app_state(dir.path(), provider, Arc::new(InMemoryCheckpointer::new()));

    let request = SourceDocument::load(&path).unwrap().into_request(None, None, false);
    let run = state.driver().run(&request).await.unwrap();

    let out = dir.path().join("out");
    let artifacts = write_artifacts(&run, &out).unwrap();
    assert_eq!(artifacts.files.len(), 5);

    let json = std::fs::read_to_string(out.join(FINAL_STATE_FILE)).unwrap();
    let restored: RunState = serde_json::from_str(&json).unwrap();
    assert_eq!(restored.stage, RunStage::Completed);
    assert_eq!(restored.chapter_summaries, run.chapter_summaries);

    let report = std::fs::read_to_string(out.join(DRAFT_REPORT_FILE)).unwrap();
    assert!(report.starts_with("# "));
    assert!(report.contains("Body of"));
}

#[tokio::test]
async fn test_second_run_reuses_vector_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_document(dir.path(), "harbour.md", &marked_document(1));

    for expected in [IngestStatus::Created, IngestStatus::SkippedExisting] {
        let state = app_state(
            dir.path(),
            Arc::new(ScriptedProvider::new()),
            Arc::new(InMemoryCheckpointer::new()),
        );
        let request = SourceDocument::load(&path).unwrap().into_request(None, None, false);
        let run = state.driver().run(&request).await.unwrap();
        assert_eq!(run.ingest.as_ref().unwrap().status, expected);
        assert_eq!(run.stage, RunStage::Completed);
    }
}
