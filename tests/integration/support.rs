//! Shared helpers for the integration tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use deep_reader::models::settings::{DeepReaderConfig, ReadingMode};
use deep_reader::services::knowledge::LocalHashEmbeddingProvider;
use deep_reader::services::workflow::{Checkpointer, SqliteCheckpointer};
use deep_reader::storage::Database;
use deep_reader::AppState;
use deep_reader_llm::{LlmError, LlmProvider, LlmResult, ModelRoles};

pub const SEGMENT_SIZE: usize = 6000;
pub const OVERLAP_RATIO: f64 = 0.15;
/// `SEGMENT_SIZE * (1 - OVERLAP_RATIO)`.
pub const STEP: usize = 5100;

const NEVER: usize = usize::MAX;

// ============================================================================
// Scripted provider
// ============================================================================

/// Answers every agent from a script, routed on the agent name each prompt
/// opens with. Reading-agent replies are titled after the `PART-n` marker
/// found in the segment, so titles stay stable across provider instances.
pub struct ScriptedProvider {
    prompts: Mutex<Vec<String>>,
    reading_calls: AtomicUsize,
    /// Reading call (0-based) that fails with a non-retryable error.
    fail_reading_at: AtomicUsize,
    reachable: bool,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            prompts: Mutex::new(Vec::new()),
            reading_calls: AtomicUsize::new(0),
            fail_reading_at: AtomicUsize::new(NEVER),
            reachable: true,
        }
    }

    /// A provider whose endpoint cannot be reached.
    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::new()
        }
    }

    pub fn failing_at_reading_call(call: usize) -> Self {
        let provider = Self::new();
        provider.fail_reading_at.store(call, Ordering::SeqCst);
        provider
    }

    pub fn count(&self, marker: &str) -> usize {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.starts_with(marker))
            .count()
    }

    pub fn reading_calls(&self) -> usize {
        self.reading_calls.load(Ordering::SeqCst)
    }
}

/// Number after the first `PART-` marker in `text`.
fn part_number(text: &str) -> Option<usize> {
    let rest = text.split("PART-").nth(1)?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Text after `label` up to the end of its line.
fn line_after<'a>(text: &'a str, label: &str) -> &'a str {
    text.split(label)
        .nth(1)
        .and_then(|rest| rest.lines().next())
        .unwrap_or("")
        .trim()
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn complete(&self, prompt: &str) -> LlmResult<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());

        let reply = if prompt.starts_with("You are the Reading Agent") {
            let call = self.reading_calls.fetch_add(1, Ordering::SeqCst);
            if call == self.fail_reading_at.load(Ordering::SeqCst) {
                return Err(LlmError::ProviderUnavailable {
                    message: "scripted outage".to_string(),
                });
            }
            let n = part_number(prompt).unwrap_or(0);
            json!([{
                "title": format!("Chapter {}", n),
                "chapter_summary": format!("Summary of chapter {}.", n),
                "questions": [format!("What happens in chapter {}?", n)]
            }])
            .to_string()
        } else if prompt.starts_with("You are the Key Information Agent") {
            let n = part_number(prompt).unwrap_or(0);
            json!([
                {"data_name": format!("Figure {}", n), "description": "a count", "rawdata": {"value": n}, "originfrom": "log"},
                {"data_name": "no-data", "description": "", "rawdata": {}, "originfrom": ""}
            ])
            .to_string()
        } else if prompt.starts_with("You are the Reviewer Agent") {
            let question = line_after(prompt, "\nQuestion: ");
            json!({"question": question, "answer": "It is in the log."}).to_string()
        } else if prompt.starts_with("You are the Summary Agent") {
            "The log so far covers several chapters.".to_string()
        } else if prompt.starts_with("You are the Narrative Analyst") {
            "1. Arrivals\n2. Weather".to_string()
        } else if prompt.starts_with("You are the Theme Thinker") {
            json!({"key_idea": "Trade", "key_conclusion": "Growth", "key_evidence": "Counts"}).to_string()
        } else if prompt.starts_with("You are the Critical Thinker") {
            "Weigh the weather more.".to_string()
        } else if prompt.starts_with("You are the Chief Editor") {
            json!([
                {"title": "Arrivals", "content_brief": "Who came.", "children": [
                    {"title": "Ships", "content_brief": "Ship counts."},
                    {"title": "Crews", "content_brief": "Crew sizes."},
                    {"title": "Cargo", "content_brief": "Goods."}
                ]},
                {"title": "Weather", "content_brief": "Storms."},
                {"title": "Outlook", "content_brief": "What next."}
            ])
            .to_string()
        } else if prompt.starts_with("You are the Summary Selector") {
            json!(["Chapter 1"]).to_string()
        } else if prompt.starts_with("You are the Key Information Selector") {
            json!([{"data_name": "Figure 1"}]).to_string()
        } else if prompt.starts_with("You are the Report Writer") {
            let title = line_after(prompt, "Section to write: \"")
                .trim_end_matches('"')
                .to_string();
            json!({
                "written_part": [format!("Body of {}.", title)],
                "part_summary": format!("Covered {}.", title)
            })
            .to_string()
        } else {
            return Err(LlmError::Other {
                message: "unexpected prompt".to_string(),
            });
        };
        Ok(reply)
    }

    async fn health_check(&self) -> LlmResult<()> {
        if self.reachable {
            Ok(())
        } else {
            Err(LlmError::ProviderUnavailable {
                message: "connection refused".to_string(),
            })
        }
    }
}

// ============================================================================
// Documents and state
// ============================================================================

/// Heading-free text of `parts * STEP` characters, with a `PART-n` marker
/// at the start of every step.
pub fn marked_document(parts: usize) -> String {
    let filler = "The harbour log records weather and cargo and arrivals. ";
    let mut text = String::new();
    for i in 0..parts {
        let mut block = format!("Entry PART-{} ", i + 1);
        while block.len() < STEP {
            block.push_str(filler);
        }
        block.truncate(STEP);
        text.push_str(&block);
    }
    text
}

pub fn write_document(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

pub fn test_config(data_dir: &Path) -> DeepReaderConfig {
    DeepReaderConfig {
        mode: ReadingMode::Test,
        snippet_chunk_size: SEGMENT_SIZE,
        snippet_overlap_ratio: OVERLAP_RATIO,
        rag_chunk_size: 800,
        rag_chunk_overlap: 100,
        retrieval_k: 3,
        data_dir: Some(data_dir.to_path_buf()),
        ..DeepReaderConfig::default()
    }
}

/// File-backed checkpointer under `data_dir`.
pub fn sqlite_checkpointer(data_dir: &Path) -> Arc<dyn Checkpointer> {
    let db = Database::open(&deep_reader::utils::paths::checkpoint_db_path(data_dir)).unwrap();
    Arc::new(SqliteCheckpointer::new(Arc::new(db.pool().clone())).unwrap())
}

pub fn app_state(
    data_dir: &Path,
    provider: Arc<ScriptedProvider>,
    checkpointer: Arc<dyn Checkpointer>,
) -> AppState {
    state_with_roles(data_dir, ModelRoles::uniform(provider), checkpointer)
}

pub fn state_with_roles(
    data_dir: &Path,
    roles: ModelRoles,
    checkpointer: Arc<dyn Checkpointer>,
) -> AppState {
    AppState::from_parts(
        test_config(data_dir),
        data_dir.to_path_buf(),
        roles,
        Arc::new(LocalHashEmbeddingProvider::new(64)),
        checkpointer,
    )
    .unwrap()
}
