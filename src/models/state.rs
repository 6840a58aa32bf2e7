//! Run State Models
//!
//! Everything a reading run accumulates, from the first segment to the
//! written report. `RunState` is the single value threaded through the
//! workflow, checkpointed between steps, and dumped as `final_state.json`.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::services::knowledge::chunker::HeadingTree;
use crate::services::knowledge::ingestion::IngestReport;

/// Bumped whenever a field changes meaning.
pub const STATE_VERSION: u32 = 1;

pub const DEFAULT_QUESTION: &str = "No specific question provided.";
pub const DEFAULT_ROLE: &str = "scholarly research assistant";
pub const SEED_BACKGROUND: &str = "This is the beginning of the document.";

/// `data_name` a key-information agent uses to say "nothing here".
pub const NO_DATA_SENTINEL: &str = "no-data";

/// Accept `null`, numbers, or booleans where a string is expected.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

fn lenient_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => Vec::new(),
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) if !s.trim().is_empty() => Some(s),
                Value::String(_) | Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        Value::String(s) if !s.trim().is_empty() => vec![s],
        _ => Vec::new(),
    })
}

// ---------------------------------------------------------------------------
// Segments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentStatus {
    #[default]
    Unread,
    Read,
}

/// One unit of the reading loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub content: String,
    #[serde(default)]
    pub status: SegmentStatus,
    /// Index of the top-level heading section this segment came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<usize>,
}

impl Segment {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            status: SegmentStatus::Unread,
            section: None,
        }
    }

    pub fn in_section(mut self, section: usize) -> Self {
        self.section = Some(section);
        self
    }

    pub fn is_read(&self) -> bool {
        self.status == SegmentStatus::Read
    }
}

// ---------------------------------------------------------------------------
// Agent outputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewedAnswer {
    pub question: String,
    pub answer: String,
}

/// Reading agent output for one logical chapter inside a segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterAnalysis {
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub chapter_summary: String,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub questions: Vec<String>,
    /// Attached by reconciliation, never by the agent.
    #[serde(default)]
    pub reviewed_answers: Vec<ReviewedAnswer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChapterAnalysis {
    /// Placeholder used when the reading agent output could not be parsed.
    pub fn parsing_error(error: &str) -> Self {
        Self {
            title: "Parsing Error".to_string(),
            chapter_summary: format!(
                "Failed to parse summary from LLM response after retries. Error: {}",
                error
            ),
            questions: Vec::new(),
            reviewed_answers: Vec::new(),
            error: Some(error.to_string()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// A citable data point or assertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyInformationItem {
    #[serde(default, deserialize_with = "lenient_string")]
    pub data_name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(default)]
    pub rawdata: Value,
    #[serde(default, deserialize_with = "lenient_string")]
    pub originfrom: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl KeyInformationItem {
    pub fn parsing_error(error: &str) -> Self {
        Self {
            data_name: "Parsing Error".to_string(),
            description: format!(
                "Failed to parse key information from LLM response after retries. Error: {}",
                error
            ),
            rawdata: Value::Object(Default::default()),
            originfrom: "N/A".to_string(),
            error: Some(error.to_string()),
        }
    }

    /// The "nothing extracted" marker, which must never be stored.
    pub fn is_sentinel(&self) -> bool {
        self.data_name.trim().eq_ignore_ascii_case(NO_DATA_SENTINEL)
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Fact-answering agent output for one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewerAnswer {
    #[serde(default, deserialize_with = "lenient_string")]
    pub question: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReviewerAnswer {
    pub fn parsing_error(question: &str, error: &str) -> Self {
        Self {
            question: question.to_string(),
            answer: format!("Error parsing answer after retries: {}", error),
            error: Some(error.to_string()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Rolling compressed context carried between iterations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveMemory {
    pub background_summary: String,
    #[serde(default)]
    pub last_data_item_context: String,
}

impl ActiveMemory {
    pub fn seed() -> Self {
        Self {
            background_summary: SEED_BACKGROUND.to_string(),
            last_data_item_context: String::new(),
        }
    }
}

impl Default for ActiveMemory {
    fn default() -> Self {
        Self::seed()
    }
}

/// Outcome counters for one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationStats {
    pub accepted: usize,
    /// Answers with no original question above the threshold.
    pub discarded: usize,
    /// Answers skipped because the reviewer call failed.
    pub errored: usize,
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// The three-key theme object refined by the critique loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Themes {
    #[serde(default, deserialize_with = "lenient_string")]
    pub key_idea: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub key_conclusion: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub key_evidence: String,
}

impl Themes {
    pub fn parsing_error(error: &str) -> Self {
        Self {
            key_idea: format!("Error parsing response after retries: {}", error),
            key_conclusion: String::new(),
            key_evidence: String::new(),
        }
    }

    /// `(key, value)` pairs in display order.
    pub fn entries(&self) -> [(&'static str, &str); 3] {
        [
            ("key_idea", &self.key_idea),
            ("key_conclusion", &self.key_conclusion),
            ("key_evidence", &self.key_evidence),
        ]
    }
}

/// One entry of the report outline; filled with prose once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlineNode {
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_brief: Option<String>,
    #[serde(default)]
    pub children: Vec<OutlineNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub written_content: Option<Vec<String>>,
    /// Set on the placeholder produced when outline generation failed.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl OutlineNode {
    pub fn new(title: impl Into<String>, brief: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content_brief: Some(brief.into()),
            children: Vec::new(),
            written_content: None,
            is_error: false,
        }
    }

    pub fn with_children(mut self, children: Vec<OutlineNode>) -> Self {
        self.children = children;
        self
    }

    pub fn parsing_error(error: &str) -> Self {
        Self {
            title: format!("Error parsing outline after retries: {}", error),
            content_brief: Some(String::new()),
            children: Vec::new(),
            written_content: None,
            is_error: true,
        }
    }

    pub fn brief(&self) -> &str {
        self.content_brief.as_deref().unwrap_or("")
    }
}

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

/// Workflow position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStage {
    #[default]
    Ingest,
    Reading,
    Report,
    Completed,
}

impl std::fmt::Display for RunStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStage::Ingest => write!(f, "ingest"),
            RunStage::Reading => write!(f, "reading"),
            RunStage::Report => write!(f, "report"),
            RunStage::Completed => write!(f, "completed"),
        }
    }
}

/// Complete state of one document run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub version: u32,
    pub document_path: String,
    pub user_core_question: String,
    pub research_role: String,
    /// Vector store name.
    #[serde(default)]
    pub db_name: Option<String>,
    #[serde(default)]
    pub raw_markdown_content: String,
    #[serde(default)]
    pub ingest: Option<IngestReport>,

    // Reading
    #[serde(default)]
    pub table_of_contents: Option<HeadingTree>,
    #[serde(default)]
    pub reading_snippets: Vec<Segment>,
    /// One entry per processed segment.
    #[serde(default)]
    pub snippet_analysis_history: Vec<Vec<ChapterAnalysis>>,
    /// One entry per processed segment.
    #[serde(default)]
    pub raw_reviewer_outputs: Vec<Vec<ReviewerAnswer>>,
    #[serde(default)]
    pub reconciliation_log: Vec<ReconciliationStats>,
    #[serde(default)]
    pub chapter_summaries: BTreeMap<String, String>,
    #[serde(default)]
    pub key_information: Vec<KeyInformationItem>,
    #[serde(default)]
    pub active_memory: ActiveMemory,
    #[serde(default)]
    pub reading_initialized: bool,
    #[serde(default)]
    pub reading_completed: bool,

    // Report
    #[serde(default)]
    pub report_narrative_outline: Option<String>,
    #[serde(default)]
    pub thematic_analysis: Option<Themes>,
    #[serde(default)]
    pub critic_consensus_log: Vec<String>,
    #[serde(default)]
    pub final_keys: Option<Themes>,
    #[serde(default)]
    pub final_report_outline: Option<Vec<OutlineNode>>,
    #[serde(default)]
    pub outline_violations: usize,
    #[serde(default)]
    pub draft_report: Option<Vec<OutlineNode>>,

    #[serde(default)]
    pub stage: RunStage,
    #[serde(default)]
    pub error: Option<String>,
    pub updated_at: String,
}

impl RunState {
    pub fn new(
        document_path: impl Into<String>,
        user_core_question: Option<String>,
        research_role: Option<String>,
    ) -> Self {
        Self {
            version: STATE_VERSION,
            document_path: document_path.into(),
            user_core_question: user_core_question
                .filter(|q| !q.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_QUESTION.to_string()),
            research_role: research_role
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_ROLE.to_string()),
            db_name: None,
            raw_markdown_content: String::new(),
            ingest: None,
            table_of_contents: None,
            reading_snippets: Vec::new(),
            snippet_analysis_history: Vec::new(),
            raw_reviewer_outputs: Vec::new(),
            reconciliation_log: Vec::new(),
            chapter_summaries: BTreeMap::new(),
            key_information: Vec::new(),
            active_memory: ActiveMemory::seed(),
            reading_initialized: false,
            reading_completed: false,
            report_narrative_outline: None,
            thematic_analysis: None,
            critic_consensus_log: Vec::new(),
            final_keys: None,
            final_report_outline: None,
            outline_violations: 0,
            draft_report: None,
            stage: RunStage::Ingest,
            error: None,
            updated_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.raw_markdown_content = content.into();
        self
    }

    /// Index of the first unread segment.
    pub fn next_unread(&self) -> Option<usize> {
        self.reading_snippets.iter().position(|s| !s.is_read())
    }

    pub fn read_count(&self) -> usize {
        self.reading_snippets.iter().filter(|s| s.is_read()).count()
    }

    /// Mark segment `index` read, and its heading section once every
    /// segment cut from that section is read.
    pub fn mark_segment_read(&mut self, index: usize) {
        let Some(segment) = self.reading_snippets.get_mut(index) else {
            return;
        };
        segment.status = SegmentStatus::Read;
        let Some(section) = segment.section else {
            return;
        };

        let section_done = self
            .reading_snippets
            .iter()
            .filter(|s| s.section == Some(section))
            .all(Segment::is_read);
        if section_done {
            if let Some(node) = self
                .table_of_contents
                .as_mut()
                .and_then(|toc| toc.sections.get_mut(section))
            {
                node.mark_read();
            }
        }
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
        self.touch();
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().to_rfc3339();
    }
}

// ============================================================================
// Tests
// ============================================================================
