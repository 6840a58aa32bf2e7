//! Run Artifacts
//!
//! Renders a finished (or failed) run into its output directory:
//! - `final_state.json` - the complete run state
//! - `chapter_summary.md` - one section per chapter title
//! - `thematic_analysis.md` - the agreed themes
//! - `debate_questions.md` - reader questions and answers per reading round
//! - `draft_report.md` - the written report
//!
//! A file whose source data is absent is skipped.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::models::state::{OutlineNode, RunState};
use crate::utils::error::AppResult;
use crate::utils::paths::ensure_dir;

pub const FINAL_STATE_FILE: &str = "final_state.json";
pub const CHAPTER_SUMMARY_FILE: &str = "chapter_summary.md";
pub const THEMATIC_ANALYSIS_FILE: &str = "thematic_analysis.md";
pub const DEBATE_QUESTIONS_FILE: &str = "debate_questions.md";
pub const DRAFT_REPORT_FILE: &str = "draft_report.md";

/// Files written by one `write_artifacts` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ArtifactSet {
    pub dir: PathBuf,
    pub files: Vec<PathBuf>,
}

/// `<output_root>/<timestamp>_<stem>`.
pub fn run_output_dir(output_root: &Path, document: &Path) -> PathBuf {
    let stem = document
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "document".to_string());
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    output_root.join(format!("{}_{}", timestamp, stem))
}

/// Write every artifact the state has data for into `dir`.
pub fn write_artifacts(state: &RunState, dir: &Path) -> AppResult<ArtifactSet> {
    ensure_dir(dir)?;
    let mut set = ArtifactSet {
        dir: dir.to_path_buf(),
        files: Vec::new(),
    };

    let state_json = serde_json::to_string_pretty(state)?;
    write_file(&mut set, FINAL_STATE_FILE, &state_json)?;

    let renderers: [(&str, fn(&RunState) -> Option<String>); 4] = [
        (CHAPTER_SUMMARY_FILE, render_chapter_summaries),
        (THEMATIC_ANALYSIS_FILE, render_thematic_analysis),
        (DEBATE_QUESTIONS_FILE, render_debate_questions),
        (DRAFT_REPORT_FILE, render_draft_report),
    ];
    for (name, render) in renderers {
        match render(state) {
            Some(markdown) => write_file(&mut set, name, &markdown)?,
            None => info!(file = name, "No data for artifact, skipping"),
        }
    }

    Ok(set)
}

fn write_file(set: &mut ArtifactSet, name: &str, content: &str) -> AppResult<()> {
    let path = set.dir.join(name);
    std::fs::write(&path, content)?;
    info!(path = %path.display(), "Wrote artifact");
    set.files.push(path);
    Ok(())
}

// ---------------------------------------------------------------------------
// Renderers
// ---------------------------------------------------------------------------

pub fn render_chapter_summaries(state: &RunState) -> Option<String> {
    if state.chapter_summaries.is_empty() {
        return None;
    }
    let mut out = String::from("# Chapter Summaries\n");
    for (title, summary) in &state.chapter_summaries {
        out.push_str(&format!("\n## {}\n\n{}\n", title, summary.trim()));
    }
    Some(out)
}

fn title_case(key: &str) -> String {
    key.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn render_thematic_analysis(state: &RunState) -> Option<String> {
    let themes = state.final_keys.as_ref().or(state.thematic_analysis.as_ref())?;
    let mut out = String::from("# Thematic Analysis\n");
    for (key, value) in themes.entries() {
        out.push_str(&format!("\n## {}\n\n{}\n", title_case(key), value.trim()));
    }
    Some(out)
}

pub fn render_debate_questions(state: &RunState) -> Option<String> {
    if state.raw_reviewer_outputs.iter().all(Vec::is_empty) {
        return None;
    }
    let mut out = String::from("# Debate Questions\n");
    for (round, answers) in state.raw_reviewer_outputs.iter().enumerate() {
        out.push_str(&format!("\n## Round {}\n", round + 1));
        for answer in answers {
            out.push_str(&format!("\n### {}\n\n{}\n", answer.question.trim(), answer.answer.trim()));
        }
    }
    Some(out)
}

pub fn render_draft_report(state: &RunState) -> Option<String> {
    let draft = state.draft_report.as_ref().filter(|d| !d.is_empty())?;
    let mut out = String::new();
    for node in draft {
        render_node(node, 1, &mut out);
    }
    Some(out.trim_end().to_string() + "\n")
}

fn render_node(node: &OutlineNode, depth: usize, out: &mut String) {
    out.push_str(&format!("{} {}\n\n", "#".repeat(depth.min(6)), node.title));
    if let Some(brief) = node.content_brief.as_deref().filter(|b| !b.trim().is_empty()) {
        out.push_str(&format!("*{}*\n\n", brief.trim()));
    }
    if let Some(paragraphs) = &node.written_content {
        if !paragraphs.is_empty() {
            out.push_str(&paragraphs.join("\n\n"));
            out.push_str("\n\n");
        }
    }
    for child in &node.children {
        render_node(child, depth + 1, out);
    }
}
