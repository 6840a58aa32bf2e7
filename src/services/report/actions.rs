//! Report Agents
//!
//! Model calls of the report stage: narrative synthesis, theme extraction
//! and critique, the outline, context selection for a section, and the
//! section writer. Each degrades to a placeholder on malformed output.

use std::collections::BTreeMap;

use deep_reader_llm::{LlmResult, ModelRole, ModelRoles, Reply, Shape};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::models::state::{KeyInformationItem, OutlineNode, ReviewerAnswer, Themes};
use crate::services::knowledge::vector_store::{join_evidence, EvidenceRetriever};
use crate::services::prompts::{
    render, CRITIQUE_THEMES_PROMPT, EXTRACT_THEMES_PROMPT, FINAL_OUTLINE_PROMPT,
    NARRATIVE_FLOW_PROMPT, SELECT_KEY_INFO_PROMPT, SELECT_SUMMARIES_PROMPT, WRITE_SECTION_PROMPT,
};
use crate::services::reconcile::select_matches;
use crate::utils::error::AppResult;

const THEME_KEYS: &[&str] = &["key_idea", "key_conclusion", "key_evidence"];
const OUTLINE_KEYS: &[&str] = &["title"];
const SECTION_KEYS: &[&str] = &["written_part", "part_summary"];

/// Chapter summaries offered to the writer per section.
pub const MAX_SELECTED_SUMMARIES: usize = 5;

pub const NO_SUMMARIES: &str = "No summaries available to select from.";
pub const NO_RELEVANT_SUMMARIES: &str = "No highly relevant summaries found for this section.";
pub const NO_KEY_INFO: &str = "No key information available to select from.";
pub const NO_RELEVANT_KEY_INFO: &str = "No relevant key information found for this section.";
pub const NO_PASSAGES: &str = "No relevant passages were retrieved for this section.";

fn summaries_json(summaries: &BTreeMap<String, String>) -> LlmResult<String> {
    Ok(serde_json::to_string_pretty(summaries)?)
}

// ---------------------------------------------------------------------------
// Narrative and themes
// ---------------------------------------------------------------------------

pub async fn narrative_flow(
    roles: &ModelRoles,
    summaries: &BTreeMap<String, String>,
) -> LlmResult<String> {
    let all = summaries_json(summaries)?;
    let prompt = render(NARRATIVE_FLOW_PROMPT, &[("all_chapter_summaries", &all)]);
    let reply = roles.text(ModelRole::Smart, &prompt).await?;
    Ok(reply.unwrap_or_else(|e| format!("Narrative synthesis failed after retries: {}", e)))
}

/// Distill the three-key theme object, optionally revising it against a
/// critique from the previous round.
pub async fn extract_themes(
    roles: &ModelRoles,
    user_question: &str,
    summaries: &BTreeMap<String, String>,
    feedback: Option<&str>,
) -> LlmResult<Themes> {
    let all = summaries_json(summaries)?;
    let feedback_section = match feedback {
        Some(f) if !f.trim().is_empty() => format!(
            "\nCritique of your previous themes. Address it in the revised version:\n{}\n",
            f
        ),
        _ => String::new(),
    };
    let prompt = render(
        EXTRACT_THEMES_PROMPT,
        &[
            ("user_question", user_question),
            ("all_chapter_summaries", &all),
            ("feedback_section", &feedback_section),
        ],
    );
    let reply = roles
        .structured::<Themes>(ModelRole::Smart, &prompt, Shape::Object(THEME_KEYS))
        .await?;
    Ok(reply.unwrap_or_else(Themes::parsing_error))
}

pub async fn critique_themes(
    roles: &ModelRoles,
    user_question: &str,
    themes: &Themes,
    background_summary: &str,
    reviewer_history: &[Vec<ReviewerAnswer>],
) -> LlmResult<String> {
    let history = serde_json::to_string_pretty(reviewer_history)?;
    let prompt = render(
        CRITIQUE_THEMES_PROMPT,
        &[
            ("user_question", user_question),
            ("key_idea", &themes.key_idea),
            ("key_conclusion", &themes.key_conclusion),
            ("key_evidence", &themes.key_evidence),
            ("background_summary", background_summary),
            ("raw_reviewer_outputs", &history),
        ],
    );
    let reply = roles.text(ModelRole::Smart, &prompt).await?;
    Ok(reply.unwrap_or_else(|e| format!("Critique unavailable after retries: {}", e)))
}

// ---------------------------------------------------------------------------
// Outline
// ---------------------------------------------------------------------------

pub async fn generate_outline(
    roles: &ModelRoles,
    user_question: &str,
    narrative: &str,
    themes: &Themes,
    constraints: &str,
) -> LlmResult<Vec<OutlineNode>> {
    let prompt = render(
        FINAL_OUTLINE_PROMPT,
        &[
            ("user_question", user_question),
            ("narrative_outline", narrative),
            ("key_idea", &themes.key_idea),
            ("key_conclusion", &themes.key_conclusion),
            ("key_evidence", &themes.key_evidence),
            ("outline_constraints", constraints),
        ],
    );
    let reply = roles
        .structured::<Vec<OutlineNode>>(ModelRole::Writer, &prompt, Shape::ListOf(OUTLINE_KEYS))
        .await?;
    Ok(reply.unwrap_or_else(|e| vec![OutlineNode::parsing_error(e)]))
}

// ---------------------------------------------------------------------------
// Context selection
// ---------------------------------------------------------------------------

/// Names out of a selection reply. Items may be plain strings or objects
/// naming the choice under one of a few common keys.
pub fn selection_names(items: &[Value]) -> Vec<String> {
    const NAME_KEYS: &[&str] = &["title", "name", "data_name", "chapter"];
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.clone()),
            Value::Object(map) => NAME_KEYS
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_str))
                .map(str::to_string),
            _ => None,
        })
        .filter(|name| !name.trim().is_empty())
        .collect()
}

async fn ask_for_selection(roles: &ModelRoles, role: ModelRole, prompt: &str) -> LlmResult<Vec<String>> {
    let reply = roles.structured::<Vec<Value>>(role, prompt, Shape::List).await?;
    Ok(match reply {
        Reply::Valid(items) => selection_names(&items),
        Reply::Fallback { error } => {
            warn!(error = %error, "Selection failed, continuing without it");
            Vec::new()
        }
    })
}

/// Up to five chapter summaries relevant to one section, rendered for the
/// writer.
pub async fn select_summaries(
    roles: &ModelRoles,
    user_question: &str,
    section_title: &str,
    section_brief: &str,
    summaries: &BTreeMap<String, String>,
) -> LlmResult<String> {
    if summaries.is_empty() {
        return Ok(NO_SUMMARIES.to_string());
    }
    let titles: Vec<&str> = summaries.keys().map(String::as_str).collect();
    let titles_json = serde_json::to_string_pretty(&titles)?;
    let prompt = render(
        SELECT_SUMMARIES_PROMPT,
        &[
            ("user_question", user_question),
            ("section_title", section_title),
            ("section_brief", section_brief),
            ("all_chapter_titles", &titles_json),
        ],
    );

    let suggested = ask_for_selection(roles, ModelRole::Fast, &prompt).await?;
    let picked = select_matches(&suggested, &titles, Some(MAX_SELECTED_SUMMARIES));
    debug!(section = section_title, picked = picked.len(), "Selected chapter summaries");
    if picked.is_empty() {
        return Ok(NO_RELEVANT_SUMMARIES.to_string());
    }

    let blocks: Vec<String> = picked
        .into_iter()
        .map(|i| format!("## Relevant Summary: {}\n\n{}", titles[i], summaries[titles[i]]))
        .collect();
    Ok(blocks.join("\n\n---\n\n"))
}

/// Key information items relevant to one section, rendered for the writer.
pub async fn select_key_information(
    roles: &ModelRoles,
    user_question: &str,
    full_outline: &str,
    section_title: &str,
    section_brief: &str,
    items: &[KeyInformationItem],
) -> LlmResult<String> {
    let candidates: Vec<&KeyInformationItem> = items.iter().filter(|i| !i.is_error()).collect();
    if candidates.is_empty() {
        return Ok(NO_KEY_INFO.to_string());
    }
    let listing: Vec<Value> = candidates
        .iter()
        .map(|i| json!({"data_name": i.data_name, "description": i.description}))
        .collect();
    let listing = serde_json::to_string_pretty(&listing)?;
    let prompt = render(
        SELECT_KEY_INFO_PROMPT,
        &[
            ("user_question", user_question),
            ("full_outline", full_outline),
            ("section_title", section_title),
            ("section_brief", section_brief),
            ("all_key_info_list", &listing),
        ],
    );

    let suggested = ask_for_selection(roles, ModelRole::Smart, &prompt).await?;
    let names: Vec<&str> = candidates.iter().map(|i| i.data_name.as_str()).collect();
    let picked = select_matches(&suggested, &names, None);
    debug!(section = section_title, picked = picked.len(), "Selected key information");
    if picked.is_empty() {
        return Ok(NO_RELEVANT_KEY_INFO.to_string());
    }

    let mut blocks = Vec::with_capacity(picked.len());
    for i in picked {
        let item = candidates[i];
        let raw = serde_json::to_string_pretty(&item.rawdata)?;
        blocks.push(format!(
            "### Relevant Key Information: {}\n\n**Description:** {}\n\n**Raw Data:**\n```json\n{}\n```",
            item.data_name, item.description, raw
        ));
    }
    Ok(blocks.join("\n\n---\n\n"))
}

/// Passages retrieved for `"{title}: {brief}"`.
pub async fn retrieve_passages(
    retriever: &dyn EvidenceRetriever,
    section_title: &str,
    section_brief: &str,
    k: usize,
) -> AppResult<String> {
    let query = format!("{}: {}", section_title, section_brief);
    let hits = retriever.search(&query, k).await?;
    if hits.is_empty() {
        return Ok(NO_PASSAGES.to_string());
    }
    Ok(join_evidence(&hits))
}

// ---------------------------------------------------------------------------
// Section writer
// ---------------------------------------------------------------------------

/// Everything the writer sees for one leaf section.
#[derive(Debug, Clone, Copy)]
pub struct SectionRequest<'a> {
    pub user_question: &'a str,
    pub themes: &'a Themes,
    pub full_outline: &'a str,
    pub section_title: &'a str,
    pub section_brief: &'a str,
    pub rag_context: &'a str,
    pub key_info_context: &'a str,
    pub summaries_context: &'a str,
    pub previous_part_summary: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WrittenSection {
    pub paragraphs: Vec<String>,
    pub summary: String,
}

#[derive(Deserialize)]
struct RawSection {
    written_part: Value,
    #[serde(default)]
    part_summary: Value,
}

fn value_text(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    }
}

impl From<RawSection> for WrittenSection {
    fn from(raw: RawSection) -> Self {
        let paragraphs = match raw.written_part {
            Value::Array(items) => items.into_iter().map(value_text).collect(),
            Value::Null => Vec::new(),
            other => vec![value_text(other)],
        };
        Self {
            paragraphs: paragraphs
                .into_iter()
                .filter(|p: &String| !p.trim().is_empty())
                .map(|p| clean_markdown_tables(&p))
                .collect(),
            summary: value_text(raw.part_summary),
        }
    }
}

pub async fn write_section(roles: &ModelRoles, request: &SectionRequest<'_>) -> LlmResult<WrittenSection> {
    let prompt = render(
        WRITE_SECTION_PROMPT,
        &[
            ("user_question", request.user_question),
            ("key_idea", &request.themes.key_idea),
            ("key_conclusion", &request.themes.key_conclusion),
            ("key_evidence", &request.themes.key_evidence),
            ("full_outline", request.full_outline),
            ("rag_context", request.rag_context),
            ("key_info_context", request.key_info_context),
            ("all_summaries", request.summaries_context),
            ("previous_part_summary", request.previous_part_summary),
            ("section_title", request.section_title),
            ("section_brief", request.section_brief),
        ],
    );
    let reply = roles
        .structured::<RawSection>(ModelRole::Writer, &prompt, Shape::Object(SECTION_KEYS))
        .await?;
    Ok(match reply {
        Reply::Valid(raw) => raw.into(),
        Reply::Fallback { error } => {
            let text = format!(
                "Error during generation of section '{}' after retries: {}",
                request.section_title, error
            );
            WrittenSection {
                paragraphs: vec![text.clone()],
                summary: text,
            }
        }
    })
}

/// Drop blank lines sitting between two markdown table rows, which break
/// table rendering.
pub fn clean_markdown_tables(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let mut out: Vec<&str> = Vec::with_capacity(lines.len());

    for (i, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            let prev_row = out.iter().rev().find(|l| !l.trim().is_empty()).is_some_and(|l| is_table_row(l));
            let next_row = lines[i + 1..]
                .iter()
                .find(|l| !l.trim().is_empty())
                .is_some_and(|l| is_table_row(l));
            if prev_row && next_row {
                continue;
            }
        }
        out.push(line);
    }
    out.join("\n")
}

fn is_table_row(line: &str) -> bool {
    line.trim_start().starts_with('|')
}
