//! Prompt Templates
//!
//! Templates use `{{name}}` placeholders filled by [`render`] in a single
//! pass, so substituted document text is never re-scanned for
//! placeholders. Every template opens with the agent's name, which keeps
//! logs and scripted test providers easy to route.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};

// ============================================================================
// Reading stage
// ============================================================================

pub const READING_AGENT_PROMPT: &str = r#"You are the Reading Agent, acting as a {{research_role}}.

Analyze the document segment below. It may contain one or more chapters or sub-chapters, and its first chapter may continue one that started in the previous segment.

For every chapter you find:
1. Summarize it with the user's core question in mind: main line of argument, key viewpoints, and important data.
2. Pose up to {{max_questions}} probing questions that connect it to other parts of the document or test the author's assumptions.

User's core question: {{user_question}}

Background memory from earlier segments:
{{background_memory}}

Analysis of the last chapters of the previous segment:
{{previous_chapters_context}}

Segment:
---
{{chapter_content}}
---

Respond with ONLY a JSON list, one object per chapter:
[{"title": "chapter title", "chapter_summary": "summary", "questions": ["question"]}]"#;

pub const KEY_INFO_AGENT_PROMPT: &str = r#"You are the Key Information Agent, a meticulous data analyst acting as a {{research_role}}.

Extract citable data points and key assertions from the segment below that serve as evidence for the user's core question.

User's core question: {{user_question}}

Background memory:
{{background_memory}}

Last data item of the previous segment (it may continue here):
{{last_data_item_context}}

Segment:
---
{{chapter_content}}
---

Respond with ONLY a JSON list:
[{"data_name": "short name", "description": "what it shows", "rawdata": {}, "originfrom": "where in the text"}]
If nothing valuable is present, respond with [{"data_name": "no-data", "description": "", "rawdata": {}, "originfrom": ""}]."#;

pub const REVIEWER_AGENT_PROMPT: &str = r#"You are the Reviewer Agent. Answer the question strictly from the context retrieved from the document. If the context does not contain the answer, say so.

Context from document:
{{context}}

User's core question (for focus): {{user_question}}

Question: {{question}}

Respond with ONLY a JSON object:
{"question": "the question, repeated verbatim", "answer": "your answer"}"#;

pub const SUMMARY_AGENT_PROMPT: &str = r#"You are the Summary Agent. Merge the new chapter summaries and reviewed answers below into one dense background memory for reading the rest of the document. Keep conclusions, data, and open threads. Respond with plain text only.

New chapter summaries:
{{newly_generated_summaries}}

Reviewed answers:
- {{reviewed_answers}}"#;

// ============================================================================
// Report stage
// ============================================================================

pub const NARRATIVE_FLOW_PROMPT: &str = r#"You are the Narrative Analyst. Group the chapter summaries below into the document's main themes and lines of argument, and produce a concise high-level narrative outline in markdown.

Chapter summaries (JSON):
{{all_chapter_summaries}}"#;

pub const EXTRACT_THEMES_PROMPT: &str = r#"You are the Theme Thinker. Distill the document's key idea, key conclusion, and key evidence with respect to the user's core question.

User's core question: {{user_question}}

Chapter summaries (JSON):
{{all_chapter_summaries}}
{{feedback_section}}
Respond with ONLY a JSON object:
{"key_idea": "...", "key_conclusion": "...", "key_evidence": "..."}"#;

pub const CRITIQUE_THEMES_PROMPT: &str = r#"You are the Critical Thinker. Challenge the proposed themes below. Point out weaknesses, overlooked evidence, and better interpretations, in one constructive feedback paragraph.

User's core question: {{user_question}}

Proposed themes:
- Key Idea: {{key_idea}}
- Key Conclusion: {{key_conclusion}}
- Key Evidence: {{key_evidence}}

Background summary of the whole document:
{{background_summary}}

Questions and answers collected while reading (JSON):
{{raw_reviewer_outputs}}"#;

pub const FINAL_OUTLINE_PROMPT: &str = r#"You are the Chief Editor. Build the final report outline from the narrative outline and the agreed themes.

User's core question: {{user_question}}

Narrative outline:
{{narrative_outline}}

Final themes:
- Key Idea: {{key_idea}}
- Key Conclusion: {{key_conclusion}}
- Key Evidence: {{key_evidence}}

Constraints:
{{outline_constraints}}

Respond with ONLY a JSON list of top-level sections:
[{"title": "...", "content_brief": "...", "children": [{"title": "...", "content_brief": "...", "children": []}]}]"#;

pub const WRITE_SECTION_PROMPT: &str = r#"You are the Report Writer. Write one section of an analytical report, grounded strictly in the context provided.

User's core question: {{user_question}}

Final themes:
- Key Idea: {{key_idea}}
- Key Conclusion: {{key_conclusion}}
- Key Evidence: {{key_evidence}}

Full outline (JSON):
{{full_outline}}

Retrieved passages:
{{rag_context}}

Relevant key information:
{{key_info_context}}

Relevant chapter summaries:
{{all_summaries}}

Summaries of the sections written so far:
{{previous_part_summary}}

Section to write: "{{section_title}}"
Core focus for this section: "{{section_brief}}"

Respond with ONLY a JSON object:
{"written_part": ["paragraph", "paragraph"], "part_summary": "one-paragraph summary of what you wrote and which data you cited"}"#;

pub const SELECT_SUMMARIES_PROMPT: &str = r#"You are the Summary Selector. Choose up to 5 chapter titles whose summaries are most useful for writing the section below.

User's core question: {{user_question}}

Section:
- Title: "{{section_title}}"
- Brief: "{{section_brief}}"

Available chapter titles (JSON):
{{all_chapter_titles}}

Respond with ONLY a JSON list of titles copied exactly from the list above."#;

pub const SELECT_KEY_INFO_PROMPT: &str = r#"You are the Key Information Selector. Choose the key information items most useful for writing the section below.

User's core question: {{user_question}}

Full outline (JSON):
{{full_outline}}

Section:
- Title: "{{section_title}}"
- Brief: "{{section_brief}}"

Available key information (JSON):
{{all_key_info_list}}

Respond with ONLY a JSON list of data_name values copied exactly from the list above. Respond with [] if none apply."#;

// ============================================================================
// Rendering
// ============================================================================

fn placeholder_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{(\w+)\}\}").ok()).as_ref()
}

/// Fill `{{name}}` placeholders. Unknown placeholders are left untouched.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let Some(re) = placeholder_regex() else {
        return template.to_string();
    };
    let lookup: HashMap<&str, &str> = vars.iter().copied().collect();
    re.replace_all(template, |caps: &Captures| {
        let name = caps.get(1).map_or("", |m| m.as_str());
        match lookup.get(name) {
            Some(value) => (*value).to_string(),
            None => caps.get(0).map_or(String::new(), |m| m.as_str().to_string()),
        }
    })
    .into_owned()
}

/// Placeholder names in order of first appearance.
pub fn extract_variables(template: &str) -> Vec<String> {
    let Some(re) = placeholder_regex() else {
        return Vec::new();
    };
    let mut vars: Vec<String> = Vec::new();
    for caps in re.captures_iter(template) {
        if let Some(name) = caps.get(1) {
            if !vars.iter().any(|v| v == name.as_str()) {
                vars.push(name.as_str().to_string());
            }
        }
    }
    vars
}
