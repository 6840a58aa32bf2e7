//! Report Pipeline
//!
//! Turns the reading results into a written report in four stages:
//! narrative synthesis, the theme/critique debate, the outline, and
//! section writing. Each stage stores its result on `RunState`; `advance`
//! runs the first stage whose result is missing, so a resumed run picks up
//! where it stopped.

use std::sync::Arc;

use deep_reader_llm::ModelRoles;
use tracing::{info, warn};

use crate::models::settings::ModeSettings;
use crate::models::state::{OutlineNode, RunState, Themes};
use crate::services::knowledge::vector_store::EvidenceRetriever;
use crate::utils::error::AppResult;

use super::actions::{self, SectionRequest};
use super::outline::{enforce_outline, is_error_outline, outline_constraints};

pub const FIRST_SECTION_CONTEXT: &str = "This is the first section of the report.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportStage {
    Narrative,
    Themes,
    Outline,
    Sections,
}

impl std::fmt::Display for ReportStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportStage::Narrative => write!(f, "narrative"),
            ReportStage::Themes => write!(f, "themes"),
            ReportStage::Outline => write!(f, "outline"),
            ReportStage::Sections => write!(f, "sections"),
        }
    }
}

/// Stage whose result is still missing from `state`.
pub fn next_stage(state: &RunState) -> Option<ReportStage> {
    if state.report_narrative_outline.is_none() {
        Some(ReportStage::Narrative)
    } else if state.final_keys.is_none() {
        Some(ReportStage::Themes)
    } else if state.final_report_outline.is_none() {
        Some(ReportStage::Outline)
    } else if state.draft_report.is_none() {
        Some(ReportStage::Sections)
    } else {
        None
    }
}

pub struct ReportPipeline {
    roles: Arc<ModelRoles>,
    retriever: Arc<dyn EvidenceRetriever>,
    mode: ModeSettings,
    retrieval_k: usize,
}

impl ReportPipeline {
    pub fn new(
        roles: Arc<ModelRoles>,
        retriever: Arc<dyn EvidenceRetriever>,
        mode: ModeSettings,
        retrieval_k: usize,
    ) -> Self {
        Self {
            roles,
            retriever,
            mode,
            retrieval_k,
        }
    }

    /// Run the next missing stage. `None` once the draft exists.
    pub async fn advance(&self, state: &mut RunState) -> AppResult<Option<ReportStage>> {
        let Some(stage) = next_stage(state) else {
            return Ok(None);
        };
        info!(stage = %stage, "Report stage starting");
        match stage {
            ReportStage::Narrative => self.synthesize_narrative(state).await?,
            ReportStage::Themes => self.debate_themes(state).await?,
            ReportStage::Outline => self.build_outline(state).await?,
            ReportStage::Sections => self.write_sections(state).await?,
        }
        state.touch();
        Ok(Some(stage))
    }

    /// Run every remaining stage.
    pub async fn run(&self, state: &mut RunState) -> AppResult<()> {
        while self.advance(state).await?.is_some() {}
        Ok(())
    }

    async fn synthesize_narrative(&self, state: &mut RunState) -> AppResult<()> {
        let narrative = actions::narrative_flow(&self.roles, &state.chapter_summaries).await?;
        state.report_narrative_outline = Some(narrative);
        Ok(())
    }

    /// Extract themes, then critique and refine them for the configured
    /// number of rounds. There is no early exit on agreement.
    async fn debate_themes(&self, state: &mut RunState) -> AppResult<()> {
        let question = state.user_core_question.clone();
        let mut themes =
            actions::extract_themes(&self.roles, &question, &state.chapter_summaries, None).await?;
        state.thematic_analysis = Some(themes.clone());

        let mut log = Vec::with_capacity(self.mode.debate_rounds * 2);
        for round in 1..=self.mode.debate_rounds {
            info!(round, rounds = self.mode.debate_rounds, "Critique round");
            let critique = actions::critique_themes(
                &self.roles,
                &question,
                &themes,
                &state.active_memory.background_summary,
                &state.raw_reviewer_outputs,
            )
            .await?;
            log.push(format!("Round {} Critique: {}", round, critique));

            themes = actions::extract_themes(
                &self.roles,
                &question,
                &state.chapter_summaries,
                Some(&critique),
            )
            .await?;
            log.push(format!(
                "Round {} Refined Themes: {}",
                round,
                serde_json::to_string(&themes)?
            ));
        }

        state.critic_consensus_log = log;
        state.final_keys = Some(themes);
        Ok(())
    }

    async fn build_outline(&self, state: &mut RunState) -> AppResult<()> {
        let themes = state.final_keys.clone().unwrap_or_default();
        let narrative = state.report_narrative_outline.clone().unwrap_or_default();
        let constraints = outline_constraints(&self.mode);

        let mut outline = actions::generate_outline(
            &self.roles,
            &state.user_core_question,
            &narrative,
            &themes,
            &constraints,
        )
        .await?;

        let violations = if is_error_outline(&outline) {
            0
        } else {
            enforce_outline(&mut outline, &self.mode)
        };
        if violations > 0 {
            warn!(violations, "Outline trimmed to the configured caps");
        }
        info!(sections = outline.len(), "Outline ready");

        state.outline_violations = violations;
        state.final_report_outline = Some(outline);
        Ok(())
    }

    /// Write every leaf in document order, carrying a running summary of
    /// what was already written into the next section.
    async fn write_sections(&self, state: &mut RunState) -> AppResult<()> {
        let mut draft = state.final_report_outline.clone().unwrap_or_default();
        if is_error_outline(&draft) {
            warn!("Outline generation failed, skipping section writing");
            state.draft_report = Some(draft);
            return Ok(());
        }

        let themes = state.final_keys.clone().unwrap_or_default();
        let full_outline = serde_json::to_string_pretty(&draft)?;
        let mut written_so_far = String::new();

        for top in draft.iter_mut() {
            if top.children.is_empty() {
                self.write_leaf(top, state, &themes, &full_outline, &mut written_so_far)
                    .await?;
            } else {
                for child in top.children.iter_mut() {
                    self.write_leaf(child, state, &themes, &full_outline, &mut written_so_far)
                        .await?;
                }
            }
        }

        state.draft_report = Some(draft);
        Ok(())
    }

    async fn write_leaf(
        &self,
        node: &mut OutlineNode,
        state: &RunState,
        themes: &Themes,
        full_outline: &str,
        written_so_far: &mut String,
    ) -> AppResult<()> {
        let title = node.title.clone();
        let brief = node.brief().to_string();
        info!(section = %title, "Writing section");

        let question = state.user_core_question.as_str();
        let (rag, summaries, key_info) = tokio::join!(
            actions::retrieve_passages(self.retriever.as_ref(), &title, &brief, self.retrieval_k),
            actions::select_summaries(&self.roles, question, &title, &brief, &state.chapter_summaries),
            actions::select_key_information(
                &self.roles,
                question,
                full_outline,
                &title,
                &brief,
                &state.key_information,
            ),
        );
        let rag = rag?;
        let summaries = summaries?;
        let key_info = key_info?;

        let previous = if written_so_far.is_empty() {
            FIRST_SECTION_CONTEXT
        } else {
            written_so_far.as_str()
        };
        let request = SectionRequest {
            user_question: question,
            themes,
            full_outline,
            section_title: &title,
            section_brief: &brief,
            rag_context: &rag,
            key_info_context: &key_info,
            summaries_context: &summaries,
            previous_part_summary: previous,
        };
        let section = actions::write_section(&self.roles, &request).await?;

        written_so_far.push_str(&format!(
            "\n\n---\n\nSection: {}\nSummary: {}",
            title, section.summary
        ));
        node.written_content = Some(section.paragraphs);
        node.content_brief = None;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
