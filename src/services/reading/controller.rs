//! Reading Controller
//!
//! Drives one document through its segments in order. Each `step` reads
//! exactly one segment: the reading and key-information agents run
//! concurrently, every question they raise is answered from the vector
//! store, answers are reconciled back onto their chapters, and the result
//! is folded into the rolling memory. All model calls for a step are
//! joined before `RunState` is touched.

use std::sync::Arc;

use deep_reader_llm::ModelRoles;
use tracing::{info, warn};

use crate::models::settings::ParsingStrategy;
use crate::models::state::{ActiveMemory, ChapterAnalysis, ReconciliationStats, RunState, Segment};
use crate::services::knowledge::chunker::{chunk_text, parse_heading_tree, HeadingTree};
use crate::services::knowledge::vector_store::EvidenceRetriever;
use crate::services::reconcile::reconcile_answers;
use crate::utils::error::{AppError, AppResult};

use super::agents::{self, SegmentBrief};

pub const FIRST_SEGMENT_CONTEXT: &str = "None. This is the first segment.";

/// How many analyses of the previous segment are shown to the reading agent.
const PREVIOUS_CHAPTERS: usize = 2;

// ---------------------------------------------------------------------------
// Settings / outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ReadingSettings {
    pub strategy: ParsingStrategy,
    pub chunk_size: usize,
    pub overlap_ratio: f64,
    pub questions_per_chapter: usize,
    pub retrieval_k: usize,
}

/// What a single `step` did.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Segment `index` was analysed.
    Read {
        index: usize,
        chapters: usize,
        key_items: usize,
        stats: ReconciliationStats,
    },
    /// Segment `index` was blank and marked read without any model call.
    Skipped { index: usize },
    /// No unread segment was left.
    Completed,
}

// ---------------------------------------------------------------------------
// Segmentation
// ---------------------------------------------------------------------------

/// Split `content` into reading segments. The chapter strategy also returns
/// the heading tree the segments were cut from; a document without headings
/// falls back to fixed-size segments and no tree.
pub fn build_segments(
    content: &str,
    strategy: ParsingStrategy,
    chunk_size: usize,
    overlap_ratio: f64,
) -> AppResult<(Vec<Segment>, Option<HeadingTree>)> {
    let fixed = |text: &str| -> AppResult<Vec<Segment>> {
        Ok(chunk_text(text, chunk_size, overlap_ratio)?
            .into_iter()
            .map(Segment::new)
            .collect())
    };

    if strategy == ParsingStrategy::Snippet {
        return Ok((fixed(content)?, None));
    }

    let tree = parse_heading_tree(content);
    if tree.is_empty() {
        info!("No headings found, falling back to fixed-size segments");
        return Ok((fixed(content)?, None));
    }

    let mut segments = Vec::new();
    if !tree.preamble.trim().is_empty() {
        segments.push(Segment::new(tree.preamble.clone()));
    }
    for (i, section) in tree.sections.iter().enumerate() {
        let text = section.full_text();
        if text.chars().count() > chunk_size {
            for piece in chunk_text(&text, chunk_size, overlap_ratio)? {
                segments.push(Segment::new(piece).in_section(i));
            }
        } else {
            segments.push(Segment::new(text).in_section(i));
        }
    }
    Ok((segments, Some(tree)))
}

/// Title/summary pairs of the last analyses of the previous segment.
pub fn previous_chapters_context(history: &[Vec<ChapterAnalysis>]) -> String {
    let Some(last) = history.last().filter(|entry| !entry.is_empty()) else {
        return FIRST_SEGMENT_CONTEXT.to_string();
    };
    let start = last.len().saturating_sub(PREVIOUS_CHAPTERS);
    let pairs: Vec<String> = last[start..]
        .iter()
        .map(|a| format!("- Title: {}\n- Summary: {}", a.title, a.chapter_summary))
        .collect();
    format!("Analysis reference from previous segment:\n{}", pairs.join("\n"))
}

fn untitled(segment_index: usize) -> String {
    format!("Segment_{}_Untitled", segment_index + 1)
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct ReadingController {
    roles: Arc<ModelRoles>,
    retriever: Arc<dyn EvidenceRetriever>,
    settings: ReadingSettings,
}

impl ReadingController {
    pub fn new(
        roles: Arc<ModelRoles>,
        retriever: Arc<dyn EvidenceRetriever>,
        settings: ReadingSettings,
    ) -> Self {
        Self {
            roles,
            retriever,
            settings,
        }
    }

    pub fn settings(&self) -> &ReadingSettings {
        &self.settings
    }

    /// Segment the document and reset every reading accumulator.
    pub fn initialize(&self, state: &mut RunState) -> AppResult<()> {
        if state.raw_markdown_content.trim().is_empty() {
            return Err(AppError::validation("document content is empty"));
        }
        let (segments, toc) = build_segments(
            &state.raw_markdown_content,
            self.settings.strategy,
            self.settings.chunk_size,
            self.settings.overlap_ratio,
        )?;
        info!(
            segments = segments.len(),
            strategy = %self.settings.strategy,
            "Reading initialized"
        );

        state.reading_snippets = segments;
        state.table_of_contents = toc;
        state.snippet_analysis_history.clear();
        state.raw_reviewer_outputs.clear();
        state.reconciliation_log.clear();
        state.chapter_summaries.clear();
        state.key_information.clear();
        state.active_memory = ActiveMemory::seed();
        state.reading_completed = state.reading_snippets.is_empty();
        state.reading_initialized = true;
        state.touch();
        Ok(())
    }

    /// Read the next unread segment.
    pub async fn step(&self, state: &mut RunState) -> AppResult<StepOutcome> {
        if !state.reading_initialized {
            self.initialize(state)?;
        }

        let Some(index) = state.next_unread() else {
            state.reading_completed = true;
            return Ok(StepOutcome::Completed);
        };
        let total = state.reading_snippets.len();
        let content = state.reading_snippets[index].content.clone();

        if content.trim().is_empty() {
            warn!(segment = index, "Segment is empty, marking read");
            self.finish_segment(state, index);
            return Ok(StepOutcome::Skipped { index });
        }

        info!(segment = index + 1, total, "Reading segment");

        let previous = previous_chapters_context(&state.snippet_analysis_history);
        let memory = state.active_memory.clone();
        let brief = SegmentBrief {
            research_role: &state.research_role,
            user_question: &state.user_core_question,
            background_memory: &memory.background_summary,
            previous_chapters_context: &previous,
            last_data_item_context: &memory.last_data_item_context,
            max_questions: self.settings.questions_per_chapter,
            content: &content,
        };

        let (analyses, key_info) = tokio::join!(
            agents::analyze_segment(&self.roles, &brief),
            agents::extract_key_information(&self.roles, &brief),
        );
        let mut analyses = analyses?;
        let key_info = key_info?;

        for analysis in analyses.iter_mut().filter(|a| !a.is_error()) {
            if analysis.title.trim().is_empty() {
                analysis.title = untitled(index);
            }
        }

        let questions: Vec<String> = analyses
            .iter()
            .filter(|a| !a.is_error())
            .flat_map(|a| a.questions.iter().cloned())
            .collect();
        let answers = agents::answer_questions(
            &self.roles,
            self.retriever.as_ref(),
            &questions,
            &state.user_core_question,
            self.settings.retrieval_k,
        )
        .await?;

        let stats = reconcile_answers(&mut analyses, &answers);
        info!(
            segment = index + 1,
            accepted = stats.accepted,
            discarded = stats.discarded,
            errored = stats.errored,
            "Reconciled reviewer answers"
        );

        let summaries: Vec<String> = analyses
            .iter()
            .filter(|a| !a.is_error() && !a.chapter_summary.trim().is_empty())
            .map(|a| format!("Title: {}\nSummary: {}", a.title, a.chapter_summary))
            .collect();
        let answer_lines: Vec<String> = answers
            .iter()
            .filter(|a| !a.is_error())
            .map(|a| format!("Q: {}\nA: {}", a.question, a.answer))
            .collect();

        let background_summary = if summaries.is_empty() {
            memory.background_summary.clone()
        } else {
            agents::synthesize_memory(
                &self.roles,
                &summaries.join("\n"),
                &answer_lines,
                &memory.background_summary,
            )
            .await?
        };

        let last_data_item_context = match key_info.last() {
            Some(item) if !item.is_error() => serde_json::to_string(item)?,
            _ => String::new(),
        };

        // Every call has returned; from here on only state is mutated.
        for analysis in analyses.iter().filter(|a| !a.is_error()) {
            state
                .chapter_summaries
                .insert(analysis.title.clone(), analysis.chapter_summary.clone());
        }
        let chapters = analyses.len();
        let key_items = key_info.len();
        state.snippet_analysis_history.push(analyses);
        state.raw_reviewer_outputs.push(answers);
        state.reconciliation_log.push(stats);
        state.key_information.extend(key_info);
        state.active_memory = ActiveMemory {
            background_summary,
            last_data_item_context,
        };
        self.finish_segment(state, index);

        Ok(StepOutcome::Read {
            index,
            chapters,
            key_items,
            stats,
        })
    }

    fn finish_segment(&self, state: &mut RunState, index: usize) {
        state.mark_segment_read(index);
        if state.next_unread().is_none() {
            info!(segments = state.reading_snippets.len(), "Reading completed");
            state.reading_completed = true;
        }
        state.touch();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use deep_reader_llm::{LlmError, LlmProvider, LlmResult};
    use serde_json::json;

    use crate::models::state::SEED_BACKGROUND;
    use crate::services::knowledge::vector_store::SearchHit;

    /// Routes on the agent name each prompt opens with.
    struct RoutedProvider {
        prompts: Mutex<Vec<String>>,
        fail_reading: bool,
    }

    impl RoutedProvider {
        fn new() -> Self {
            Self {
                prompts: Mutex::new(Vec::new()),
                fail_reading: false,
            }
        }

        fn prompts_for(&self, marker: &str) -> Vec<String> {
            self.prompts
                .lock()
                .unwrap()
                .iter()
                .filter(|p| p.contains(marker))
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl LlmProvider for RoutedProvider {
        fn name(&self) -> &'static str {
            "routed"
        }

        fn model(&self) -> &str {
            "routed-model"
        }

        async fn complete(&self, prompt: &str) -> LlmResult<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let reply = if prompt.starts_with("You are the Reading Agent") {
                if self.fail_reading {
                    "definitely not json".to_string()
                } else {
                    json!([
                        {"title": "", "chapter_summary": "Ships arrive.", "questions": ["How many ships arrived?"]},
                        {"title": "Storm", "chapter_summary": "A storm hits.", "questions": ["When did the storm hit?"]}
                    ])
                    .to_string()
                }
            } else if prompt.starts_with("You are the Key Information Agent") {
                json!([
                    {"data_name": "Ship count", "description": "ships", "rawdata": {"ships": 40}, "originfrom": "harbour log"},
                    {"data_name": "no-data", "description": "", "rawdata": {}, "originfrom": ""}
                ])
                .to_string()
            } else if prompt.starts_with("You are the Reviewer Agent") {
                if prompt.contains("Question: How many ships arrived?") {
                    json!({"question": "How many ships arrived", "answer": "Forty."}).to_string()
                } else {
                    json!({"question": "Who painted the harbour?", "answer": "Unknown."}).to_string()
                }
            } else if prompt.starts_with("You are the Summary Agent") {
                "Forty ships arrived before a storm.".to_string()
            } else {
                return Err(LlmError::Other {
                    message: "unexpected prompt".to_string(),
                });
            };
            Ok(reply)
        }

        async fn health_check(&self) -> LlmResult<()> {
            Ok(())
        }
    }

    struct NoEvidence;

    #[async_trait]
    impl EvidenceRetriever for NoEvidence {
        async fn search(&self, _query: &str, _k: usize) -> AppResult<Vec<SearchHit>> {
            Ok(Vec::new())
        }
    }

    fn settings(strategy: ParsingStrategy) -> ReadingSettings {
        ReadingSettings {
            strategy,
            chunk_size: 6000,
            overlap_ratio: 0.15,
            questions_per_chapter: 3,
            retrieval_k: 10,
        }
    }

    fn controller(provider: Arc<RoutedProvider>) -> ReadingController {
        ReadingController::new(
            Arc::new(ModelRoles::uniform(provider)),
            Arc::new(NoEvidence),
            settings(ParsingStrategy::Snippet),
        )
    }

    // ========================================================================
    // Segmentation
    // ========================================================================

    #[test]
    fn test_build_segments_chapter_strategy() {
        let text = "Intro line.\n\n# One\nfirst\n## Sub\nnested\n# Two\nsecond\n";
        let (segments, toc) = build_segments(text, ParsingStrategy::Chapter, 6000, 0.15).unwrap();
        let toc = toc.unwrap();

        assert_eq!(toc.sections.len(), 2);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].section, None);
        assert!(segments[0].content.contains("Intro line."));
        assert_eq!(segments[1].section, Some(0));
        assert!(segments[1].content.contains("nested"));
        assert_eq!(segments[2].section, Some(1));
    }

    #[test]
    fn test_build_segments_chapter_without_headings_falls_back() {
        let text = "x".repeat(100);
        let (segments, toc) = build_segments(&text, ParsingStrategy::Chapter, 40, 0.25).unwrap();
        assert!(toc.is_none());
        assert_eq!(segments.len(), 4);
    }

    #[test]
    fn test_build_segments_splits_long_sections() {
        let text = format!("# Long\n{}\n# Short\nok\n", "y".repeat(120));
        let (segments, _) = build_segments(&text, ParsingStrategy::Chapter, 50, 0.0).unwrap();
        assert!(segments.iter().filter(|s| s.section == Some(0)).count() > 1);
        assert_eq!(segments.iter().filter(|s| s.section == Some(1)).count(), 1);
    }

    #[test]
    fn test_previous_chapters_context_uses_last_two() {
        assert_eq!(previous_chapters_context(&[]), FIRST_SEGMENT_CONTEXT);

        let entry = |t: &str| ChapterAnalysis {
            title: t.to_string(),
            chapter_summary: format!("{} summary", t),
            questions: Vec::new(),
            reviewed_answers: Vec::new(),
            error: None,
        };
        let history = vec![vec![entry("A"), entry("B"), entry("C")]];
        let ctx = previous_chapters_context(&history);
        assert!(!ctx.contains("- Title: A"));
        assert!(ctx.contains("- Title: B\n- Summary: B summary"));
        assert!(ctx.contains("- Title: C"));
    }

    // ========================================================================
    // Step
    // ========================================================================

    #[tokio::test]
    async fn test_step_reads_segment_and_updates_state() {
        let provider = Arc::new(RoutedProvider::new());
        let controller = controller(provider.clone());
        let mut state = RunState::new("/tmp/doc.md", Some("What happened?".to_string()), None)
            .with_content("The harbour filled with ships before the storm.");

        let outcome = controller.step(&mut state).await.unwrap();

        let stats = match outcome {
            StepOutcome::Read { index: 0, chapters: 2, key_items: 1, stats } => stats,
            other => panic!("unexpected outcome: {:?}", other),
        };
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.discarded, 1);

        assert!(state.reading_completed);
        assert_eq!(state.read_count(), 1);
        assert_eq!(state.snippet_analysis_history.len(), 1);
        assert_eq!(state.raw_reviewer_outputs[0].len(), 2);
        assert_eq!(state.reconciliation_log, vec![stats]);

        let history = &state.snippet_analysis_history[0];
        assert_eq!(history[0].title, "Segment_1_Untitled");
        assert_eq!(history[0].reviewed_answers.len(), 1);
        assert_eq!(history[0].reviewed_answers[0].question, "How many ships arrived?");
        assert!(history[1].reviewed_answers.is_empty());

        assert_eq!(state.chapter_summaries.len(), 2);
        assert_eq!(state.chapter_summaries["Storm"], "A storm hits.");
        assert_eq!(state.key_information.len(), 1);
        assert_eq!(state.active_memory.background_summary, "Forty ships arrived before a storm.");
        assert!(state.active_memory.last_data_item_context.contains("Ship count"));

        // Summary agent received this segment's chapter summaries.
        let summary_prompt = &provider.prompts_for("You are the Summary Agent")[0];
        assert!(summary_prompt.contains("A storm hits."));
    }

    #[tokio::test]
    async fn test_step_on_empty_segment_is_noop() {
        let provider = Arc::new(RoutedProvider::new());
        let controller = controller(provider.clone());
        let mut state = RunState::new("/tmp/doc.md", None, None).with_content("text");
        controller.initialize(&mut state).unwrap();
        state.reading_snippets = vec![Segment::new("   "), Segment::new("Ships arrived.")];
        state.reading_completed = false;

        let outcome = controller.step(&mut state).await.unwrap();

        assert_eq!(outcome, StepOutcome::Skipped { index: 0 });
        assert!(provider.prompts.lock().unwrap().is_empty());
        assert!(state.snippet_analysis_history.is_empty());
        assert!(!state.reading_completed);
        assert_eq!(state.next_unread(), Some(1));
    }

    #[tokio::test]
    async fn test_parse_failure_keeps_error_row_and_previous_memory() {
        let mut provider = RoutedProvider::new();
        provider.fail_reading = true;
        let provider = Arc::new(provider);
        let controller = controller(provider.clone());
        let mut state = RunState::new("/tmp/doc.md", None, None).with_content("Some text.");

        controller.step(&mut state).await.unwrap();

        let history = &state.snippet_analysis_history[0];
        assert_eq!(history.len(), 1);
        assert!(history[0].is_error());
        assert!(state.chapter_summaries.is_empty());
        assert_eq!(state.active_memory.background_summary, SEED_BACKGROUND);
        assert!(provider.prompts_for("You are the Reviewer Agent").is_empty());
        assert!(provider.prompts_for("You are the Summary Agent").is_empty());
        // Three attempts at the reading agent before degrading.
        assert_eq!(provider.prompts_for("You are the Reading Agent").len(), 3);
        // Key information still extracted from the same segment.
        assert_eq!(provider.prompts_for("You are the Key Information Agent").len(), 1);
        assert_eq!(state.key_information.len(), 1);
        assert_eq!(state.key_information[0].data_name, "Ship count");
        assert!(state.reading_completed);
    }

    #[tokio::test]
    async fn test_step_after_completion_reports_completed() {
        let provider = Arc::new(RoutedProvider::new());
        let controller = controller(provider);
        let mut state = RunState::new("/tmp/doc.md", None, None).with_content("Short.");

        controller.step(&mut state).await.unwrap();
        let outcome = controller.step(&mut state).await.unwrap();
        assert_eq!(outcome, StepOutcome::Completed);
        assert_eq!(state.snippet_analysis_history.len(), 1);
    }

    #[tokio::test]
    async fn test_initialize_rejects_empty_document() {
        let controller = controller(Arc::new(RoutedProvider::new()));
        let mut state = RunState::new("/tmp/doc.md", None, None).with_content("  \n");
        assert!(matches!(
            controller.initialize(&mut state),
            Err(AppError::Validation(_))
        ));
    }
}
