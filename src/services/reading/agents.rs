//! Reading Agents
//!
//! The four model calls made per segment. Each goes through the structured
//! wrapper and degrades to a well-formed placeholder when the model keeps
//! returning malformed output; only fatal provider errors escape.

use deep_reader_llm::{LlmResult, ModelRole, ModelRoles, Reply, Shape};
use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::models::state::{ChapterAnalysis, KeyInformationItem, ReviewerAnswer};
use crate::services::knowledge::vector_store::{join_evidence, EvidenceRetriever};
use crate::services::prompts::{
    render, KEY_INFO_AGENT_PROMPT, READING_AGENT_PROMPT, REVIEWER_AGENT_PROMPT,
    SUMMARY_AGENT_PROMPT,
};
use crate::utils::error::AppResult;

const CHAPTER_KEYS: &[&str] = &["title", "chapter_summary", "questions"];
const KEY_INFO_KEYS: &[&str] = &["data_name", "description", "rawdata", "originfrom"];
const ANSWER_KEYS: &[&str] = &["question", "answer"];

/// Everything the two per-segment agents are conditioned on.
#[derive(Debug, Clone, Copy)]
pub struct SegmentBrief<'a> {
    pub research_role: &'a str,
    pub user_question: &'a str,
    pub background_memory: &'a str,
    pub previous_chapters_context: &'a str,
    pub last_data_item_context: &'a str,
    pub max_questions: usize,
    pub content: &'a str,
}

/// Reading agent: chapter summaries and follow-up questions.
pub async fn analyze_segment(
    roles: &ModelRoles,
    brief: &SegmentBrief<'_>,
) -> LlmResult<Vec<ChapterAnalysis>> {
    let max_questions = brief.max_questions.to_string();
    let prompt = render(
        READING_AGENT_PROMPT,
        &[
            ("research_role", brief.research_role),
            ("user_question", brief.user_question),
            ("background_memory", brief.background_memory),
            ("previous_chapters_context", brief.previous_chapters_context),
            ("max_questions", &max_questions),
            ("chapter_content", brief.content),
        ],
    );

    let reply = roles
        .structured::<Vec<ChapterAnalysis>>(ModelRole::Fast, &prompt, Shape::ListOf(CHAPTER_KEYS))
        .await?;
    let mut analyses = reply.unwrap_or_else(|e| vec![ChapterAnalysis::parsing_error(e)]);

    for analysis in analyses.iter_mut().filter(|a| !a.is_error()) {
        if analysis.questions.len() > brief.max_questions {
            debug!(
                title = %analysis.title,
                asked = analysis.questions.len(),
                max = brief.max_questions,
                "Dropping questions beyond the per-chapter limit"
            );
            analysis.questions.truncate(brief.max_questions);
        }
    }
    Ok(analyses)
}

/// Key information agent. The "no data" sentinel is filtered out here.
pub async fn extract_key_information(
    roles: &ModelRoles,
    brief: &SegmentBrief<'_>,
) -> LlmResult<Vec<KeyInformationItem>> {
    let prompt = render(
        KEY_INFO_AGENT_PROMPT,
        &[
            ("research_role", brief.research_role),
            ("user_question", brief.user_question),
            ("background_memory", brief.background_memory),
            ("last_data_item_context", brief.last_data_item_context),
            ("chapter_content", brief.content),
        ],
    );

    let reply = roles
        .structured::<Vec<KeyInformationItem>>(ModelRole::Fast, &prompt, Shape::ListOf(KEY_INFO_KEYS))
        .await?;
    let items = match reply {
        Reply::Valid(items) => items.into_iter().filter(|item| !item.is_sentinel()).collect(),
        Reply::Fallback { error } => vec![KeyInformationItem::parsing_error(&error)],
    };
    Ok(items)
}

/// Reviewer agent: retrieve evidence for `question` and answer from it alone.
pub async fn answer_question(
    roles: &ModelRoles,
    retriever: &dyn EvidenceRetriever,
    question: &str,
    user_question: &str,
    k: usize,
) -> AppResult<ReviewerAnswer> {
    let hits = retriever.search(question, k).await?;
    let context = join_evidence(&hits);
    let prompt = render(
        REVIEWER_AGENT_PROMPT,
        &[
            ("context", &context),
            ("user_question", user_question),
            ("question", question),
        ],
    );

    let reply = roles
        .structured::<ReviewerAnswer>(ModelRole::Fast, &prompt, Shape::Object(ANSWER_KEYS))
        .await?;
    Ok(match reply {
        Reply::Valid(mut answer) => {
            if answer.question.trim().is_empty() {
                answer.question = question.to_string();
            }
            answer
        }
        Reply::Fallback { error } => ReviewerAnswer::parsing_error(question, &error),
    })
}

/// Answer every question concurrently. All answers are in before this
/// returns; the output order follows `questions`.
pub async fn answer_questions(
    roles: &ModelRoles,
    retriever: &dyn EvidenceRetriever,
    questions: &[String],
    user_question: &str,
    k: usize,
) -> AppResult<Vec<ReviewerAnswer>> {
    if questions.is_empty() {
        return Ok(Vec::new());
    }
    info!(count = questions.len(), "Answering reader questions from the document");

    let futures = questions
        .iter()
        .map(|q| answer_question(roles, retriever, q, user_question, k));
    join_all(futures).await.into_iter().collect()
}

/// Summary agent: fold this segment's summaries and answers into the next
/// background memory. Keeps `previous` when the model gives up.
pub async fn synthesize_memory(
    roles: &ModelRoles,
    summaries: &str,
    answers: &[String],
    previous: &str,
) -> LlmResult<String> {
    let answers = if answers.is_empty() {
        "None".to_string()
    } else {
        answers.join("\n- ")
    };
    let prompt = render(
        SUMMARY_AGENT_PROMPT,
        &[
            ("newly_generated_summaries", summaries),
            ("reviewed_answers", &answers),
        ],
    );

    let reply = roles.text(ModelRole::Smart, &prompt).await?;
    Ok(reply.unwrap_or_else(|e| {
        warn!(error = %e, "Memory synthesis failed, keeping previous background");
        previous.to_string()
    }))
}
