//! Fuzzy Reconciliation
//!
//! Binds agent output back to the strings it was generated from. Agents
//! tend to reword a question or title slightly when echoing it, so exact
//! lookups miss; a scored best match above a fixed threshold does not.
//!
//! Scores are on a 0..=100 scale. A match is accepted when its score is at
//! least [`ACCEPT_THRESHOLD`].

use tracing::debug;

use crate::models::state::{ChapterAnalysis, ReconciliationStats, ReviewedAnswer, ReviewerAnswer};

pub const ACCEPT_THRESHOLD: f64 = 85.0;

/// Whether a score is good enough to bind. The threshold itself binds.
pub fn is_accepted(score: f64) -> bool {
    score >= ACCEPT_THRESHOLD
}

/// Character-level similarity, `100 * 2M / T` over the longest common
/// subsequence alignment.
pub fn ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 100.0;
    }
    f64::from(similar::TextDiff::from_chars(a, b).ratio()) * 100.0
}

/// Similarity after lowercasing, dropping punctuation, and sorting words,
/// so word order and case do not matter.
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    ratio(&sorted_tokens(a), &sorted_tokens(b))
}

fn sorted_tokens(text: &str) -> String {
    let cleaned = text
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .to_lowercase();
    let mut tokens: Vec<&str> = cleaned.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Highest-scoring candidate as `(index, score)`. Ties keep the earliest.
pub fn best_match<'a, I>(query: &str, candidates: I, scorer: fn(&str, &str) -> f64) -> Option<(usize, f64)>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<(usize, f64)> = None;
    for (i, candidate) in candidates.into_iter().enumerate() {
        let score = scorer(query, candidate);
        if best.map_or(true, |(_, top)| score > top) {
            best = Some((i, score));
        }
    }
    best
}

// ---------------------------------------------------------------------------
// Answer reconciliation
// ---------------------------------------------------------------------------

/// Attach each reviewer answer to the chapter analysis holding the single
/// most similar original question. Answers scoring below the threshold
/// against every question are dropped. Error analyses never receive
/// answers and error answers are never attached.
pub fn reconcile_answers(
    analyses: &mut [ChapterAnalysis],
    answers: &[ReviewerAnswer],
) -> ReconciliationStats {
    let mut stats = ReconciliationStats::default();

    // (analysis index, question) for every candidate original question.
    let originals: Vec<(usize, String)> = analyses
        .iter()
        .enumerate()
        .filter(|(_, a)| !a.is_error())
        .flat_map(|(i, a)| a.questions.iter().map(move |q| (i, q.clone())))
        .collect();

    for answer in answers {
        if answer.is_error() {
            stats.errored += 1;
            continue;
        }

        let best = best_match(&answer.question, originals.iter().map(|(_, q)| q.as_str()), ratio);
        match best {
            Some((idx, score)) if is_accepted(score) => {
                let (owner, original) = &originals[idx];
                analyses[*owner].reviewed_answers.push(ReviewedAnswer {
                    question: original.clone(),
                    answer: answer.answer.clone(),
                });
                stats.accepted += 1;
            }
            other => {
                debug!(
                    question = %answer.question,
                    best_score = other.map_or(0.0, |(_, s)| s),
                    "Reviewer answer matched no question above threshold, discarding"
                );
                stats.discarded += 1;
            }
        }
    }

    stats
}

// ---------------------------------------------------------------------------
// Selection reconciliation
// ---------------------------------------------------------------------------

/// Map names suggested by a selection agent onto `candidates` with
/// token-sort similarity. Returns distinct candidate indices in suggestion
/// order, at most `limit` of them.
pub fn select_matches(suggested: &[String], candidates: &[&str], limit: Option<usize>) -> Vec<usize> {
    let mut picked: Vec<usize> = Vec::new();
    for name in suggested {
        if limit.is_some_and(|max| picked.len() >= max) {
            break;
        }
        match best_match(name, candidates.iter().copied(), token_sort_ratio) {
            Some((idx, score)) if is_accepted(score) => {
                if !picked.contains(&idx) {
                    picked.push(idx);
                }
            }
            other => {
                debug!(
                    suggestion = %name,
                    best_score = other.map_or(0.0, |(_, s)| s),
                    "Selection matched nothing above threshold"
                );
            }
        }
    }
    picked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis(title: &str, questions: &[&str]) -> ChapterAnalysis {
        ChapterAnalysis {
            title: title.to_string(),
            chapter_summary: format!("{} summary", title),
            questions: questions.iter().map(|q| q.to_string()).collect(),
            reviewed_answers: Vec::new(),
            error: None,
        }
    }

    fn answer(question: &str, text: &str) -> ReviewerAnswer {
        ReviewerAnswer {
            question: question.to_string(),
            answer: text.to_string(),
            error: None,
        }
    }

    // ========================================================================
    // Scorers
    // ========================================================================

    #[test]
    fn test_ratio_bounds() {
        assert_eq!(ratio("same", "same"), 100.0);
        assert_eq!(ratio("", ""), 100.0);
        assert_eq!(ratio("abc", "xyz"), 0.0);
        let partial = ratio("abcd", "abcf");
        assert!(partial > 70.0 && partial < 80.0);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        assert!(is_accepted(ACCEPT_THRESHOLD));
        assert!(is_accepted(100.0));
        assert!(!is_accepted(84.99));
    }

    #[test]
    fn test_token_sort_ignores_order_and_case() {
        assert_eq!(token_sort_ratio("Trade Policy, Early", "early trade policy"), 100.0);
    }

    #[test]
    fn test_best_match_prefers_first_on_tie() {
        let best = best_match("abc", ["abc", "abc"], ratio);
        assert_eq!(best, Some((0, 100.0)));
        assert_eq!(best_match("abc", std::iter::empty(), ratio), None);
    }

    // ========================================================================
    // reconcile_answers
    // ========================================================================

    #[test]
    fn test_reworded_answer_attaches_to_owner() {
        let mut analyses = vec![
            analysis("Harbour", &["How many ships docked in the harbour?"]),
            analysis("Lighthouse", &["Why did the keeper leave the lighthouse?"]),
        ];
        let answers = vec![answer("Why did the keeper leave the lighthouse", "A storm.")];

        let stats = reconcile_answers(&mut analyses, &answers);

        assert_eq!(stats.accepted, 1);
        assert!(analyses[0].reviewed_answers.is_empty());
        assert_eq!(
            analyses[1].reviewed_answers,
            vec![ReviewedAnswer {
                question: "Why did the keeper leave the lighthouse?".to_string(),
                answer: "A storm.".to_string(),
            }]
        );
    }

    #[test]
    fn test_unrelated_answer_is_discarded() {
        let mut analyses = vec![analysis("Harbour", &["How many ships docked in the harbour?"])];
        let answers = vec![answer("What is the capital of France?", "Paris")];

        let stats = reconcile_answers(&mut analyses, &answers);

        assert_eq!(stats.discarded, 1);
        assert_eq!(stats.accepted, 0);
        assert!(analyses[0].reviewed_answers.is_empty());
    }

    #[test]
    fn test_answer_at_threshold_is_bound() {
        // 17 of 20 characters shared: 2 * 17 / 40 = 85.
        let original = "abcdefghijklmnopqrst";
        let echoed = "abcdefghijklmnopqXYZ";
        let score = ratio(echoed, original);
        assert!((score - 85.0).abs() < 1e-3, "score was {}", score);

        let mut analyses = vec![analysis("One", &[original])];
        let stats = reconcile_answers(&mut analyses, &[answer(echoed, "yes")]);

        assert_eq!(stats.accepted, 1);
        assert_eq!(analyses[0].reviewed_answers[0].question, original);
    }

    #[test]
    fn test_answer_just_under_threshold_is_discarded() {
        // 16 of 19 characters shared: 2 * 16 / 38 = 84.2.
        let original = "abcdefghijklmnopqrs";
        let echoed = "abcdefghijklmnopXYZ";
        let score = ratio(echoed, original);
        assert!(score > 84.0 && score < ACCEPT_THRESHOLD, "score was {}", score);

        let mut analyses = vec![analysis("One", &[original])];
        let stats = reconcile_answers(&mut analyses, &[answer(echoed, "no")]);

        assert_eq!(stats.accepted, 0);
        assert_eq!(stats.discarded, 1);
        assert!(analyses[0].reviewed_answers.is_empty());
    }

    #[test]
    fn test_selection_threshold_boundary() {
        let candidates = ["abcdefghijklmnopqrst", "abcdefghijklmnopqrs"];
        let at = vec!["abcdefghijklmnopqXYZ".to_string()];
        assert_eq!(select_matches(&at, &candidates[..1], None), vec![0]);

        let under = vec!["abcdefghijklmnopXYZ".to_string()];
        assert!(select_matches(&under, &candidates[1..], None).is_empty());
    }

    #[test]
    fn test_error_rows_are_skipped() {
        let mut failed = analysis("Broken", &["How many ships docked in the harbour?"]);
        failed.error = Some("bad json".to_string());
        let mut analyses = vec![failed];
        let answers = vec![
            answer("How many ships docked in the harbour?", "Forty"),
            ReviewerAnswer::parsing_error("q", "bad"),
        ];

        let stats = reconcile_answers(&mut analyses, &answers);

        assert_eq!(stats.errored, 1);
        assert_eq!(stats.discarded, 1);
        assert!(analyses[0].reviewed_answers.is_empty());
    }

    // ========================================================================
    // select_matches
    // ========================================================================

    #[test]
    fn test_select_matches_dedups_and_caps() {
        let candidates = ["Chapter 1: Origins", "Chapter 2: Growth", "Chapter 3: Decline"];
        let suggested: Vec<String> = vec![
            "chapter 2 growth".to_string(),
            "Chapter 2: Growth".to_string(),
            "Something else entirely".to_string(),
            "Chapter 3: Decline".to_string(),
            "Chapter 1: Origins".to_string(),
        ];
        let picked = select_matches(&suggested, &candidates, Some(2));
        assert_eq!(picked, vec![1, 2]);
    }
}
