//! Token-budgeted context assembly.
//!
//! Candidates are taken strictly in rank order. The running total starts at
//! tokens(system message) + tokens(query); each candidate costs the tokenized
//! size of the exact block the prompt builder will render for it. The first
//! candidate that would push the total past the budget ends inclusion, so the
//! result is always a prefix of the ranked sequence, except that candidates
//! with an empty chosen content field are skipped without consuming budget
//! and without ending the scan.

use thiserror::Error;

use crate::prompts::{render_context_block, Verbosity};
use crate::rerank::RankedCandidate;
use crate::retrieval::ContentField;
use crate::tokens::TokenEstimator;

/// Default token ceiling for the assembled context.
/// Generally allows for 3-5 results of chunk size 256.
pub const DEFAULT_TOKEN_BUDGET: usize = 2_500;

/// Diagnosable assembly failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    /// Every ranked candidate had an empty chosen content field. Distinct
    /// from an empty retrieval: hits exist, the requested field doesn't.
    #[error("the {field} field is empty for every ranked result; switch content fields or use a collection that carries it", field = .0.as_str())]
    ContentUnavailable(ContentField),
}

/// One included candidate with its rendered block and measured cost.
#[derive(Debug, Clone)]
pub struct ContextEntry {
    pub candidate: RankedCandidate,
    /// The block exactly as the prompt builder will concatenate it.
    pub block: String,
    pub block_tokens: usize,
}

/// An ordered, budget-valid subsequence of the ranked candidates.
#[derive(Debug, Clone, Default)]
pub struct ValidContext {
    pub entries: Vec<ContextEntry>,
    /// Tokens consumed by the included blocks.
    pub context_tokens: usize,
    /// Tokens consumed by the system message and query.
    pub base_tokens: usize,
}

impl ValidContext {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Total tokens accounted against the budget.
    pub fn total_tokens(&self) -> usize {
        self.base_tokens + self.context_tokens
    }
}

/// Select the budget-fitting prefix of `ranked`.
///
/// Guarantee: retokenizing system message + query + the included blocks with
/// the same estimator never exceeds `budget`.
pub fn assemble(
    ranked: &[RankedCandidate],
    query: &str,
    system_message: &str,
    estimator: &dyn TokenEstimator,
    budget: usize,
    content_field: ContentField,
    verbosity: Verbosity,
) -> Result<ValidContext, ContextError> {
    if !ranked.is_empty()
        && ranked
            .iter()
            .all(|c| c.chosen_content(content_field).is_none())
    {
        return Err(ContextError::ContentUnavailable(content_field));
    }

    let base_tokens = estimator.count(system_message) + estimator.count(query);
    let mut running = base_tokens;
    let mut entries = Vec::new();

    for candidate in ranked {
        let Some(content) = candidate.chosen_content(content_field) else {
            // Empty chosen field: no budget consumed, scan continues.
            continue;
        };

        let block = render_context_block(candidate, content, verbosity);
        let block_tokens = estimator.count(&block);

        if running + block_tokens > budget {
            // Budget rejection ends inclusion: anything after this rank is
            // excluded so the result stays a prefix of the ranked order.
            break;
        }

        running += block_tokens;
        entries.push(ContextEntry {
            candidate: candidate.clone(),
            block,
            block_tokens,
        });
    }

    Ok(ValidContext {
        context_tokens: running - base_tokens,
        base_tokens,
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::CandidateRecord;
    use crate::tokens::Cl100kCounter;

    /// Estimator where every whitespace-separated word costs one token.
    struct WordCounter;

    impl TokenEstimator for WordCounter {
        fn count(&self, text: &str) -> usize {
            text.split_whitespace().count()
        }
    }

    fn ranked_with(content: Option<String>, expanded: Option<String>) -> RankedCandidate {
        RankedCandidate {
            record: CandidateRecord {
                doc_id: "d".into(),
                title: "T".into(),
                guest: "G".into(),
                summary: None,
                content,
                expanded_content: expanded,
                episode_url: "https://example.com".into(),
                thumbnail_url: None,
                length_seconds: 0,
                score: 0.0,
            },
            rerank_score: 1.0,
        }
    }

    fn words(n: usize) -> String {
        vec!["w"; n].join(" ")
    }

    #[test]
    fn budget_admits_exact_prefix() {
        // Base = 450 + 50 = 500 tokens, five candidates at 600 each,
        // budget 2500: exactly three fit (500+1800=2300; +600 would be 2900).
        let ranked: Vec<_> = (0..5)
            .map(|_| ranked_with(Some(words(600)), None))
            .collect();

        let ctx = assemble(
            &ranked,
            &words(50),
            &words(450),
            &WordCounter,
            2_500,
            ContentField::Content,
            Verbosity::Low,
        )
        .unwrap();

        assert_eq!(ctx.len(), 3);
        assert_eq!(ctx.base_tokens, 500);
        assert_eq!(ctx.context_tokens, 1_800);
        assert!(ctx.total_tokens() <= 2_500);
    }

    #[test]
    fn included_blocks_remeasure_within_budget() {
        let counter = Cl100kCounter::new();
        let ranked: Vec<_> = (0..6)
            .map(|i| ranked_with(Some(format!("transcript segment number {i} about sleep, light, and focus protocols")), None))
            .collect();

        let budget = 60;
        let system = "You answer questions about podcasts.";
        let query = "what about sleep?";
        let ctx = assemble(
            &ranked,
            query,
            system,
            &counter,
            budget,
            ContentField::Content,
            Verbosity::Medium,
        )
        .unwrap();

        // Idempotent re-measurement with the same tokenizer.
        let mut total = counter.count(system) + counter.count(query);
        for entry in &ctx.entries {
            total += counter.count(&entry.block);
        }
        assert!(total <= budget, "retokenized total {total} > budget {budget}");
    }

    #[test]
    fn empty_content_skips_without_consuming_budget() {
        let ranked = vec![
            ranked_with(Some(words(10)), None),
            ranked_with(None, None),
            ranked_with(Some(words(10)), None),
        ];

        let ctx = assemble(
            &ranked,
            "q",
            "s",
            &WordCounter,
            100,
            ContentField::Content,
            Verbosity::Low,
        )
        .unwrap();

        // The empty candidate is skipped; the scan continues past it.
        assert_eq!(ctx.len(), 2);
        assert_eq!(ctx.context_tokens, 20);
    }

    #[test]
    fn budget_rejection_excludes_everything_after() {
        let ranked = vec![
            ranked_with(Some(words(10)), None),
            ranked_with(Some(words(50)), None), // would exceed
            ranked_with(Some(words(1)), None),  // would fit, but is after the rejection
        ];

        let ctx = assemble(
            &ranked,
            "q",
            "s",
            &WordCounter,
            20,
            ContentField::Content,
            Verbosity::Low,
        )
        .unwrap();

        assert_eq!(ctx.len(), 1);
        assert_eq!(ctx.entries[0].block_tokens, 10);
    }

    #[test]
    fn all_empty_chosen_field_is_content_unavailable() {
        let ranked = vec![
            ranked_with(Some(words(10)), None),
            ranked_with(Some(words(10)), Some("  ".into())),
        ];

        let err = assemble(
            &ranked,
            "q",
            "s",
            &WordCounter,
            100,
            ContentField::ExpandedContent,
            Verbosity::Low,
        )
        .unwrap_err();

        assert_eq!(err, ContextError::ContentUnavailable(ContentField::ExpandedContent));
    }

    #[test]
    fn no_candidates_is_not_content_unavailable() {
        let ctx = assemble(
            &[],
            "q",
            "s",
            &WordCounter,
            100,
            ContentField::Content,
            Verbosity::Low,
        )
        .unwrap();
        assert!(ctx.is_empty());
    }
}
