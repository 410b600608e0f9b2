//! Citation metadata for the ranked sources backing an answer.
//!
//! The interactive front-end renders these; the CLI prints them. Nothing in
//! here touches the network.

use serde::{Deserialize, Serialize};

use crate::context::ValidContext;

/// Format a duration in seconds as `H:MM:SS` (or `M:SS` under an hour).
pub fn convert_seconds(total_seconds: u32) -> String {
    let hours = total_seconds / 3_600;
    let minutes = (total_seconds % 3_600) / 60;
    let seconds = total_seconds % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

/// Maximum characters of transcript shown per source card.
const SNIPPET_CHARS: usize = 400;

/// One ranked source, ready for citation display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceCard {
    /// 1-based rank among the sources that made it into the context.
    pub rank: usize,
    pub title: String,
    pub guest: String,
    pub episode_url: String,
    pub thumbnail_url: Option<String>,
    /// Episode length as `H:MM:SS`.
    pub duration: String,
    /// Leading slice of the transcript content used in the context.
    pub snippet: String,
    /// Reranker score, for debugging relevance.
    pub rerank_score: f64,
}

/// Build source cards for every candidate included in the context, in rank
/// order.
pub fn source_cards(context: &ValidContext) -> Vec<SourceCard> {
    context
        .entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let record = &entry.candidate.record;
            let mut snippet: String = entry.block.trim_end().to_string();
            if snippet.len() > SNIPPET_CHARS {
                // Truncate on a char boundary.
                let cut = snippet
                    .char_indices()
                    .take_while(|(idx, _)| *idx < SNIPPET_CHARS)
                    .last()
                    .map(|(idx, c)| idx + c.len_utf8())
                    .unwrap_or(0);
                snippet.truncate(cut);
                snippet.push('…');
            }

            SourceCard {
                rank: i + 1,
                title: record.title.clone(),
                guest: record.guest.clone(),
                episode_url: record.episode_url.clone(),
                thumbnail_url: record.thumbnail_url.clone(),
                duration: convert_seconds(record.length_seconds),
                snippet,
                rerank_score: entry.candidate.rerank_score,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextEntry;
    use crate::rerank::RankedCandidate;
    use crate::retrieval::CandidateRecord;

    #[test]
    fn seconds_format() {
        assert_eq!(convert_seconds(59), "0:59");
        assert_eq!(convert_seconds(65), "1:05");
        assert_eq!(convert_seconds(3_600), "1:00:00");
        assert_eq!(convert_seconds(3_725), "1:02:05");
        assert_eq!(convert_seconds(0), "0:00");
    }

    #[test]
    fn cards_follow_rank_order() {
        let entry = |id: &str, score: f64| ContextEntry {
            candidate: RankedCandidate {
                record: CandidateRecord {
                    doc_id: id.into(),
                    title: format!("Ep {id}"),
                    guest: "G".into(),
                    summary: None,
                    content: Some("text".into()),
                    expanded_content: None,
                    episode_url: "https://example.com".into(),
                    thumbnail_url: None,
                    length_seconds: 120,
                    score: 0.0,
                },
                rerank_score: score,
            },
            block: format!("block {id}"),
            block_tokens: 2,
        };

        let context = ValidContext {
            entries: vec![entry("a", 0.9), entry("b", 0.5)],
            context_tokens: 4,
            base_tokens: 2,
        };

        let cards = source_cards(&context);
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0].rank, 1);
        assert_eq!(cards[0].title, "Ep a");
        assert_eq!(cards[1].rank, 2);
        assert_eq!(cards[0].duration, "2:00");
    }

    #[test]
    fn long_snippets_truncate_with_ellipsis() {
        let long = "x".repeat(1_000);
        let context = ValidContext {
            entries: vec![ContextEntry {
                candidate: RankedCandidate {
                    record: CandidateRecord {
                        doc_id: "d".into(),
                        title: "T".into(),
                        guest: "G".into(),
                        summary: None,
                        content: Some(long.clone()),
                        expanded_content: None,
                        episode_url: "u".into(),
                        thumbnail_url: None,
                        length_seconds: 0,
                        score: 0.0,
                    },
                    rerank_score: 0.0,
                },
                block: long,
                block_tokens: 0,
            }],
            context_tokens: 0,
            base_tokens: 0,
        };

        let cards = source_cards(&context);
        assert!(cards[0].snippet.ends_with('…'));
        assert!(cards[0].snippet.chars().count() <= SNIPPET_CHARS + 1);
    }
}
