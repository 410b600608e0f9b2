//! Second-stage reranking of retrieval candidates.
//!
//! The cross-encoder itself is an external scoring service (a
//! text-embeddings-inference style `/rerank` endpoint); this module owns the
//! request/response shapes and the ordering invariant: results are sorted by
//! non-increasing rerank score and strictly bounded to `top_k`, regardless of
//! input order.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::sleep;

use crate::gateway::RetryPolicy;
use crate::retrieval::{CandidateRecord, ContentField};

/// A candidate annotated with its reranker score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub record: CandidateRecord,
    /// Cross-encoder relevance score; ranked order is non-increasing in this.
    pub rerank_score: f64,
}

impl RankedCandidate {
    /// The chosen content field, treating empty strings as missing.
    pub fn chosen_content(&self, field: ContentField) -> Option<&str> {
        self.record.chosen_content(field)
    }
}

/// Errors from the reranking backend.
#[derive(Debug, Error)]
pub enum RerankError {
    #[error("reranker error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("malformed rerank response: {0}")]
    Decode(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl RerankError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api { status, .. } => *status >= 500 || *status == 429,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Decode(_) | Self::Config(_) => false,
        }
    }
}

/// Scores (query, candidate) pairs and returns the best `top_k` in
/// non-increasing score order.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(
        &self,
        candidates: Vec<CandidateRecord>,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<RankedCandidate>, RerankError>;
}

// =============================================================================
// HTTP CROSS-ENCODER ADAPTER
// =============================================================================

/// Adapter for a text-embeddings-inference style rerank endpoint.
///
/// One endpoint serves one cross-encoder checkpoint; selecting a different
/// reranker model means selecting a different configured endpoint.
#[derive(Debug, Clone)]
pub struct HttpReranker {
    client: reqwest::Client,
    base_url: String,
    /// Checkpoint identifier, for logging and citation display only.
    model: String,
    retry: RetryPolicy,
}

impl HttpReranker {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, RerankError> {
        Self::with_config(base_url, model, std::time::Duration::from_secs(30), RetryPolicy::default())
    }

    pub fn with_config(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: std::time::Duration,
        retry: RetryPolicy,
    ) -> Result<Self, RerankError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .gzip(true)
            .build()
            .map_err(|e| RerankError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
            retry,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn score_once(&self, query: &str, texts: &[&str]) -> Result<Vec<RawScore>, RerankError> {
        let response = self
            .client
            .post(format!("{}/rerank", self.base_url))
            .json(&serde_json::json!({
                "query": query,
                "texts": texts,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RerankError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<Vec<RawScore>>()
            .await
            .map_err(|e| RerankError::Decode(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct RawScore {
    index: usize,
    score: f64,
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn rerank(
        &self,
        candidates: Vec<CandidateRecord>,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<RankedCandidate>, RerankError> {
        if candidates.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        // The cross-encoder scores against the short content window; the
        // expanded window only matters at context-assembly time.
        let texts: Vec<&str> = candidates
            .iter()
            .map(|c| c.content.as_deref().unwrap_or(""))
            .collect();

        let mut attempt = 0;
        let scores = loop {
            match self.score_once(query, &texts).await {
                Ok(s) => break s,
                Err(err) => {
                    if !err.is_retryable() || attempt == self.retry.max_retries {
                        return Err(err);
                    }
                    sleep(self.retry.delay_for(attempt)).await;
                    attempt += 1;
                }
            }
        };

        rank_by_scores(candidates, scores, top_k)
    }
}

/// Pair scores back onto candidates, sort descending, truncate to `top_k`.
fn rank_by_scores(
    candidates: Vec<CandidateRecord>,
    scores: Vec<RawScore>,
    top_k: usize,
) -> Result<Vec<RankedCandidate>, RerankError> {
    let n = candidates.len();
    let mut by_index: Vec<Option<f64>> = vec![None; n];
    for s in scores {
        if s.index >= n {
            return Err(RerankError::Decode(format!(
                "score index {} out of range (n={n})",
                s.index
            )));
        }
        by_index[s.index] = Some(s.score);
    }

    let mut ranked: Vec<RankedCandidate> = candidates
        .into_iter()
        .zip(by_index)
        .filter_map(|(record, score)| {
            score.map(|rerank_score| RankedCandidate {
                record,
                rerank_score,
            })
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.rerank_score
            .partial_cmp(&a.rerank_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked.truncate(top_k);
    Ok(ranked)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str) -> CandidateRecord {
        CandidateRecord {
            doc_id: id.into(),
            title: format!("Episode {id}"),
            guest: "Guest".into(),
            summary: None,
            content: Some(format!("content of {id}")),
            expanded_content: None,
            episode_url: "https://example.com".into(),
            thumbnail_url: None,
            length_seconds: 0,
            score: 0.0,
        }
    }

    #[test]
    fn ranks_descending_and_truncates() {
        let candidates = vec![candidate("a"), candidate("b"), candidate("c")];
        let scores = vec![
            RawScore { index: 0, score: 0.2 },
            RawScore { index: 1, score: 0.9 },
            RawScore { index: 2, score: 0.5 },
        ];

        let ranked = rank_by_scores(candidates, scores, 2).unwrap();
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].record.doc_id, "b");
        assert_eq!(ranked[1].record.doc_id, "c");
        assert!(ranked[0].rerank_score >= ranked[1].rerank_score);
    }

    #[test]
    fn input_order_does_not_determine_output_order() {
        let forward = rank_by_scores(
            vec![candidate("a"), candidate("b")],
            vec![
                RawScore { index: 0, score: 0.1 },
                RawScore { index: 1, score: 0.8 },
            ],
            2,
        )
        .unwrap();
        let reversed = rank_by_scores(
            vec![candidate("b"), candidate("a")],
            vec![
                RawScore { index: 0, score: 0.8 },
                RawScore { index: 1, score: 0.1 },
            ],
            2,
        )
        .unwrap();

        assert_eq!(forward[0].record.doc_id, reversed[0].record.doc_id);
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let err = rank_by_scores(
            vec![candidate("a")],
            vec![RawScore { index: 3, score: 0.8 }],
            1,
        )
        .unwrap_err();
        assert!(matches!(err, RerankError::Decode(_)));
    }
}
