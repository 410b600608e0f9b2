//! Hybrid-search retrieval over the transcript collections.
//!
//! `WeaviateClient` speaks the GraphQL `hybrid` query against a Weaviate
//! instance; `alpha` blends lexical and vector scoring (0 = pure lexical,
//! 1 = pure vector). The storage and indexing internals stay on the other
//! side of the wire; this module only owns the candidate records it parses
//! out of the response.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::sleep;

use crate::gateway::RetryPolicy;

/// Which transcript field feeds the generation context.
///
/// `Expanded` is the wider window around the matched chunk; not every
/// collection carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentField {
    Content,
    ExpandedContent,
}

impl ContentField {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentField::Content => "content",
            ContentField::ExpandedContent => "expanded_content",
        }
    }
}

impl std::str::FromStr for ContentField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "content" => Ok(ContentField::Content),
            "expanded_content" => Ok(ContentField::ExpandedContent),
            other => Err(format!("unknown content field: {other}")),
        }
    }
}

/// A retrieval hit. Owned by the retrieval client at creation, read-only
/// afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub doc_id: String,
    pub title: String,
    pub guest: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub expanded_content: Option<String>,
    pub episode_url: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub length_seconds: u32,
    /// Hybrid relevance score reported by the search engine.
    #[serde(default)]
    pub score: f64,
}

impl CandidateRecord {
    /// The chosen content field, treating empty strings as missing.
    pub fn chosen_content(&self, field: ContentField) -> Option<&str> {
        let value = match field {
            ContentField::Content => self.content.as_deref(),
            ContentField::ExpandedContent => self.expanded_content.as_deref(),
        };
        value.filter(|s| !s.trim().is_empty())
    }
}

/// Errors from the retrieval backend.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("invalid collection name: {0}")]
    InvalidCollection(String),

    #[error("search engine error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("malformed search response: {0}")]
    Decode(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl RetrievalError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api { status, .. } => *status >= 500 || *status == 429,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::InvalidCollection(_) | Self::Decode(_) | Self::Config(_) => false,
        }
    }
}

/// Performs hybrid (lexical+vector) search over a named collection.
#[async_trait]
pub trait HybridSearcher: Send + Sync {
    async fn hybrid_search(
        &self,
        query: &str,
        collection: &str,
        alpha: f64,
        guest_filter: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CandidateRecord>, RetrievalError>;

    /// Names of the collections available for querying.
    async fn list_collections(&self) -> Result<Vec<String>, RetrievalError>;
}

// =============================================================================
// WEAVIATE CLIENT
// =============================================================================

/// Properties requested for every hit; mirrors the fields of
/// [`CandidateRecord`].
const RETURN_PROPERTIES: &str = "doc_id title guest summary content expanded_content \
     episode_url thumbnail_url length_seconds";

#[derive(Debug, Clone)]
pub struct WeaviateClient {
    client: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl WeaviateClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, RetrievalError> {
        Self::with_config(base_url, None, Duration::from_secs(30), RetryPolicy::default())
    }

    pub fn from_env() -> Result<Self, RetrievalError> {
        let base_url = std::env::var("WEAVIATE_URL")
            .map_err(|_| RetrievalError::Config("WEAVIATE_URL not set".into()))?;
        let api_key = std::env::var("WEAVIATE_API_KEY").ok();
        Self::with_config(base_url, api_key, Duration::from_secs(30), RetryPolicy::default())
    }

    pub fn with_config(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, RetrievalError> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(key) = api_key {
            let value = reqwest::header::HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|_| RetrievalError::Config("Invalid API key format".into()))?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| RetrievalError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            retry,
        })
    }

    /// Build the GraphQL hybrid query. Strings are JSON-escaped before being
    /// spliced into the query body.
    fn build_query(
        query: &str,
        collection: &str,
        alpha: f64,
        guest_filter: Option<&str>,
        limit: usize,
    ) -> Result<String, RetrievalError> {
        if collection.is_empty()
            || !collection
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(RetrievalError::InvalidCollection(collection.to_string()));
        }

        let query_lit =
            serde_json::to_string(query).map_err(|e| RetrievalError::Decode(e.to_string()))?;

        let where_clause = match guest_filter {
            Some(guest) => {
                let guest_lit = serde_json::to_string(guest)
                    .map_err(|e| RetrievalError::Decode(e.to_string()))?;
                format!(
                    ", where: {{ path: [\"guest\"], operator: Equal, valueText: {guest_lit} }}"
                )
            }
            None => String::new(),
        };

        Ok(format!(
            "{{ Get {{ {collection}(hybrid: {{ query: {query_lit}, alpha: {alpha} }}, \
             limit: {limit}{where_clause}) \
             {{ {RETURN_PROPERTIES} _additional {{ score }} }} }} }}"
        ))
    }

    async fn post_graphql(&self, body: &serde_json::Value) -> Result<GraphQlResponse, RetrievalError> {
        let response = self
            .client
            .post(format!("{}/v1/graphql", self.base_url))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RetrievalError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<GraphQlResponse>()
            .await
            .map_err(|e| RetrievalError::Decode(e.to_string()))
    }

    async fn with_retry<T, F, Fut>(&self, mut call: F) -> Result<T, RetrievalError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, RetrievalError>>,
    {
        let mut last_error: Option<RetrievalError> = None;

        for attempt in 0..=self.retry.max_retries {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !err.is_retryable() || attempt == self.retry.max_retries {
                        return Err(err);
                    }
                    sleep(self.retry.delay_for(attempt)).await;
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| RetrievalError::Decode("unknown error".into())))
    }
}

#[async_trait]
impl HybridSearcher for WeaviateClient {
    async fn hybrid_search(
        &self,
        query: &str,
        collection: &str,
        alpha: f64,
        guest_filter: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CandidateRecord>, RetrievalError> {
        let gql = Self::build_query(query, collection, alpha.clamp(0.0, 1.0), guest_filter, limit)?;
        let body = serde_json::json!({ "query": gql });

        let parsed = self.with_retry(|| self.post_graphql(&body)).await?;

        if let Some(errors) = parsed.errors {
            let message = errors
                .into_iter()
                .filter_map(|e| e.message)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(RetrievalError::Api {
                status: 200,
                message,
            });
        }

        let hits = parsed
            .data
            .and_then(|d| d.get.and_then(|mut g| g.remove(collection)))
            .ok_or_else(|| {
                RetrievalError::Decode(format!("no results object for collection {collection}"))
            })?;

        Ok(hits.into_iter().map(CandidateRecord::from).collect())
    }

    async fn list_collections(&self) -> Result<Vec<String>, RetrievalError> {
        let fetch = || async {
            let response = self
                .client
                .get(format!("{}/v1/schema", self.base_url))
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(RetrievalError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            response
                .json::<SchemaResponse>()
                .await
                .map_err(|e| RetrievalError::Decode(e.to_string()))
        };

        let schema = self.with_retry(fetch).await?;
        Ok(schema.classes.into_iter().map(|c| c.class).collect())
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Deserialize)]
struct GraphQlResponse {
    data: Option<GraphQlData>,
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Deserialize)]
struct GraphQlData {
    #[serde(rename = "Get")]
    get: Option<std::collections::HashMap<String, Vec<RawHit>>>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: Option<String>,
}

#[derive(Deserialize, Default)]
struct SchemaResponse {
    #[serde(default)]
    classes: Vec<SchemaClass>,
}

#[derive(Deserialize)]
struct SchemaClass {
    class: String,
}

/// Weaviate reports `_additional.score` as a string; accept both forms.
#[derive(Deserialize)]
#[serde(untagged)]
enum ScoreValue {
    Number(f64),
    Text(String),
}

impl ScoreValue {
    fn as_f64(&self) -> f64 {
        match self {
            ScoreValue::Number(n) => *n,
            ScoreValue::Text(s) => s.parse().unwrap_or(0.0),
        }
    }
}

#[derive(Deserialize, Default)]
struct Additional {
    score: Option<ScoreValue>,
}

#[derive(Deserialize)]
struct RawHit {
    #[serde(default)]
    doc_id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    guest: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    expanded_content: Option<String>,
    #[serde(default)]
    episode_url: Option<String>,
    #[serde(default)]
    thumbnail_url: Option<String>,
    #[serde(default)]
    length_seconds: Option<u32>,
    #[serde(rename = "_additional", default)]
    additional: Option<Additional>,
}

impl From<RawHit> for CandidateRecord {
    fn from(hit: RawHit) -> Self {
        CandidateRecord {
            doc_id: hit.doc_id.unwrap_or_default(),
            title: hit.title.unwrap_or_default(),
            guest: hit.guest.unwrap_or_default(),
            summary: hit.summary,
            content: hit.content,
            expanded_content: hit.expanded_content,
            episode_url: hit.episode_url.unwrap_or_default(),
            thumbnail_url: hit.thumbnail_url,
            length_seconds: hit.length_seconds.unwrap_or(0),
            score: hit.additional.and_then(|a| a.score).map_or(0.0, |s| s.as_f64()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(content: Option<&str>, expanded: Option<&str>) -> CandidateRecord {
        CandidateRecord {
            doc_id: "doc-1".into(),
            title: "Episode".into(),
            guest: "Guest".into(),
            summary: None,
            content: content.map(String::from),
            expanded_content: expanded.map(String::from),
            episode_url: "https://example.com/ep1".into(),
            thumbnail_url: None,
            length_seconds: 0,
            score: 0.0,
        }
    }

    #[test]
    fn chosen_content_filters_empty() {
        let r = record(Some("text"), Some("   "));
        assert_eq!(r.chosen_content(ContentField::Content), Some("text"));
        assert_eq!(r.chosen_content(ContentField::ExpandedContent), None);

        let missing = record(None, None);
        assert_eq!(missing.chosen_content(ContentField::Content), None);
    }

    #[test]
    fn build_query_includes_filter_and_alpha() {
        let gql =
            WeaviateClient::build_query("about sleep", "Podcast", 0.5, Some("Jane Doe"), 50)
                .unwrap();
        assert!(gql.contains("hybrid: { query: \"about sleep\", alpha: 0.5 }"));
        assert!(gql.contains("valueText: \"Jane Doe\""));
        assert!(gql.contains("limit: 50"));
    }

    #[test]
    fn build_query_rejects_bad_collection() {
        let err = WeaviateClient::build_query("q", "Bad Name!", 0.5, None, 10).unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidCollection(_)));
    }

    #[test]
    fn build_query_escapes_quotes() {
        let gql = WeaviateClient::build_query("say \"hello\"", "Podcast", 1.0, None, 10).unwrap();
        assert!(gql.contains("\\\"hello\\\""));
    }

    #[test]
    fn score_value_parses_both_forms() {
        let raw = r#"{"score": "0.8125"}"#;
        let parsed: Additional = serde_json::from_str(raw).unwrap();
        assert!((parsed.score.unwrap().as_f64() - 0.8125).abs() < 1e-9);

        let raw = r#"{"score": 0.25}"#;
        let parsed: Additional = serde_json::from_str(raw).unwrap();
        assert!((parsed.score.unwrap().as_f64() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn content_field_round_trips() {
        assert_eq!("content".parse::<ContentField>().unwrap(), ContentField::Content);
        assert_eq!(
            "expanded_content".parse::<ContentField>().unwrap(),
            ContentField::ExpandedContent
        );
        assert!("unknown".parse::<ContentField>().is_err());
    }
}
