//! Semantic intent routing.
//!
//! A query is classified against per-route reference utterances: the query
//! embedding is compared (cosine) to every utterance embedding, and the
//! best-scoring route wins iff it clears that route's decision threshold.
//! Anything else falls back to the semantic-search route. The reference set
//! is loaded once at startup from a serialized configuration and is read-only
//! afterward, so identical query text always yields the identical route.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gateway::{
    Attribution, EmbedModel, EmbedRequest, EmbeddingsAdapter, ProviderError,
};

/// Where a query gets handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    /// Structured-data lookup (text-to-SQL executor).
    Structured,
    /// Hybrid retrieval + generation.
    Semantic,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Structured => "structured",
            Route::Semantic => "semantic",
        }
    }

    fn from_name(name: &str) -> Option<Route> {
        match name {
            "structured" | "sql" => Some(Route::Structured),
            "semantic" | "search" => Some(Route::Semantic),
            _ => None,
        }
    }
}

/// Errors from the router.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The embedding backend is unreachable. Callers recover by forcing the
    /// semantic route.
    #[error("routing unavailable: {0}")]
    Unavailable(#[from] ProviderError),

    #[error("router configuration error: {0}")]
    Config(String),
}

/// Embeds query and utterance text. The model weights are an opaque scoring
/// function behind this seam, so the router is testable with fixed-score
/// stubs.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;
}

/// Embedder backed by the OpenAI-compatible embeddings endpoint.
pub struct RemoteEmbedder {
    adapter: EmbeddingsAdapter,
    model: EmbedModel,
}

impl RemoteEmbedder {
    pub fn new(adapter: EmbeddingsAdapter, model: EmbedModel) -> Self {
        Self { adapter, model }
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let req = EmbedRequest::new(self.model, texts.to_vec(), Attribution::new("router::embed"));
        let resp = self.adapter.embed(&req).await?;
        Ok(resp.embeddings)
    }
}

// =============================================================================
// CONFIGURATION
// =============================================================================

/// One route's reference utterances and decision threshold, as serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDefinition {
    pub name: String,
    pub utterances: Vec<String>,
    /// Minimum cosine similarity for this route to win.
    pub threshold: f32,
}

/// Serialized router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub routes: Vec<RouteDefinition>,
}

impl RouterConfig {
    pub fn from_json_str(json: &str) -> Result<Self, RouterError> {
        serde_json::from_str(json).map_err(|e| RouterError::Config(e.to_string()))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, RouterError> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            RouterError::Config(format!("cannot read {}: {e}", path.as_ref().display()))
        })?;
        Self::from_json_str(&raw)
    }
}

// =============================================================================
// ROUTER
// =============================================================================

#[derive(Debug)]
struct RouteRefs {
    route: Route,
    threshold: f32,
    utterance_embeddings: Vec<Vec<f32>>,
}

/// Classifies queries into routes. Built once at startup; read-only after.
#[derive(Debug)]
pub struct SemanticRouter<E> {
    embedder: E,
    refs: Vec<RouteRefs>,
    fallback: Route,
}

impl<E: Embedder> SemanticRouter<E> {
    /// Embed every reference utterance and build the router.
    pub async fn load(config: RouterConfig, embedder: E) -> Result<Self, RouterError> {
        let mut refs = Vec::with_capacity(config.routes.len());

        for def in &config.routes {
            let route = Route::from_name(&def.name)
                .ok_or_else(|| RouterError::Config(format!("unknown route name: {}", def.name)))?;
            if def.utterances.is_empty() {
                return Err(RouterError::Config(format!(
                    "route {} has no reference utterances",
                    def.name
                )));
            }

            let utterance_embeddings = embedder.embed(&def.utterances).await?;
            refs.push(RouteRefs {
                route,
                threshold: def.threshold,
                utterance_embeddings,
            });
        }

        Ok(Self {
            embedder,
            refs,
            fallback: Route::Semantic,
        })
    }

    /// Classify one query.
    pub async fn route(&self, query: &str) -> Result<Route, RouterError> {
        let texts = [query.to_string()];
        let query_embedding = self
            .embedder
            .embed(&texts)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RouterError::Config("embedder returned no vectors".into()))?;

        let mut best: Option<(Route, f32)> = None;
        for route_refs in &self.refs {
            let score = route_refs
                .utterance_embeddings
                .iter()
                .map(|u| cosine_similarity(&query_embedding, u))
                .fold(f32::NEG_INFINITY, f32::max);

            if score >= route_refs.threshold
                && best.map_or(true, |(_, best_score)| score > best_score)
            {
                best = Some((route_refs.route, score));
            }
        }

        let decided = best.map_or(self.fallback, |(route, _)| route);
        tracing::debug!(route = decided.as_str(), "routed query");
        Ok(decided)
    }
}

/// Object-safe routing seam for the pipeline.
#[async_trait]
pub trait QueryRouter: Send + Sync {
    async fn route(&self, query: &str) -> Result<Route, RouterError>;
}

#[async_trait]
impl<E: Embedder> QueryRouter for SemanticRouter<E> {
    async fn route(&self, query: &str) -> Result<Route, RouterError> {
        SemanticRouter::route(self, query).await
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::NEG_INFINITY;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return f32::NEG_INFINITY;
    }
    dot / (norm_a * norm_b)
}
