//! Query orchestration: routing, retrieval, ranking, budgeting, and the
//! dual-model generation protocol, with per-session cost accounting.
//!
//! One query moves through the phases `Routed → Retrieved → Ranked →
//! Budgeted → Answered → Critiqued → Costed`; the structured route skips
//! everything between `Routed` and `Answered`, and also skips the critique
//! and cost phases: structured answers are not critiqued. That asymmetry is
//! a deliberate product decision.
//!
//! Queries are processed one at a time per session. Cost state lives in a
//! [`SessionLedger`] owned by the caller and threaded through `run`, so
//! concurrent sessions never share mutable state.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::context::{assemble, ContextError, DEFAULT_TOKEN_BUDGET};
use crate::display::{source_cards, SourceCard};
use crate::gateway::{nanos_to_usd, Attribution, ChatModel, ProviderError};
use crate::generate::{
    ChunkObserver, CompletedGeneration, CritiqueOutcome, DualGenerator, GenerationParams,
};
use crate::prompts::{build_answer_prompt, Verbosity, ANSWER_SYSTEM_MESSAGE};
use crate::rerank::{Reranker, RerankError};
use crate::retrieval::{ContentField, HybridSearcher, RetrievalError};
use crate::router::{QueryRouter, Route, RouterError};
use crate::text2sql::{with_guest_clause, StructuredQueryError, StructuredQueryExecutor};
use crate::tokens::TokenEstimator;

// =============================================================================
// REQUEST / OUTCOME TYPES
// =============================================================================

/// Everything the configuration surface exposes, per query. Immutable once
/// issued; there are no persisted defaults beyond these initial values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Raw question text.
    pub query: String,
    /// Collection to search. Required before any retrieval happens.
    pub collection: Option<String>,
    /// Restrict retrieval (and structured queries) to this guest.
    pub guest: Option<String>,
    /// Reader (answering) model.
    pub reader_model: ChatModel,
    /// Responder (critiquing) model.
    pub responder_model: ChatModel,
    /// Free-text style directive for the critique.
    pub responder_tone: String,
    /// Whether structured routing is enabled. Disabled means the router is
    /// bypassed entirely and the query is forced onto the semantic route.
    pub enable_structured: bool,
    /// Key of the reranker model to use, from the configured registry.
    pub reranker: String,
    /// Which transcript field feeds the context.
    pub content_field: ContentField,
    /// Hybrid blend: 0 = pure lexical, 1 = pure vector.
    pub alpha: f64,
    /// Hits requested from hybrid search.
    pub retrieval_limit: usize,
    /// Candidates kept by the reranker.
    pub rerank_top_k: usize,
    /// Sampling temperature for both generations.
    pub temperature: f32,
    /// Max output tokens for both generations.
    pub max_response_tokens: u32,
    /// Prompt scaffolding level (0/1/2).
    pub verbosity: Verbosity,
    /// Token ceiling for the assembled context.
    pub token_budget: usize,
}

impl QueryRequest {
    /// A request with the front-end's initial slider values.
    pub fn new(
        query: impl Into<String>,
        reader_model: ChatModel,
        responder_model: ChatModel,
    ) -> Self {
        Self {
            query: query.into(),
            collection: None,
            guest: None,
            reader_model,
            responder_model,
            responder_tone: "professional and businesslike".into(),
            enable_structured: true,
            reranker: String::new(),
            content_field: ContentField::Content,
            alpha: 0.5,
            retrieval_limit: 50,
            rerank_top_k: 3,
            temperature: 0.5,
            max_response_tokens: 250,
            verbosity: Verbosity::Medium,
            token_budget: DEFAULT_TOKEN_BUDGET,
        }
    }

    fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.temperature,
            max_tokens: self.max_response_tokens,
        }
    }
}

/// Milestones a query passes through, recorded in order on the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Routed,
    Retrieved,
    Ranked,
    Budgeted,
    Answered,
    Critiqued,
    Costed,
}

/// The answer produced for a query.
#[derive(Debug, Clone)]
pub enum QueryAnswer {
    /// Formatted text from the structured-query executor. Not critiqued,
    /// not cost-accounted.
    Structured { text: String },
    /// Streamed answer plus its independent critique and citation sources.
    Semantic {
        answer: CompletedGeneration,
        critique: CritiqueOutcome,
        sources: Vec<SourceCard>,
    },
}

/// Result of one completed query.
#[derive(Debug)]
pub struct QueryOutcome {
    pub query_id: Uuid,
    pub route: Route,
    /// Phases traversed, in order.
    pub phases: Vec<Phase>,
    pub answer: QueryAnswer,
    /// Cost of this query's generation pair (0 on the structured route and
    /// for a failed critique's half).
    pub cost_nanodollars: i64,
}

impl QueryOutcome {
    pub fn cost_usd(&self) -> f64 {
        nanos_to_usd(self.cost_nanodollars)
    }
}

// =============================================================================
// SESSION LEDGER
// =============================================================================

/// Per-session cost accumulator.
///
/// Reset at session start, incremented exactly once per completed generation
/// pair, never decremented. Owned by the caller and passed through `run`:
/// there is no process-global cost state, so concurrent sessions cannot
/// interfere with each other's totals.
#[derive(Debug)]
pub struct SessionLedger {
    session_id: Uuid,
    total_nanodollars: i64,
}

impl SessionLedger {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            total_nanodollars: 0,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    fn add(&mut self, nanodollars: i64) {
        debug_assert!(nanodollars >= 0);
        self.total_nanodollars += nanodollars.max(0);
    }

    pub fn total_nanodollars(&self) -> i64 {
        self.total_nanodollars
    }

    pub fn total_usd(&self) -> f64 {
        nanos_to_usd(self.total_nanodollars)
    }
}

impl Default for SessionLedger {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Query issued without a collection. Rejected before any external call.
    #[error("select a collection before issuing a query")]
    MissingSelection,

    /// Reranker key not present in the configured registry. Rejected before
    /// any external call.
    #[error("unknown reranker model: {0}")]
    UnknownReranker(String),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error(transparent)]
    Rerank(#[from] RerankError),

    #[error(transparent)]
    Context(#[from] ContextError),

    /// The primary generation failed; the whole query aborts and no cost is
    /// recorded.
    #[error("generation failed: {0}")]
    Generation(#[from] ProviderError),

    #[error(transparent)]
    StructuredQuery(#[from] StructuredQueryError),
}

// =============================================================================
// OBSERVER
// =============================================================================

/// Receives streamed output as it arrives, for live rendering.
pub trait QueryObserver: Send {
    fn on_answer_chunk(&mut self, _chunk: &str) {}
    fn on_critique_chunk(&mut self, _chunk: &str) {}
}

/// Observer that discards all output (tests, headless runs).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopQueryObserver;

impl QueryObserver for NoopQueryObserver {}

struct AnswerChunks<'a>(&'a mut dyn QueryObserver);

impl ChunkObserver for AnswerChunks<'_> {
    fn on_chunk(&mut self, chunk: &str) {
        self.0.on_answer_chunk(chunk);
    }
}

struct CritiqueChunks<'a>(&'a mut dyn QueryObserver);

impl ChunkObserver for CritiqueChunks<'_> {
    fn on_chunk(&mut self, chunk: &str) {
        self.0.on_critique_chunk(chunk);
    }
}

// =============================================================================
// PIPELINE
// =============================================================================

/// The assembled query pipeline. Construction wires the external
/// collaborators; `run` handles one query at a time.
pub struct Pipeline {
    router: Arc<dyn QueryRouter>,
    searcher: Arc<dyn HybridSearcher>,
    rerankers: HashMap<String, Arc<dyn Reranker>>,
    generator: DualGenerator,
    executor: Option<Arc<dyn StructuredQueryExecutor>>,
    estimator: Arc<dyn TokenEstimator>,
}

impl Pipeline {
    pub fn new(
        router: Arc<dyn QueryRouter>,
        searcher: Arc<dyn HybridSearcher>,
        rerankers: HashMap<String, Arc<dyn Reranker>>,
        generator: DualGenerator,
        executor: Option<Arc<dyn StructuredQueryExecutor>>,
        estimator: Arc<dyn TokenEstimator>,
    ) -> Self {
        Self {
            router,
            searcher,
            rerankers,
            generator,
            executor,
            estimator,
        }
    }

    /// Run one query to completion, folding its cost into `ledger`.
    pub async fn run(
        &self,
        req: &QueryRequest,
        ledger: &mut SessionLedger,
        observer: &mut dyn QueryObserver,
    ) -> Result<QueryOutcome, PipelineError> {
        // Validation failures reject before any external call.
        let collection = req
            .collection
            .as_deref()
            .ok_or(PipelineError::MissingSelection)?;
        let reranker = self
            .rerankers
            .get(&req.reranker)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownReranker(req.reranker.clone()))?;

        let query_id = Uuid::new_v4();
        let mut phases = Vec::new();

        // Structured routing disabled bypasses the router entirely; a router
        // outage degrades to the semantic route rather than failing the query.
        let route = if req.enable_structured {
            match self.router.route(&req.query).await {
                Ok(route) => route,
                Err(RouterError::Unavailable(err)) => {
                    tracing::warn!(error = %err, "router unavailable, forcing semantic route");
                    Route::Semantic
                }
                Err(RouterError::Config(message)) => {
                    tracing::warn!(%message, "router misconfigured, forcing semantic route");
                    Route::Semantic
                }
            }
        } else {
            Route::Semantic
        };
        phases.push(Phase::Routed);
        tracing::info!(query_id = %query_id, route = route.as_str(), "routed");

        match route {
            Route::Structured => {
                self.run_structured(req, query_id, phases).await
            }
            Route::Semantic => {
                self.run_semantic(req, collection, reranker, query_id, phases, ledger, observer)
                    .await
            }
        }
    }

    /// Structured route: the executor answers directly. Skips retrieval,
    /// ranking, and budgeting, and also the critique and cost phases;
    /// structured answers are not critiqued (deliberate product decision).
    async fn run_structured(
        &self,
        req: &QueryRequest,
        query_id: Uuid,
        mut phases: Vec<Phase>,
    ) -> Result<QueryOutcome, PipelineError> {
        let executor = self
            .executor
            .as_ref()
            .ok_or(StructuredQueryError::NotConfigured)?;

        let query = with_guest_clause(&req.query, req.guest.as_deref());
        let text = executor.execute(&query).await?;
        phases.push(Phase::Answered);

        Ok(QueryOutcome {
            query_id,
            route: Route::Structured,
            phases,
            answer: QueryAnswer::Structured { text },
            cost_nanodollars: 0,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_semantic(
        &self,
        req: &QueryRequest,
        collection: &str,
        reranker: Arc<dyn Reranker>,
        query_id: Uuid,
        mut phases: Vec<Phase>,
        ledger: &mut SessionLedger,
        observer: &mut dyn QueryObserver,
    ) -> Result<QueryOutcome, PipelineError> {
        let candidates = self
            .searcher
            .hybrid_search(
                &req.query,
                collection,
                req.alpha,
                req.guest.as_deref(),
                req.retrieval_limit,
            )
            .await?;
        phases.push(Phase::Retrieved);
        tracing::info!(query_id = %query_id, hits = candidates.len(), "retrieved");

        let ranked = reranker
            .rerank(candidates, &req.query, req.rerank_top_k)
            .await?;
        phases.push(Phase::Ranked);
        tracing::info!(query_id = %query_id, ranked = ranked.len(), "reranked");

        let context = assemble(
            &ranked,
            &req.query,
            ANSWER_SYSTEM_MESSAGE,
            self.estimator.as_ref(),
            req.token_budget,
            req.content_field,
            req.verbosity,
        )?;
        phases.push(Phase::Budgeted);
        tracing::info!(
            query_id = %query_id,
            valid = context.len(),
            tokens = context.total_tokens(),
            "assembled context"
        );

        let prompt = build_answer_prompt(&req.query, &context);
        let params = req.generation_params();
        let attribution = Attribution::new("pipeline::answer")
            .with_session(ledger.session_id())
            .with_query(query_id);

        // A primary failure aborts the query: no critique, no cost recorded.
        let answer = self
            .generator
            .answer(
                &req.reader_model,
                &prompt,
                ANSWER_SYSTEM_MESSAGE,
                params,
                attribution,
                &mut AnswerChunks(&mut *observer),
            )
            .await?;
        phases.push(Phase::Answered);

        // A critique failure is non-fatal: the answer and its cost stand.
        let critique_attribution = Attribution::new("pipeline::critique")
            .with_session(ledger.session_id())
            .with_query(query_id);
        let critique = match self
            .generator
            .critique(
                &req.responder_model,
                &req.responder_tone,
                &prompt,
                &answer.text,
                params,
                critique_attribution,
                &mut CritiqueChunks(&mut *observer),
            )
            .await
        {
            Ok(critique) => {
                phases.push(Phase::Critiqued);
                CritiqueOutcome::Completed(critique)
            }
            Err(err) => {
                tracing::warn!(query_id = %query_id, error = %err, "critique failed; surfacing answer without it");
                CritiqueOutcome::Failed {
                    error: err.to_string(),
                }
            }
        };

        let pair_cost = answer.cost_nanodollars + critique.cost_nanodollars();
        ledger.add(pair_cost);
        phases.push(Phase::Costed);
        tracing::info!(
            query_id = %query_id,
            pair_cost_usd = nanos_to_usd(pair_cost),
            session_cost_usd = ledger.total_usd(),
            "total session cost"
        );

        let sources = source_cards(&context);

        Ok(QueryOutcome {
            query_id,
            route: Route::Semantic,
            phases,
            answer: QueryAnswer::Semantic {
                answer,
                critique,
                sources,
            },
            cost_nanodollars: pair_cost,
        })
    }
}
