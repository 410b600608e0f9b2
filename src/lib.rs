#![forbid(unsafe_code)]

//! # lectern
//!
//! Question answering over a transcribed podcast corpus.
//!
//! Each query is classified by a semantic router: structured questions
//! ("how many episodes…") go to a text-to-SQL executor, everything else
//! takes the retrieval path: hybrid (lexical+vector) search, cross-encoder
//! reranking, token-budgeted context assembly, then a streamed answer from
//! the reader model followed by an independent streamed critique from the
//! responder model. Every generation pair is priced against a per-model
//! registry and folded into a per-session cost ledger.

pub mod config;
pub mod context;
pub mod display;
pub mod gateway;
pub mod generate;
pub mod pipeline;
pub mod prompts;
pub mod rerank;
pub mod retrieval;
pub mod router;
pub mod text2sql;
pub mod tokens;

pub use context::{assemble, ContextError, ValidContext, DEFAULT_TOKEN_BUDGET};
pub use gateway::{ChatGateway, ChatModel, ProviderError, ProviderGateway, RetryPolicy, UsageSink};
pub use generate::{CompletedGeneration, CritiqueOutcome, DualGenerator, GenerationParams};
pub use pipeline::{
    Phase, Pipeline, PipelineError, QueryAnswer, QueryObserver, QueryOutcome, QueryRequest,
    SessionLedger,
};
pub use rerank::{RankedCandidate, Reranker};
pub use retrieval::{CandidateRecord, ContentField, HybridSearcher};
pub use router::{Route, RouterError, SemanticRouter};
pub use tokens::{Cl100kCounter, TokenEstimator};
