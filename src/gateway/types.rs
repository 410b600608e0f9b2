//! Core types for the provider gateway.

use std::pin::Pin;
use std::time::Duration;

use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::ProviderError;

// =============================================================================
// ATTRIBUTION
// =============================================================================

/// Attribution for cost tracking and debugging.
///
/// Every request through the gateway carries attribution so we know:
/// - Which session issued the request (session_id)
/// - Which query it's part of (query_id)
/// - Which code path triggered it (caller)
#[derive(Debug, Clone, Default)]
pub struct Attribution {
    /// Session the request belongs to (if known).
    pub session_id: Option<Uuid>,
    /// Query this request is part of.
    pub query_id: Option<Uuid>,
    /// Which code path made this call, for debugging.
    /// Use a static string like "pipeline::answer" or "router::embed".
    pub caller: &'static str,
}

impl Attribution {
    pub fn new(caller: &'static str) -> Self {
        Self {
            caller,
            ..Default::default()
        }
    }

    pub fn with_session(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_query(mut self, query_id: Uuid) -> Self {
        self.query_id = Some(query_id);
        self
    }
}

// =============================================================================
// CHAT TYPES
// =============================================================================

/// Chat message role.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Identifier of a chat model served through the OpenRouter-compatible
/// endpoint, e.g. "openai/gpt-3.5-turbo-0125" or "anthropic/claude-3-haiku".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatModel(String);

impl ChatModel {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self(model_id.into())
    }

    pub fn model_id(&self) -> &str {
        &self.0
    }

    /// Upstream provider segment (e.g. "anthropic" from
    /// "anthropic/claude-3-haiku"). Used for logging and rate grouping.
    pub fn provider_route(&self) -> &str {
        self.0.split('/').next().unwrap_or(&self.0)
    }
}

impl std::fmt::Display for ChatModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Request for a chat completion (blocking or streamed).
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Model to use.
    pub model: ChatModel,
    /// Messages in the conversation.
    pub messages: Vec<Message>,
    /// Sampling temperature (0.0 - 2.0).
    pub temperature: f32,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
    /// Attribution for cost tracking.
    pub attribution: Attribution,
}

impl ChatRequest {
    pub fn new(model: ChatModel, messages: Vec<Message>, attribution: Attribution) -> Self {
        Self {
            model,
            messages,
            temperature: 0.0,
            max_tokens: None,
            attribution,
        }
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Total characters across all message contents.
    pub fn input_chars(&self) -> usize {
        self.messages.iter().map(|m| m.content.len()).sum()
    }
}

/// Reason the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Unknown(String),
}

impl From<Option<String>> for FinishReason {
    fn from(s: Option<String>) -> Self {
        match s.as_deref() {
            Some("stop") => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            Some(other) => FinishReason::Unknown(other.to_string()),
            None => FinishReason::Unknown("none".to_string()),
        }
    }
}

/// Response from a blocking chat completion.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Generated content.
    pub content: String,
    /// Input tokens consumed.
    pub input_tokens: u32,
    /// Output tokens generated.
    pub output_tokens: u32,
    /// Cost in nanodollars (1e-9 USD).
    pub cost_nanodollars: i64,
    /// Time taken for the request.
    pub latency: Duration,
    /// Why the model stopped.
    pub finish_reason: FinishReason,
}

impl ChatResponse {
    pub(crate) fn empty() -> Self {
        Self {
            content: String::new(),
            input_tokens: 0,
            output_tokens: 0,
            cost_nanodollars: 0,
            latency: Duration::from_millis(0),
            finish_reason: FinishReason::Unknown("error".to_string()),
        }
    }
}

// =============================================================================
// STREAMING TYPES
// =============================================================================

/// Provider-reported token usage for a completed stream, when the endpoint
/// supplies it. Absent counts fall back to local tokenizer estimates.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamUsage {
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
}

/// One event in a streamed completion.
///
/// `Delta` chunks arrive as the model generates; exactly one `Done` event
/// terminates a successful stream. Dropping the stream before `Done` aborts
/// the underlying HTTP request and discards partial output.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Incremental content.
    Delta(String),
    /// Stream finished; carries usage if the provider reported it.
    Done(StreamUsage),
}

/// A lazy, finite, non-restartable sequence of stream events.
///
/// A fresh `stream_chat` call must be issued to regenerate.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ProviderError>> + Send>>;

// =============================================================================
// EMBEDDING TYPES
// =============================================================================

/// Embedding model served by the OpenAI-compatible embeddings endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedModel {
    /// text-embedding-3-small (1536 dimensions)
    Small3,
    /// text-embedding-3-large (3072 dimensions)
    Large3,
}

impl EmbedModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbedModel::Small3 => "text-embedding-3-small",
            EmbedModel::Large3 => "text-embedding-3-large",
        }
    }

    pub fn dimensions(&self) -> usize {
        match self {
            EmbedModel::Small3 => 1536,
            EmbedModel::Large3 => 3072,
        }
    }
}

/// Request to embed texts.
#[derive(Debug, Clone)]
pub struct EmbedRequest {
    /// Model to use for embedding.
    pub model: EmbedModel,
    /// Texts to embed. Each text produces one embedding vector.
    pub texts: Vec<String>,
    /// Attribution for cost tracking.
    pub attribution: Attribution,
}

impl EmbedRequest {
    pub fn new(model: EmbedModel, texts: Vec<String>, attribution: Attribution) -> Self {
        Self {
            model,
            texts,
            attribution,
        }
    }

    /// Single text convenience constructor.
    pub fn single(model: EmbedModel, text: String, attribution: Attribution) -> Self {
        Self::new(model, vec![text], attribution)
    }
}

/// Response from an embedding request.
#[derive(Debug, Clone)]
pub struct EmbedResponse {
    /// Embedding vectors, one per input text.
    pub embeddings: Vec<Vec<f32>>,
    /// Total tokens consumed.
    pub tokens: u32,
    /// Cost in nanodollars (1e-9 USD).
    pub cost_nanodollars: i64,
    /// Time taken for the request.
    pub latency: Duration,
}
