//! OpenRouter adapter for chat completions, plus the OpenAI-compatible
//! embeddings adapter used by the semantic router.

use std::time::{Duration, Instant};

use async_stream::stream;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::error::{ErrorContext, ProviderError};
use super::pricing::{chat_cost, embedding_cost};
use super::types::*;

// =============================================================================
// TRAIT
// =============================================================================

/// Trait for chat completion providers.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Blocking completion: the full content arrives at once.
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;

    /// Streamed completion: content arrives as `StreamEvent::Delta` chunks,
    /// terminated by a single `StreamEvent::Done`.
    async fn stream_chat(&self, req: &ChatRequest) -> Result<ChatStream, ProviderError>;
}

// =============================================================================
// OPENROUTER ADAPTER
// =============================================================================

/// Maximum allowed response content length (1MB).
const MAX_RESPONSE_LEN: usize = 1_024 * 1_024;

/// Maximum allowed input characters (~125k tokens).
const MAX_INPUT_CHARS: usize = 500_000;

/// OpenRouter API adapter for chat completions.
#[derive(Debug, Clone)]
pub struct OpenRouterAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl OpenRouterAdapter {
    /// Create from API key.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_config(
            api_key,
            "https://openrouter.ai/api/v1",
            Duration::from_secs(120),
        )
    }

    /// Create from environment variable.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| ProviderError::config("OPENROUTER_API_KEY not set"))?;

        let base_url = std::env::var("OPENROUTER_BASE_URL")
            .unwrap_or_else(|_| "https://openrouter.ai/api/v1".into());

        let timeout = std::env::var("OPENROUTER_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(120));

        Self::with_config(api_key, base_url, timeout)
    }

    /// Create with custom configuration.
    pub fn with_config(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = build_client(&api_key.into(), timeout)?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Extract request ID from response headers.
    fn extract_request_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
        headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }

    fn validate_input(req: &ChatRequest) -> Result<(), ProviderError> {
        let total_chars = req.input_chars();
        if total_chars > MAX_INPUT_CHARS {
            return Err(ProviderError::invalid_request(format!(
                "Input too large: {total_chars} chars (max {MAX_INPUT_CHARS})"
            )));
        }
        Ok(())
    }

    /// Map a non-success HTTP response into a ProviderError, consuming the body.
    async fn error_from_response(response: reqwest::Response) -> ProviderError {
        let status = response.status();
        let request_id = Self::extract_request_id(response.headers());
        let body = response.text().await.unwrap_or_default();

        let ctx = ErrorContext::new().with_status(status.as_u16());
        let ctx = if let Some(id) = &request_id {
            ctx.with_request_id(id)
        } else {
            ctx
        };

        if let Ok(parsed) = serde_json::from_str::<ChatApiResponse>(&body) {
            if let Some(error) = parsed.error {
                let message = error.message.unwrap_or_default();
                let ctx = if let Some(code) = error.code {
                    ctx.with_code(&code)
                } else {
                    ctx
                };

                return match status.as_u16() {
                    429 => ProviderError::rate_limited(Duration::from_secs(60), ctx),
                    _ => ProviderError::provider_with_context(
                        "openrouter",
                        message,
                        status.as_u16() >= 500,
                        ctx,
                    ),
                };
            }
        }

        ProviderError::provider_with_context(
            "openrouter",
            format!("HTTP {}", status.as_u16()),
            status.as_u16() >= 500,
            ctx,
        )
    }
}

fn build_client(api_key: &str, timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let auth_value = HeaderValue::from_str(&format!("Bearer {api_key}"))
        .map_err(|_| ProviderError::config("Invalid API key format"))?;
    headers.insert(AUTHORIZATION, auth_value);

    reqwest::Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .gzip(true)
        .build()
        .map_err(|e| ProviderError::config(format!("Failed to create HTTP client: {e}")))
}

// =============================================================================
// API TYPES
// =============================================================================

#[derive(Serialize)]
struct ChatApiRequest<'a> {
    model: &'a str,
    messages: &'a [ApiMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

impl From<&Message> for ApiMessage {
    fn from(m: &Message) -> Self {
        Self {
            role: match m.role {
                Role::System => "system".to_string(),
                Role::User => "user".to_string(),
                Role::Assistant => "assistant".to_string(),
            },
            content: m.content.clone(),
        }
    }
}

#[derive(Deserialize)]
struct ChatApiResponse {
    choices: Option<Vec<Choice>>,
    usage: Option<Usage>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
    code: Option<String>,
}

/// One SSE frame of a streamed completion.
#[derive(Deserialize)]
struct StreamChunk {
    choices: Option<Vec<StreamChoice>>,
    usage: Option<Usage>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: Option<StreamDelta>,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

// =============================================================================
// CHAT PROVIDER IMPL
// =============================================================================

#[async_trait]
impl ChatProvider for OpenRouterAdapter {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        Self::validate_input(req)?;

        let start = Instant::now();
        let messages: Vec<ApiMessage> = req.messages.iter().map(ApiMessage::from).collect();

        let api_req = ChatApiRequest {
            model: req.model.model_id(),
            messages: &messages,
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            stream: false,
            stream_options: None,
        };

        let response = self
            .client
            .post(self.chat_url())
            .json(&api_req)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let body = response.text().await?;
        let parsed: ChatApiResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::provider("openrouter", format!("Invalid JSON: {e}"), false)
        })?;

        if let Some(error) = parsed.error {
            let message = error.message.unwrap_or_default();
            return Err(ProviderError::provider("openrouter", message, false));
        }

        let choice = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| {
                ProviderError::provider("openrouter", "No choices in response", false)
            })?;

        let mut content = choice
            .message
            .and_then(|m| m.content)
            .unwrap_or_default();
        if content.len() > MAX_RESPONSE_LEN {
            content.truncate(MAX_RESPONSE_LEN);
        }

        let usage = parsed.usage.ok_or_else(|| {
            ProviderError::provider("openrouter", "Missing usage in response", false)
        })?;

        let input_tokens = usage.prompt_tokens.unwrap_or(0);
        let output_tokens = usage.completion_tokens.unwrap_or(0);
        let cost = chat_cost(req.model.model_id(), input_tokens, output_tokens);

        Ok(ChatResponse {
            content,
            input_tokens,
            output_tokens,
            cost_nanodollars: cost,
            latency: start.elapsed(),
            finish_reason: FinishReason::from(choice.finish_reason),
        })
    }

    async fn stream_chat(&self, req: &ChatRequest) -> Result<ChatStream, ProviderError> {
        Self::validate_input(req)?;

        let messages: Vec<ApiMessage> = req.messages.iter().map(ApiMessage::from).collect();

        let api_req = ChatApiRequest {
            model: req.model.model_id(),
            messages: &messages,
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            stream: true,
            stream_options: Some(StreamOptions {
                include_usage: true,
            }),
        };

        let response = self
            .client
            .post(self.chat_url())
            .json(&api_req)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let event_stream = response.bytes_stream().eventsource();

        let out = stream! {
            futures::pin_mut!(event_stream);

            let mut usage = StreamUsage::default();
            let mut emitted = 0usize;
            let mut done = false;

            while let Some(event) = event_stream.next().await {
                match event {
                    Ok(event) => {
                        if event.data == "[DONE]" {
                            done = true;
                            yield Ok(StreamEvent::Done(usage));
                            break;
                        }

                        match serde_json::from_str::<StreamChunk>(&event.data) {
                            Ok(chunk) => {
                                if let Some(error) = chunk.error {
                                    yield Err(ProviderError::stream(
                                        error.message.unwrap_or_default(),
                                    ));
                                    return;
                                }
                                // The usage frame has empty choices and
                                // arrives just before [DONE].
                                if let Some(u) = chunk.usage {
                                    usage.input_tokens = u.prompt_tokens;
                                    usage.output_tokens = u.completion_tokens;
                                }
                                let delta = chunk
                                    .choices
                                    .and_then(|c| c.into_iter().next())
                                    .and_then(|c| c.delta)
                                    .and_then(|d| d.content)
                                    .unwrap_or_default();
                                if !delta.is_empty() {
                                    emitted += delta.len();
                                    if emitted > MAX_RESPONSE_LEN {
                                        yield Err(ProviderError::stream(format!(
                                            "Response too large: {emitted} bytes"
                                        )));
                                        return;
                                    }
                                    yield Ok(StreamEvent::Delta(delta));
                                }
                            }
                            Err(e) => {
                                yield Err(ProviderError::stream(format!(
                                    "Failed to parse SSE event: {e}"
                                )));
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(ProviderError::stream(format!("SSE stream error: {e}")));
                        return;
                    }
                }
            }

            if !done {
                yield Err(ProviderError::stream("stream ended before [DONE]"));
            }
        };

        Ok(Box::pin(out))
    }
}

// =============================================================================
// EMBEDDINGS ADAPTER
// =============================================================================

/// OpenAI-compatible embeddings adapter.
///
/// The router embeds queries through this; it is a separate endpoint (and
/// usually a separate credential) from the chat gateway.
#[derive(Debug, Clone)]
pub struct EmbeddingsAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl EmbeddingsAdapter {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_config(api_key, "https://api.openai.com/v1", Duration::from_secs(30))
    }

    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ProviderError::config("OPENAI_API_KEY not set"))?;
        let base_url = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".into());
        Self::with_config(api_key, base_url, Duration::from_secs(30))
    }

    pub fn with_config(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = build_client(&api_key.into(), timeout)?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub async fn embed(&self, req: &EmbedRequest) -> Result<EmbedResponse, ProviderError> {
        let start = Instant::now();

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&serde_json::json!({
                "model": req.model.as_str(),
                "input": req.texts,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let ctx = ErrorContext::new().with_status(status.as_u16());
            return Err(match status.as_u16() {
                429 => ProviderError::rate_limited(Duration::from_secs(60), ctx),
                _ => ProviderError::provider_with_context(
                    "openai",
                    format!("HTTP {}", status.as_u16()),
                    status.as_u16() >= 500,
                    ctx,
                ),
            });
        }

        let parsed: EmbedApiResponse = response.json().await?;
        let mut rows = parsed.data;
        // The API may return rows out of order; index is authoritative.
        rows.sort_by_key(|d| d.index);
        let embeddings: Vec<Vec<f32>> = rows.into_iter().map(|d| d.embedding).collect();

        if embeddings.len() != req.texts.len() {
            return Err(ProviderError::provider(
                "openai",
                format!(
                    "Expected {} embeddings, got {}",
                    req.texts.len(),
                    embeddings.len()
                ),
                false,
            ));
        }

        let tokens = parsed
            .usage
            .and_then(|u| u.prompt_tokens.or(u.total_tokens))
            .unwrap_or(0);

        Ok(EmbedResponse {
            embeddings,
            tokens,
            cost_nanodollars: embedding_cost(req.model.as_str(), tokens),
            latency: start.elapsed(),
        })
    }
}

#[derive(Deserialize)]
struct EmbedApiResponse {
    data: Vec<EmbedRow>,
    usage: Option<EmbedUsage>,
}

#[derive(Deserialize)]
struct EmbedRow {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct EmbedUsage {
    prompt_tokens: Option<u32>,
    total_tokens: Option<u32>,
}
