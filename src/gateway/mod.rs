//! Provider gateway for chat completions (blocking and streamed) and
//! embeddings.
//!
//! `ProviderGateway` wraps the OpenRouter adapter with a bounded retry policy
//! and usage recording. Blocking calls record usage here; streamed calls are
//! recorded by the consumer once the stream has been collected, since only
//! the collector knows the final token counts.

pub mod error;
pub mod openrouter;
pub mod pricing;
pub mod types;
pub mod usage;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use openrouter::{ChatProvider, OpenRouterAdapter};
use usage::UsageSink as UsageSinkTrait;

pub use error::{ErrorContext, ProviderError};
pub use openrouter::EmbeddingsAdapter;
pub use pricing::*;
pub use types::*;
pub use usage::{CallStatus, NoopUsageSink, ProviderCallRecord, StderrUsageSink, UsageSink};

#[async_trait::async_trait]
pub trait ChatGateway: Send + Sync {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError>;

    /// Open a streamed completion. Retry applies to establishing the stream
    /// only; a broken stream surfaces as an error item to the consumer.
    async fn stream_chat(&self, req: ChatRequest) -> Result<ChatStream, ProviderError>;
}

/// Bounded retry policy with exponential backoff, shared by the gateway and
/// the retrieval/rerank adapters.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_millis(0),
        }
    }

    /// Delay before the retry following `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = 2u64.pow(attempt.min(5));
        self.base_delay * multiplier as u32
    }
}

pub struct ProviderGateway<U: UsageSinkTrait> {
    openrouter: OpenRouterAdapter,
    usage_sink: Arc<U>,
    retry: RetryPolicy,
}

#[async_trait::async_trait]
impl<U: UsageSinkTrait> ChatGateway for ProviderGateway<U> {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        ProviderGateway::chat(self, req).await
    }

    async fn stream_chat(&self, req: ChatRequest) -> Result<ChatStream, ProviderError> {
        ProviderGateway::stream_chat(self, req).await
    }
}

impl<U: UsageSinkTrait> ProviderGateway<U> {
    pub fn from_env(usage_sink: Arc<U>) -> Result<Self, ProviderError> {
        let openrouter = OpenRouterAdapter::from_env()?;
        Ok(Self {
            openrouter,
            usage_sink,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_config(
        openrouter: OpenRouterAdapter,
        usage_sink: Arc<U>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            openrouter,
            usage_sink,
            retry,
        }
    }

    pub async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let mut last_error: Option<ProviderError> = None;

        for attempt in 0..=self.retry.max_retries {
            match self.openrouter.chat(&req).await {
                Ok(resp) => {
                    self.record_usage(&req, &resp, CallStatus::Success, None)
                        .await;
                    return Ok(resp);
                }
                Err(err) => {
                    let code = err.code().to_string();
                    self.record_usage(&req, &ChatResponse::empty(), CallStatus::Error, Some(code))
                        .await;

                    if !err.is_retryable() || attempt == self.retry.max_retries {
                        return Err(err);
                    }

                    let delay = self.retry.delay_for(attempt);
                    last_error = Some(err);
                    sleep(delay).await;
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| ProviderError::provider("openrouter", "unknown error", false)))
    }

    pub async fn stream_chat(&self, req: ChatRequest) -> Result<ChatStream, ProviderError> {
        let mut last_error: Option<ProviderError> = None;

        for attempt in 0..=self.retry.max_retries {
            match self.openrouter.stream_chat(&req).await {
                Ok(stream) => return Ok(stream),
                Err(err) => {
                    if !err.is_retryable() || attempt == self.retry.max_retries {
                        return Err(err);
                    }
                    let delay = self.retry.delay_for(attempt);
                    last_error = Some(err);
                    sleep(delay).await;
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| ProviderError::provider("openrouter", "unknown error", false)))
    }

    async fn record_usage(
        &self,
        req: &ChatRequest,
        resp: &ChatResponse,
        status: CallStatus,
        error_code: Option<String>,
    ) {
        let record = ProviderCallRecord::new(
            "openrouter",
            "chat/completions",
            req.model.model_id(),
            req.attribution.caller,
        )
        .tokens(resp.input_tokens as i32, resp.output_tokens as i32)
        .cost(resp.cost_nanodollars)
        .session(req.attribution.session_id)
        .query(req.attribution.query_id)
        .latency(resp.latency.as_millis() as i32);

        let record = if status == CallStatus::Error {
            record.error(error_code.unwrap_or_else(|| "provider_error".to_string()))
        } else {
            record
        };

        self.usage_sink.record(record).await;
    }
}
