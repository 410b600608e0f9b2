//! Dual-model generation: a streamed answer from the reader model, then an
//! independent streamed critique of (prompt, answer) from the responder
//! model.
//!
//! Streaming and buffering happen together: each chunk is pushed to the
//! observer for live rendering while it accumulates into the final string,
//! which resolves only when the stream completes. Dropping the stream
//! mid-flight aborts the request, discards the partial buffer, and credits
//! no cost.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;

use crate::gateway::{
    chat_cost, Attribution, ChatGateway, ChatModel, ChatRequest, Message, ProviderCallRecord,
    ProviderError, StreamEvent, UsageSink,
};
use crate::prompts::{build_critique_prompt, CRITIQUE_SYSTEM_MESSAGE};
use crate::tokens::TokenEstimator;

/// Receives content chunks as they arrive from the model backend.
pub trait ChunkObserver: Send {
    fn on_chunk(&mut self, chunk: &str);
}

/// Observer that discards chunks (headless runs, tests).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopChunkObserver;

impl ChunkObserver for NoopChunkObserver {
    fn on_chunk(&mut self, _chunk: &str) {}
}

/// Sampling parameters shared by both calls of a generation pair.
#[derive(Debug, Clone, Copy)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.5,
            max_tokens: 250,
        }
    }
}

/// A fully buffered streamed completion with its accounted cost.
#[derive(Debug, Clone)]
pub struct CompletedGeneration {
    pub model: ChatModel,
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_nanodollars: i64,
    pub latency: Duration,
}

/// Outcome of the critique call. A failed critique is non-fatal: the answer
/// and its cost stand, and the failure is surfaced as a degraded result.
#[derive(Debug, Clone)]
pub enum CritiqueOutcome {
    Completed(CompletedGeneration),
    Failed { error: String },
}

impl CritiqueOutcome {
    pub fn cost_nanodollars(&self) -> i64 {
        match self {
            CritiqueOutcome::Completed(gen) => gen.cost_nanodollars,
            CritiqueOutcome::Failed { .. } => 0,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, CritiqueOutcome::Failed { .. })
    }
}

/// Streams completions from the chosen models and accounts their cost.
pub struct DualGenerator {
    gateway: Arc<dyn ChatGateway>,
    usage_sink: Arc<dyn UsageSink>,
    estimator: Arc<dyn TokenEstimator>,
}

impl DualGenerator {
    pub fn new(
        gateway: Arc<dyn ChatGateway>,
        usage_sink: Arc<dyn UsageSink>,
        estimator: Arc<dyn TokenEstimator>,
    ) -> Self {
        Self {
            gateway,
            usage_sink,
            estimator,
        }
    }

    /// Stream the primary answer. A failure here aborts the whole query:
    /// no critique is attempted and no cost is recorded.
    pub async fn answer(
        &self,
        model: &ChatModel,
        prompt: &str,
        system_message: &str,
        params: GenerationParams,
        attribution: Attribution,
        observer: &mut dyn ChunkObserver,
    ) -> Result<CompletedGeneration, ProviderError> {
        let messages = vec![Message::system(system_message), Message::user(prompt)];
        self.stream_and_buffer(model, messages, params, attribution, observer)
            .await
    }

    /// Stream the critique of (original prompt, answer) from the responder
    /// model, in the requested tone.
    pub async fn critique(
        &self,
        model: &ChatModel,
        tone: &str,
        original_prompt: &str,
        answer: &str,
        params: GenerationParams,
        attribution: Attribution,
        observer: &mut dyn ChunkObserver,
    ) -> Result<CompletedGeneration, ProviderError> {
        let prompt = build_critique_prompt(tone, original_prompt, answer);
        let messages = vec![
            Message::system(CRITIQUE_SYSTEM_MESSAGE),
            Message::user(prompt),
        ];
        self.stream_and_buffer(model, messages, params, attribution, observer)
            .await
    }

    async fn stream_and_buffer(
        &self,
        model: &ChatModel,
        messages: Vec<Message>,
        params: GenerationParams,
        attribution: Attribution,
        observer: &mut dyn ChunkObserver,
    ) -> Result<CompletedGeneration, ProviderError> {
        let start = Instant::now();
        let caller = attribution.caller;
        let session_id = attribution.session_id;
        let query_id = attribution.query_id;

        // Local estimate for providers that don't report streamed usage.
        let prompt_tokens: usize = messages
            .iter()
            .map(|m| self.estimator.count(&m.content))
            .sum();

        let req = ChatRequest::new(model.clone(), messages, attribution)
            .temperature(params.temperature)
            .max_tokens(params.max_tokens);

        let mut stream = match self.gateway.stream_chat(req).await {
            Ok(stream) => stream,
            Err(err) => {
                self.record_failure(model, caller, session_id, query_id, &err)
                    .await;
                return Err(err);
            }
        };

        let mut buffer = String::new();
        let mut usage = None;

        loop {
            match stream.next().await {
                Some(Ok(StreamEvent::Delta(chunk))) => {
                    observer.on_chunk(&chunk);
                    buffer.push_str(&chunk);
                }
                Some(Ok(StreamEvent::Done(reported))) => {
                    usage = Some(reported);
                    break;
                }
                Some(Err(err)) => {
                    self.record_failure(model, caller, session_id, query_id, &err)
                        .await;
                    return Err(err);
                }
                None => {
                    let err = ProviderError::stream("stream ended without terminal event");
                    self.record_failure(model, caller, session_id, query_id, &err)
                        .await;
                    return Err(err);
                }
            }
        }

        let usage = usage.unwrap_or_default();
        let input_tokens = usage
            .input_tokens
            .unwrap_or(prompt_tokens as u32);
        let output_tokens = usage
            .output_tokens
            .unwrap_or(self.estimator.count(&buffer) as u32);
        let cost = chat_cost(model.model_id(), input_tokens, output_tokens);
        let latency = start.elapsed();

        self.usage_sink
            .record(
                ProviderCallRecord::new("openrouter", "chat/completions", model.model_id(), caller)
                    .tokens(input_tokens as i32, output_tokens as i32)
                    .cost(cost)
                    .session(session_id)
                    .query(query_id)
                    .latency(latency.as_millis() as i32),
            )
            .await;

        Ok(CompletedGeneration {
            model: model.clone(),
            text: buffer,
            input_tokens,
            output_tokens,
            cost_nanodollars: cost,
            latency,
        })
    }

    async fn record_failure(
        &self,
        model: &ChatModel,
        caller: &'static str,
        session_id: Option<uuid::Uuid>,
        query_id: Option<uuid::Uuid>,
        err: &ProviderError,
    ) {
        self.usage_sink
            .record(
                ProviderCallRecord::new("openrouter", "chat/completions", model.model_id(), caller)
                    .session(session_id)
                    .query(query_id)
                    .error(err.code()),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{ChatResponse, ChatStream, NoopUsageSink, StreamUsage};
    use async_trait::async_trait;

    /// Estimator where every whitespace-separated word costs one token.
    struct WordCounter;

    impl TokenEstimator for WordCounter {
        fn count(&self, text: &str) -> usize {
            text.split_whitespace().count()
        }
    }

    struct ScriptedGateway {
        events: Vec<Result<StreamEvent, ProviderError>>,
    }

    #[async_trait]
    impl ChatGateway for ScriptedGateway {
        async fn chat(&self, _req: ChatRequest) -> Result<ChatResponse, ProviderError> {
            unimplemented!("tests stream only")
        }

        async fn stream_chat(&self, _req: ChatRequest) -> Result<ChatStream, ProviderError> {
            let events: Vec<_> = self
                .events
                .iter()
                .map(|e| match e {
                    Ok(ev) => Ok(ev.clone()),
                    Err(err) => Err(ProviderError::stream(err.to_string())),
                })
                .collect();
            Ok(Box::pin(futures::stream::iter(events)))
        }
    }

    struct Recorder(Vec<String>);

    impl ChunkObserver for Recorder {
        fn on_chunk(&mut self, chunk: &str) {
            self.0.push(chunk.to_string());
        }
    }

    fn generator(events: Vec<Result<StreamEvent, ProviderError>>) -> DualGenerator {
        DualGenerator::new(
            Arc::new(ScriptedGateway { events }),
            Arc::new(NoopUsageSink),
            Arc::new(WordCounter),
        )
    }

    #[tokio::test]
    async fn chunks_are_observed_and_buffered() {
        let gen = generator(vec![
            Ok(StreamEvent::Delta("The guest ".into())),
            Ok(StreamEvent::Delta("recommends sunlight.".into())),
            Ok(StreamEvent::Done(StreamUsage::default())),
        ]);

        let mut observer = Recorder(Vec::new());
        let result = gen
            .answer(
                &ChatModel::new("openai/gpt-3.5-turbo-0125"),
                "prompt words here",
                "system words",
                GenerationParams::default(),
                Attribution::new("test"),
                &mut observer,
            )
            .await
            .unwrap();

        assert_eq!(result.text, "The guest recommends sunlight.");
        assert_eq!(observer.0, vec!["The guest ", "recommends sunlight."]);
        // Local estimate: 5 prompt words (system + user), 4 completion words.
        assert_eq!(result.input_tokens, 5);
        assert_eq!(result.output_tokens, 4);
        assert_eq!(result.cost_nanodollars, chat_cost("openai/gpt-3.5-turbo-0125", 5, 4));
    }

    #[tokio::test]
    async fn provider_usage_overrides_local_estimate() {
        let gen = generator(vec![
            Ok(StreamEvent::Delta("hi".into())),
            Ok(StreamEvent::Done(StreamUsage {
                input_tokens: Some(100),
                output_tokens: Some(10),
            })),
        ]);

        let result = gen
            .answer(
                &ChatModel::new("anthropic/claude-3-haiku"),
                "p",
                "s",
                GenerationParams::default(),
                Attribution::new("test"),
                &mut NoopChunkObserver,
            )
            .await
            .unwrap();

        assert_eq!(result.input_tokens, 100);
        assert_eq!(result.output_tokens, 10);
        assert_eq!(result.cost_nanodollars, chat_cost("anthropic/claude-3-haiku", 100, 10));
    }

    #[tokio::test]
    async fn mid_stream_error_fails_the_call() {
        let gen = generator(vec![
            Ok(StreamEvent::Delta("partial".into())),
            Err(ProviderError::stream("connection reset")),
        ]);

        let err = gen
            .answer(
                &ChatModel::new("openai/gpt-3.5-turbo-0125"),
                "p",
                "s",
                GenerationParams::default(),
                Attribution::new("test"),
                &mut NoopChunkObserver,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Stream(_)));
    }

    #[tokio::test]
    async fn truncated_stream_fails_the_call() {
        let gen = generator(vec![Ok(StreamEvent::Delta("partial".into()))]);

        let err = gen
            .answer(
                &ChatModel::new("openai/gpt-3.5-turbo-0125"),
                "p",
                "s",
                GenerationParams::default(),
                Attribution::new("test"),
                &mut NoopChunkObserver,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Stream(_)));
    }

    #[tokio::test]
    async fn critique_prompt_embeds_answer() {
        // The scripted gateway ignores the request, so this just exercises
        // the critique path end to end.
        let gen = generator(vec![
            Ok(StreamEvent::Delta("solid answer".into())),
            Ok(StreamEvent::Done(StreamUsage::default())),
        ]);

        let result = gen
            .critique(
                &ChatModel::new("cohere/command-r"),
                "dry and academic",
                "original prompt",
                "original answer",
                GenerationParams::default(),
                Attribution::new("test"),
                &mut NoopChunkObserver,
            )
            .await
            .unwrap();

        assert_eq!(result.text, "solid answer");
        assert!(result.cost_nanodollars > 0);
    }
}
