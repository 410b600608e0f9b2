use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use lectern::gateway::openrouter::{ChatProvider, OpenRouterAdapter};
use lectern::gateway::{
    Attribution, ChatModel, ChatRequest, FinishReason, Message, NoopUsageSink, ProviderError,
    ProviderGateway, RetryPolicy, StreamEvent,
};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn request(server_model: &str) -> ChatRequest {
    ChatRequest::new(
        ChatModel::new(server_model),
        vec![Message::system("sys"), Message::user("hi")],
        Attribution::new("test"),
    )
}

fn sse_body(frames: &[&str]) -> String {
    let mut body = String::new();
    for frame in frames {
        body.push_str("data: ");
        body.push_str(frame);
        body.push_str("\n\n");
    }
    body
}

#[tokio::test]
async fn stream_yields_deltas_then_done_with_usage() {
    let server = MockServer::start().await;

    let body = sse_body(&[
        r#"{"choices":[{"delta":{"content":"The guest "}}]}"#,
        r#"{"choices":[{"delta":{"content":"recommends sunlight."}}]}"#,
        r#"{"choices":[],"usage":{"prompt_tokens":12,"completion_tokens":4}}"#,
        "[DONE]",
    ]);

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let adapter =
        OpenRouterAdapter::with_config("sk-test", server.uri(), Duration::from_secs(5)).unwrap();

    let mut stream = adapter
        .stream_chat(&request("openai/gpt-3.5-turbo-0125"))
        .await
        .unwrap();

    let mut text = String::new();
    let mut usage = None;
    while let Some(event) = stream.next().await {
        match event.unwrap() {
            StreamEvent::Delta(chunk) => text.push_str(&chunk),
            StreamEvent::Done(u) => usage = Some(u),
        }
    }

    assert_eq!(text, "The guest recommends sunlight.");
    let usage = usage.expect("stream should finish with usage");
    assert_eq!(usage.input_tokens, Some(12));
    assert_eq!(usage.output_tokens, Some(4));
}

#[tokio::test]
async fn stream_without_done_marker_errors() {
    let server = MockServer::start().await;

    let body = sse_body(&[r#"{"choices":[{"delta":{"content":"partial"}}]}"#]);

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let adapter =
        OpenRouterAdapter::with_config("sk-test", server.uri(), Duration::from_secs(5)).unwrap();

    let mut stream = adapter
        .stream_chat(&request("openai/gpt-3.5-turbo-0125"))
        .await
        .unwrap();

    let mut saw_delta = false;
    let mut saw_error = false;
    while let Some(event) = stream.next().await {
        match event {
            Ok(StreamEvent::Delta(_)) => saw_delta = true,
            Ok(StreamEvent::Done(_)) => panic!("no Done expected"),
            Err(err) => {
                assert!(matches!(err, ProviderError::Stream(_)));
                saw_error = true;
            }
        }
    }

    assert!(saw_delta);
    assert!(saw_error);
}

#[tokio::test]
async fn stream_surfaces_inline_error_frames() {
    let server = MockServer::start().await;

    let body = sse_body(&[
        r#"{"choices":[{"delta":{"content":"he"}}]}"#,
        r#"{"error":{"message":"upstream overloaded","code":"overloaded"}}"#,
    ]);

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let adapter =
        OpenRouterAdapter::with_config("sk-test", server.uri(), Duration::from_secs(5)).unwrap();

    let mut stream = adapter
        .stream_chat(&request("openai/gpt-3.5-turbo-0125"))
        .await
        .unwrap();

    let mut last = None;
    while let Some(event) = stream.next().await {
        last = Some(event);
    }

    match last {
        Some(Err(ProviderError::Stream(message))) => {
            assert!(message.contains("upstream overloaded"));
        }
        other => panic!("expected stream error, got {other:?}"),
    }
}

#[tokio::test]
async fn stream_rejects_http_429_before_any_event() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("x-request-id", "abc123")
                .set_body_json(json!({
                    "error": { "message": "rate limited", "code": "rate_limit_exceeded" }
                })),
        )
        .mount(&server)
        .await;

    let adapter =
        OpenRouterAdapter::with_config("sk-test", server.uri(), Duration::from_secs(5)).unwrap();

    let err = adapter
        .stream_chat(&request("openai/gpt-3.5-turbo-0125"))
        .await
        .err()
        .unwrap();

    match err {
        ProviderError::RateLimited { context, .. } => {
            let ctx = context.expect("expected error context");
            assert_eq!(ctx.http_status, Some(429));
            assert_eq!(ctx.provider_code.as_deref(), Some("rate_limit_exceeded"));
            assert_eq!(ctx.request_id.as_deref(), Some("abc123"));
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }
}

#[tokio::test]
async fn blocking_chat_parses_content_usage_and_cost() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": { "content": "hello" },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 20 }
        })))
        .mount(&server)
        .await;

    let adapter =
        OpenRouterAdapter::with_config("sk-test", server.uri(), Duration::from_secs(5)).unwrap();

    let resp = adapter
        .chat(&request("anthropic/claude-3-haiku"))
        .await
        .unwrap();
    assert_eq!(resp.content, "hello");
    assert_eq!(resp.finish_reason, FinishReason::Stop);
    assert_eq!(resp.input_tokens, 10);
    assert_eq!(resp.output_tokens, 20);
    assert_eq!(
        resp.cost_nanodollars,
        lectern::gateway::chat_cost("anthropic/claude-3-haiku", 10, 20)
    );
}

#[derive(Clone)]
struct FlipResponder {
    calls: Arc<AtomicUsize>,
    first: ResponseTemplate,
    second: ResponseTemplate,
}

impl Respond for FlipResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n == 0 {
            self.first.clone()
        } else {
            self.second.clone()
        }
    }
}

#[tokio::test]
async fn gateway_retries_stream_establishment_on_retryable_errors() {
    let server = MockServer::start().await;

    let first = ResponseTemplate::new(500).set_body_json(json!({
        "error": { "message": "transient error", "code": "internal" }
    }));
    let second = ResponseTemplate::new(200).set_body_raw(
        sse_body(&[
            r#"{"choices":[{"delta":{"content":"ok"}}]}"#,
            r#"{"choices":[],"usage":{"prompt_tokens":1,"completion_tokens":1}}"#,
            "[DONE]",
        ]),
        "text/event-stream",
    );

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(FlipResponder {
            calls: Arc::new(AtomicUsize::new(0)),
            first,
            second,
        })
        .mount(&server)
        .await;

    let adapter =
        OpenRouterAdapter::with_config("sk-test", server.uri(), Duration::from_secs(5)).unwrap();
    let gateway = ProviderGateway::with_config(
        adapter,
        Arc::new(NoopUsageSink),
        RetryPolicy {
            max_retries: 1,
            base_delay: Duration::from_millis(0),
        },
    );

    let mut stream = gateway
        .stream_chat(request("openai/gpt-3.5-turbo-0125"))
        .await
        .unwrap();

    let mut text = String::new();
    while let Some(event) = stream.next().await {
        if let StreamEvent::Delta(chunk) = event.unwrap() {
            text.push_str(&chunk);
        }
    }
    assert_eq!(text, "ok");

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 2);
}

#[tokio::test]
async fn invalid_request_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "message": "bad request", "code": "invalid" }
        })))
        .mount(&server)
        .await;

    let adapter =
        OpenRouterAdapter::with_config("sk-test", server.uri(), Duration::from_secs(5)).unwrap();
    let gateway = ProviderGateway::with_config(
        adapter,
        Arc::new(NoopUsageSink),
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(0),
        },
    );

    let err = gateway
        .chat(request("openai/gpt-3.5-turbo-0125"))
        .await
        .unwrap_err();
    assert!(!err.is_retryable());

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
}
