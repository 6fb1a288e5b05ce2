//! Mock API tests for the OpenAI-compatible backend client.

use reasoning_relay::backend::{BackendReply, ChatBackend, OpenAiCompatBackend};
use reasoning_relay::config::BackendConfig;
use reasoning_relay::error::RelayError;
use reasoning_relay::types::{ChatCompletionRequest, ChatMessage, FinishReason};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn backend(server: &MockServer) -> OpenAiCompatBackend {
    let config = BackendConfig::new(format!("{}/v1/chat/completions", server.uri()))
        .with_api_key("test-api-key");
    OpenAiCompatBackend::new(config).unwrap()
}

fn request() -> ChatCompletionRequest {
    ChatCompletionRequest::new("deepseek-reasoner", vec![ChatMessage::user("Hello")])
}

#[tokio::test]
async fn complete_reply_keeps_reasoning_and_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer test-api-key"))
        .and(body_partial_json(json!({"model": "deepseek-reasoner", "stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "created": 1677652288,
            "model": "deepseek-reasoner",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "Hi there",
                    "reasoning_content": "greet back"
                },
                "finish_reason": "stop"
            }],
            "usage": {
                "prompt_tokens": 9,
                "completion_tokens": 12,
                "total_tokens": 21,
                "prompt_cache_hit_tokens": 0,
                "prompt_cache_miss_tokens": 9
            }
        })))
        .mount(&server)
        .await;

    let reply = backend(&server).send(request()).await.unwrap();
    assert!(matches!(reply, BackendReply::Complete(_)));
    let logical = reply.into_logical().await.unwrap();
    assert_eq!(logical.message.content_text(), "Hi there");
    assert_eq!(logical.message.reasoning_text(), "greet back");
    assert_eq!(logical.finish_reason, Some(FinishReason::Stop));
    let usage = logical.usage.unwrap();
    assert_eq!(usage.total_tokens, 21);
    assert_eq!(usage.prompt_cache_miss_tokens, Some(9));
}

#[tokio::test]
async fn event_stream_reply_is_reassembled() {
    let server = MockServer::start().await;
    let body = [
        r#"{"id":"chatcmpl-1","object":"chat.completion.chunk","created":1,"model":"deepseek-reasoner","choices":[{"index":0,"delta":{"role":"assistant","reasoning_content":"look up "},"finish_reason":null}]}"#,
        r#"{"id":"chatcmpl-1","object":"chat.completion.chunk","created":1,"model":"deepseek-reasoner","choices":[{"index":0,"delta":{"reasoning_content":"the date"},"finish_reason":null}]}"#,
        r#"{"id":"chatcmpl-1","object":"chat.completion.chunk","created":1,"model":"deepseek-reasoner","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"time_get_date","arguments":""}}]},"finish_reason":null}]}"#,
        r#"{"id":"chatcmpl-1","object":"chat.completion.chunk","created":1,"model":"deepseek-reasoner","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"tz\":"}}]},"finish_reason":null}]}"#,
        r#"{"id":"chatcmpl-1","object":"chat.completion.chunk","created":1,"model":"deepseek-reasoner","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"UTC\"}"}}]},"finish_reason":null}]}"#,
        r#"{"id":"chatcmpl-1","object":"chat.completion.chunk","created":1,"model":"deepseek-reasoner","choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}"#,
        r#"{"id":"chatcmpl-1","object":"chat.completion.chunk","created":1,"model":"deepseek-reasoner","choices":[],"usage":{"prompt_tokens":5,"completion_tokens":7,"total_tokens":12}}"#,
        "[DONE]",
    ]
    .iter()
    .map(|data| format!("data: {data}\n\n"))
    .collect::<String>();

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Accept", "text/event-stream"))
        .and(body_partial_json(json!({"stream": true, "stream_options": {"include_usage": true}})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let reply = backend(&server).send(request().with_stream(true)).await.unwrap();
    assert!(matches!(reply, BackendReply::Stream(_)));
    let logical = reply.into_logical().await.unwrap();
    assert_eq!(logical.message.reasoning_text(), "look up the date");
    assert_eq!(logical.finish_reason, Some(FinishReason::ToolCalls));
    let calls = &logical.message.tool_calls;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].id, "call_1");
    assert_eq!(calls[0].function.name, "time_get_date");
    assert_eq!(calls[0].function.arguments, r#"{"tz":"UTC"}"#);
    assert_eq!(logical.usage.map(|u| u.total_tokens), Some(12));
}

#[tokio::test]
async fn stream_without_finish_reason_is_truncated() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"id\":\"c\",\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"par\"}}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let reply = backend(&server).send(request().with_stream(true)).await.unwrap();
    let err = reply.into_logical().await.unwrap_err();
    assert!(matches!(err, RelayError::StreamTruncated(_)));
}

#[tokio::test]
async fn error_status_keeps_backend_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(402).set_body_json(json!({
            "error": {
                "message": "Insufficient Balance",
                "type": "unknown_error",
                "param": null,
                "code": "invalid_request_error"
            }
        })))
        .mount(&server)
        .await;

    let err = backend(&server).send(request()).await.unwrap_err();
    match err {
        RelayError::ApiError { code, message, .. } => {
            assert_eq!(code, 402);
            assert_eq!(message, "Insufficient Balance");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn models_are_listed_from_the_derived_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [{"id": "deepseek-reasoner", "object": "model", "owned_by": "deepseek"}]
        })))
        .mount(&server)
        .await;

    let models = backend(&server).list_models().await.unwrap();
    assert_eq!(models["data"][0]["id"], "deepseek-reasoner");
}
