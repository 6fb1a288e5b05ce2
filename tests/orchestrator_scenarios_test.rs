//! End-to-end turns through the tool loop with a scripted backend and in-memory tools.

mod support;

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reasoning_relay::error::RelayError;
use reasoning_relay::orchestrator::{StopReason, TurnEvent, TurnOptions, run_turn, run_turn_stream};
use reasoning_relay::types::{
    ChatCompletionRequest, ChatMessage, FinishReason, MessageRole, ToolDefinition, Usage,
    flattened_tool_calls_json,
};
use serde_json::{Value, json};
use support::*;
use tokio_test::assert_ok;

fn weather_request() -> ChatCompletionRequest {
    ChatCompletionRequest::new(MODEL, vec![ChatMessage::user("weather tomorrow in city Z")])
}

#[tokio::test]
async fn three_sub_turns_collapse_into_one_assistant_message() {
    let get_date = call("call_date", 0, "get_date", "{}");
    let get_weather = call("call_weather", 0, "get_weather", r#"{"city":"Z","date":"2026-10-20"}"#);
    let backend = ScriptedBackend::new(vec![
        completion("need today's date", None, vec![get_date.clone()], Some(Usage::new(10, 5))),
        completion("now resolve weather", None, vec![get_weather.clone()], Some(Usage::new(20, 5))),
        completion("compose the answer", Some("Sunny, 21C"), vec![], Some(Usage::new(30, 5))),
    ]);
    let tools = Arc::new(
        FakeTools::new()
            .with_text("get_date", "2026-10-20")
            .with_text("get_weather", "sunny, 21C"),
    );

    let outcome = assert_ok!(
        run_turn(backend.clone(), tools.clone(), weather_request(), TurnOptions::default()).await
    );

    assert_eq!(outcome.history.len(), 2);
    assert_eq!(outcome.history[0].role, MessageRole::User);
    assert_eq!(outcome.history[1], outcome.message);
    assert!(outcome.history.iter().all(|m| m.role != MessageRole::Tool));

    assert_eq!(outcome.message.content_text(), "Sunny, 21C");
    assert!(outcome.message.tool_calls.is_empty());
    let expected = [
        "need today's date".to_string(),
        flattened_tool_calls_json(&[get_date]),
        "now resolve weather".to_string(),
        flattened_tool_calls_json(&[get_weather]),
        "compose the answer".to_string(),
    ]
    .join("\n\n");
    assert_eq!(outcome.message.reasoning_text(), expected);

    assert_eq!(outcome.finish_reason, FinishReason::Stop);
    assert_eq!(outcome.stop_reason, StopReason::Completed);
    assert_eq!(outcome.iterations, 3);
    assert_eq!(outcome.usage.as_ref().map(|u| u.total_tokens), Some(75));
    assert_eq!(
        tools.calls(),
        vec![
            ("get_date".to_string(), "{}".to_string()),
            ("get_weather".to_string(), r#"{"city":"Z","date":"2026-10-20"}"#.to_string()),
        ]
    );

    let requests = backend.requests();
    assert_eq!(requests.len(), 3);
    let advertised: Vec<_> = requests[0].tools.iter().map(|t| t.name().to_string()).collect();
    assert_eq!(advertised, vec!["get_date", "get_weather"]);

    // Second request: user, the open anchor, and the tool result answering it.
    let second = &requests[1].messages;
    assert_eq!(second.len(), 3);
    assert_eq!(second[1].tool_calls[0].id, "call_date");
    assert_eq!(second[2].role, MessageRole::Tool);
    assert_eq!(second[2].tool_call_id.as_deref(), Some("call_date"));
    assert_eq!(second[2].content_text(), "2026-10-20");

    // Third request: the previous tool result is folded into the anchor's reasoning.
    let third = &requests[2].messages;
    assert_eq!(third.len(), 3);
    assert!(third[1].reasoning_text().contains(r#""name":"get_date""#));
    assert_eq!(third[1].tool_calls[0].id, "call_weather");
    assert_eq!(third[2].tool_call_id.as_deref(), Some("call_weather"));
}

#[tokio::test]
async fn tool_timeout_is_reported_to_the_model() {
    let lookup = call("call_1", 0, "get_weather", r#"{"city":"Z"}"#);
    let backend = ScriptedBackend::new(vec![
        completion("look it up", None, vec![lookup], None),
        completion("service is slow", Some("The weather service timed out."), vec![], None),
    ]);
    let tools = Arc::new(FakeTools::new().with_tool(
        "get_weather",
        Duration::ZERO,
        FakeReply::Timeout,
    ));

    let outcome = assert_ok!(
        run_turn(backend.clone(), tools, weather_request(), TurnOptions::default()).await
    );
    assert_eq!(outcome.stop_reason, StopReason::Completed);
    assert_eq!(outcome.message.content_text(), "The weather service timed out.");

    let requests = backend.requests();
    let tool_message = &requests[1].messages[2];
    assert_eq!(tool_message.role, MessageRole::Tool);
    let payload: Value = serde_json::from_str(tool_message.content_text()).unwrap();
    assert_eq!(payload["error"], "tool_timeout");
    assert!(payload["message"].as_str().unwrap().contains("get_weather"));
}

#[tokio::test]
async fn tool_results_follow_call_order() {
    let calls = vec![
        call("call_a", 0, "slow", "{}"),
        call("call_b", 1, "medium", "{}"),
        call("call_c", 2, "fast", "{}"),
    ];
    let backend = ScriptedBackend::new(vec![
        completion("fan out", None, calls, None),
        completion("", Some("done"), vec![], None),
    ]);
    let tools = Arc::new(
        FakeTools::new()
            .with_tool("slow", Duration::from_millis(90), FakeReply::Text("a".into()))
            .with_tool("medium", Duration::from_millis(50), FakeReply::Text("b".into()))
            .with_tool("fast", Duration::from_millis(10), FakeReply::Text("c".into())),
    );

    assert_ok!(run_turn(backend.clone(), tools, weather_request(), TurnOptions::default()).await);

    let requests = backend.requests();
    let results: Vec<_> = requests[1].messages[2..]
        .iter()
        .map(|m| (m.tool_call_id.clone().unwrap(), m.content_text().to_string()))
        .collect();
    assert_eq!(
        results,
        vec![
            ("call_a".to_string(), "a".to_string()),
            ("call_b".to_string(), "b".to_string()),
            ("call_c".to_string(), "c".to_string()),
        ]
    );
}

#[tokio::test]
async fn iteration_ceiling_returns_the_partial_turn() {
    let backend = ScriptedBackend::new(vec![
        completion("first", None, vec![call("call_1", 0, "get_date", "{}")], None),
        completion("second", None, vec![call("call_2", 0, "get_date", "{}")], None),
        completion("never sent", Some("unreachable"), vec![], None),
    ]);
    let tools = Arc::new(FakeTools::new().with_text("get_date", "2026-10-20"));

    let outcome = assert_ok!(
        run_turn(
            backend.clone(),
            tools.clone(),
            weather_request(),
            TurnOptions::default().with_max_iterations(2),
        )
        .await
    );

    assert_eq!(backend.requests().len(), 2);
    assert_eq!(tools.calls().len(), 1);
    assert_eq!(outcome.finish_reason, FinishReason::Length);
    assert_eq!(outcome.stop_reason, StopReason::MaxIterations);
    assert_eq!(outcome.iterations, 2);
    assert_eq!(
        outcome.max_iterations_error(),
        Some(RelayError::MaxIterationsExceeded(2))
    );
    assert_eq!(outcome.message.tool_calls[0].id, "call_2");
    assert!(outcome.message.reasoning_text().starts_with("first\n\n"));
}

#[tokio::test]
async fn client_tools_end_the_turn_without_execution() {
    let backend = ScriptedBackend::new(vec![completion(
        "the client can look this up",
        None,
        vec![
            call("call_1", 0, "get_date", "{}"),
            call("call_2", 1, "client_lookup", r#"{"q":"z"}"#),
        ],
        None,
    )]);
    let tools = Arc::new(FakeTools::new().with_text("get_date", "2026-10-20"));
    let request = weather_request().with_tools(vec![ToolDefinition::function(
        "client_lookup",
        "client side",
        json!({"type": "object"}),
    )]);

    let outcome = assert_ok!(
        run_turn(backend.clone(), tools.clone(), request, TurnOptions::default()).await
    );

    assert!(tools.calls().is_empty());
    assert_eq!(outcome.finish_reason, FinishReason::ToolCalls);
    assert_eq!(outcome.stop_reason, StopReason::ClientToolCalls);
    assert_eq!(outcome.message.tool_calls.len(), 2);
    let advertised: Vec<_> = backend.requests()[0]
        .tools
        .iter()
        .map(|t| t.name().to_string())
        .collect();
    assert_eq!(advertised, vec!["client_lookup", "get_date"]);
}

#[tokio::test]
async fn disabled_auto_execution_returns_registry_calls() {
    let backend = ScriptedBackend::new(vec![completion(
        "",
        None,
        vec![call("call_1", 0, "get_date", "{}")],
        None,
    )]);
    let tools = Arc::new(FakeTools::new().with_text("get_date", "2026-10-20"));

    let outcome = assert_ok!(
        run_turn(
            backend,
            tools.clone(),
            weather_request(),
            TurnOptions::default().with_auto_execute(false),
        )
        .await
    );
    assert!(tools.calls().is_empty());
    assert_eq!(outcome.stop_reason, StopReason::ClientToolCalls);
    assert_eq!(outcome.message.tool_calls[0].function.name, "get_date");
}

#[tokio::test]
async fn backend_errors_abort_the_turn() {
    let backend = ScriptedBackend::new(vec![Scripted::Fail(RelayError::api_error(
        402,
        "Insufficient Balance",
    ))]);
    let err = run_turn(backend, Arc::new(FakeTools::new()), weather_request(), TurnOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err, RelayError::api_error(402, "Insufficient Balance"));
}

#[tokio::test]
async fn truncated_stream_fails_the_turn() {
    let backend = ScriptedBackend::new(vec![Scripted::Chunks(vec![
        reasoning_chunk("thinking"),
        content_chunk("partial"),
    ])]);
    let err = run_turn(
        backend,
        Arc::new(FakeTools::new()),
        weather_request(),
        TurnOptions::default().with_stream(true),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, RelayError::StreamTruncated(_)));
}

#[tokio::test]
async fn streamed_reasoning_matches_the_final_anchor() {
    let backend = ScriptedBackend::new(vec![
        Scripted::Chunks(vec![
            reasoning_chunk("need "),
            reasoning_chunk("the date"),
            tool_call_chunk(0, Some("call_date"), Some("get_date"), ""),
            tool_call_chunk(0, None, None, "{}"),
            finish_chunk(FinishReason::ToolCalls),
            usage_chunk(10, 4),
        ]),
        Scripted::Chunks(vec![
            reasoning_chunk("now answer"),
            content_chunk("Sunny"),
            content_chunk(", 21C"),
            finish_chunk(FinishReason::Stop),
            usage_chunk(20, 6),
        ]),
    ]);
    let tools = Arc::new(FakeTools::new().with_text("get_date", "2026-10-20"));

    let events: Vec<TurnEvent> = run_turn_stream(backend.clone(), tools, weather_request(), TurnOptions::default())
        .map(|item| item.unwrap())
        .collect()
        .await;

    let reasoning: String = events
        .iter()
        .filter_map(|e| match e {
            TurnEvent::ReasoningDelta(text) => Some(text.as_str()),
            _ => None,
        })
        .collect();
    let content: String = events
        .iter()
        .filter_map(|e| match e {
            TurnEvent::ContentDelta(text) => Some(text.as_str()),
            _ => None,
        })
        .collect();
    let tool_results: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            TurnEvent::ToolResult { call_id, content, is_error, .. } => {
                Some((call_id.as_str(), content.as_str(), *is_error))
            }
            _ => None,
        })
        .collect();

    let Some(TurnEvent::Finished(outcome)) = events.last() else {
        panic!("stream did not end with Finished: {events:?}");
    };
    assert_eq!(reasoning, outcome.message.reasoning_text());
    assert!(reasoning.starts_with("need the date\n\n{\"tool_calls\""));
    assert_eq!(content, "Sunny, 21C");
    assert_eq!(outcome.message.content_text(), "Sunny, 21C");
    assert_eq!(tool_results, vec![("call_date", "2026-10-20", false)]);
    assert_eq!(outcome.usage.as_ref().map(|u| u.total_tokens), Some(40));

    assert!(backend.requests().iter().all(|r| r.stream));
}

#[tokio::test]
async fn dropping_the_stream_cancels_in_flight_tools() {
    let backend = ScriptedBackend::new(vec![
        completion("", None, vec![call("call_1", 0, "slow_search", "{}")], None),
        completion("", Some("never reached"), vec![], None),
    ]);
    let tools = Arc::new(FakeTools::new().with_tool(
        "slow_search",
        Duration::from_secs(30),
        FakeReply::Text("late".into()),
    ));

    let mut turn = run_turn_stream(backend.clone(), tools.clone(), weather_request(), TurnOptions::default());
    // The executed-calls paragraph is emitted right before dispatch.
    while let Some(item) = turn.next().await {
        if let Ok(TurnEvent::ReasoningDelta(text)) = item
            && text.contains("slow_search")
        {
            break;
        }
    }
    while tools.calls().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    drop(turn);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tools.cancelled() == 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(tools.cancelled(), 1);
    assert_eq!(backend.requests().len(), 1);
}
