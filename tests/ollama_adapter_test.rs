//! Ollama adapter integration tests
//!
//! Run [`OllamaAdapter`] against a `wiremock` server standing in for the
//! `/api/chat` endpoint.

use std::time::Duration;

use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mcphost::config::ProviderConfig;
use mcphost::error::McpHostError;
use mcphost::providers::{CompletionParams, Message, ModelAdapter, OllamaAdapter, Response};
use mcphost::retry::Backoff;
use mcphost::tools::ToolDescriptor;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn adapter(server: &MockServer) -> OllamaAdapter {
    let config = ProviderConfig {
        url: server.uri(),
        timeout_seconds: 5,
        ..ProviderConfig::default()
    };
    OllamaAdapter::new(&config).unwrap().with_backoff(Backoff {
        max_retries: 2,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
        jitter: false,
    })
}

fn weather() -> ToolDescriptor {
    ToolDescriptor::new(
        "get_weather",
        "Get the current weather for a location",
        json!({
            "type": "object",
            "properties": { "location": { "type": "string" } },
            "required": ["location"]
        }),
        "weather",
    )
}

fn chat_reply(message: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "model": "llama3",
        "message": message,
        "done": true,
        "prompt_eval_count": 12,
        "eval_count": 3
    }))
}

async fn mount_reply(server: &MockServer, message: Value) {
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(chat_reply(message))
        .mount(server)
        .await;
}

async fn complete(adapter: &OllamaAdapter, tools: &[ToolDescriptor]) -> mcphost::Result<Response> {
    adapter
        .complete(
            &[Message::user("What's the weather in Paris?")],
            tools,
            &CompletionParams::default(),
        )
        .await
}

fn is_adapter_protocol(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<McpHostError>(),
        Some(McpHostError::AdapterProtocol(_))
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_final_text_response() {
    let server = MockServer::start().await;
    mount_reply(&server, json!({ "role": "assistant", "content": "Hello there" })).await;

    let response = complete(&adapter(&server), &[]).await.unwrap();

    assert_eq!(response, Response::FinalText("Hello there".to_string()));
}

#[tokio::test]
async fn test_request_body_carries_options_and_tools() {
    let server = MockServer::start().await;
    mount_reply(&server, json!({ "role": "assistant", "content": "ok" })).await;

    complete(&adapter(&server), &[weather()]).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["model"], "llama3");
    assert_eq!(body["stream"], false);
    assert_eq!(body["options"]["temperature"], 0.7);
    assert_eq!(body["options"]["num_predict"], 1024);
    assert_eq!(body["tools"][0]["function"]["name"], "get_weather");
    assert_eq!(body["messages"][0]["role"], "user");
}

#[tokio::test]
async fn test_tool_calls_are_parsed_and_ids_filled_in() {
    let server = MockServer::start().await;
    mount_reply(
        &server,
        json!({
            "role": "assistant",
            "content": "",
            "tool_calls": [
                { "function": { "name": "get_weather", "arguments": "{\"location\":\"Paris\"}" } },
                { "id": "given", "function": { "name": "get_weather", "arguments": { "location": "Lyon" } } }
            ]
        }),
    )
    .await;

    let response = complete(&adapter(&server), &[weather()]).await.unwrap();

    match response {
        Response::ToolCallsRequested { calls, text } => {
            assert!(text.is_none());
            assert_eq!(calls.len(), 2);
            assert!(calls[0].id.starts_with("call_"));
            assert_eq!(calls[0].arguments, json!({ "location": "Paris" }));
            assert_eq!(calls[1].id, "given");
            assert_eq!(calls[1].arguments["location"], "Lyon");
        }
        other => panic!("expected tool calls, got {:?}", other),
    }
}

#[tokio::test]
async fn test_null_optional_arguments_are_dropped_before_validation() {
    let server = MockServer::start().await;
    mount_reply(
        &server,
        json!({
            "role": "assistant",
            "content": "",
            "tool_calls": [{
                "function": {
                    "name": "get_weather",
                    "arguments": { "location": "Paris", "units": null }
                }
            }]
        }),
    )
    .await;
    let tool = ToolDescriptor::new(
        "get_weather",
        "Get the current weather for a location",
        json!({
            "type": "object",
            "properties": {
                "location": { "type": "string" },
                "units": { "type": "string" }
            },
            "required": ["location"]
        }),
        "weather",
    );

    let response = complete(&adapter(&server), &[tool]).await.unwrap();

    match response {
        Response::ToolCallsRequested { calls, .. } => {
            assert_eq!(calls.len(), 1);
            assert_eq!(calls[0].arguments, json!({ "location": "Paris" }));
        }
        other => panic!("expected tool calls, got {:?}", other),
    }
}

#[tokio::test]
async fn test_text_sent_with_tool_calls_is_kept() {
    let server = MockServer::start().await;
    mount_reply(
        &server,
        json!({
            "role": "assistant",
            "content": "Let me check the forecast.",
            "tool_calls": [{
                "function": { "name": "get_weather", "arguments": { "location": "Paris" } }
            }]
        }),
    )
    .await;

    let response = complete(&adapter(&server), &[weather()]).await.unwrap();

    match response {
        Response::ToolCallsRequested { calls, text } => {
            assert_eq!(calls.len(), 1);
            assert_eq!(text.as_deref(), Some("Let me check the forecast."));
        }
        other => panic!("expected tool calls, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_tool_is_adapter_protocol_error() {
    let server = MockServer::start().await;
    mount_reply(
        &server,
        json!({
            "role": "assistant",
            "content": "",
            "tool_calls": [{ "function": { "name": "delete_everything", "arguments": {} } }]
        }),
    )
    .await;

    let err = complete(&adapter(&server), &[weather()]).await.unwrap_err();

    assert!(is_adapter_protocol(&err), "got: {err}");
}

#[tokio::test]
async fn test_schema_violation_is_adapter_protocol_error() {
    let server = MockServer::start().await;
    mount_reply(
        &server,
        json!({
            "role": "assistant",
            "content": "",
            "tool_calls": [{ "function": { "name": "get_weather", "arguments": { "city": "Paris" } } }]
        }),
    )
    .await;

    let err = complete(&adapter(&server), &[weather()]).await.unwrap_err();

    assert!(is_adapter_protocol(&err), "got: {err}");
}

#[tokio::test]
async fn test_unparsable_body_is_adapter_protocol_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .mount(&server)
        .await;

    let err = complete(&adapter(&server), &[]).await.unwrap_err();

    assert!(is_adapter_protocol(&err), "got: {err}");
}

#[tokio::test]
async fn test_service_unavailable_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(503).set_body_string("loading model"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(chat_reply(json!({ "role": "assistant", "content": "ready now" })))
        .with_priority(2)
        .mount(&server)
        .await;

    let response = complete(&adapter(&server), &[]).await.unwrap();

    assert_eq!(response, Response::FinalText("ready now".to_string()));
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_persistent_unavailability_gives_up() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = complete(&adapter(&server), &[]).await.unwrap_err();

    assert!(matches!(
        err.downcast_ref::<McpHostError>(),
        Some(McpHostError::Provider(_))
    ));
    // One attempt plus two retries.
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(400).set_body_string("model not found"))
        .mount(&server)
        .await;

    let err = complete(&adapter(&server), &[]).await.unwrap_err();

    match err.downcast_ref::<McpHostError>() {
        Some(McpHostError::Provider(msg)) => assert!(msg.contains("model not found")),
        other => panic!("expected provider error, got {:?}", other),
    }
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}
