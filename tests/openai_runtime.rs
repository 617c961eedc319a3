//! OpenAI-compatible runtime against a mock chat completions endpoint
//!
//! Run with: cargo test --test openai_runtime

use std::sync::Arc;
use std::time::{Duration, Instant};

use httpmock::prelude::*;
use serde_json::json;

use memory_story::config::StoryAgentConfig;
use memory_story::error::StoryError;
use memory_story::extractor::{StoryTemplateProps, UserStoryExtractor};
use memory_story::llm::{create_runtime, ModelRuntime, OpenAiRuntime};

fn config(server: &MockServer) -> StoryAgentConfig {
    StoryAgentConfig {
        api_key: Some("test-openai-key".to_string()),
        base_url: Some(format!("{}/v1", server.base_url())),
        model: "gpt-mock".to_string(),
        request_timeout_ms: 5_000,
        max_retries: 2,
        ..Default::default()
    }
}

fn tool_call_response(arguments: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {
                        "name": "commit_user_story",
                        "arguments": arguments
                    }
                }]
            },
            "finish_reason": "tool_calls"
        }]
    })
}

#[tokio::test]
async fn extractor_round_trip_through_chat_completions() {
    let server = MockServer::start_async().await;
    let completion = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/chat/completions")
            .header("authorization", "Bearer test-openai-key")
            .body_includes("\"tool_choice\"")
            .body_includes("commit_user_story")
            .body_includes("## Existing Story (baseline)");
        then.status(200).json_body(tool_call_response(
            r##"{"story":"# Ada\n\nYou build compilers.","summary":"Compiler engineer.","memoryIds":["mem-1"]}"##,
        ));
    });

    let runtime = create_runtime(&config(&server)).unwrap();
    assert_eq!(runtime.provider(), "openai");

    let extractor = UserStoryExtractor::new(runtime, "gpt-mock");
    let result = extractor
        .tool_call(&StoryTemplateProps {
            username: Some("Ada".to_string()),
            retrieved_memories: Some("- [2024-05-01T12:00:00.000Z] Compilers — LLVM".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    completion.assert();
    assert_eq!(result.story, "# Ada\n\nYou build compilers.");
    assert_eq!(result.summary.as_deref(), Some("Compiler engineer."));
    assert_eq!(result.memory_ids, Some(vec!["mem-1".to_string()]));
}

#[tokio::test]
async fn retries_server_errors_then_fails() {
    let server = MockServer::start_async().await;
    let failing = server.mock(|when, then| {
        when.method(POST).path("/v1/chat/completions");
        then.status(503)
            .header("retry-after", "0")
            .body("upstream unavailable");
    });

    let runtime: Arc<dyn ModelRuntime> = Arc::new(OpenAiRuntime::new(&config(&server)).unwrap());
    let extractor = UserStoryExtractor::new(runtime, "gpt-mock");
    let err = extractor
        .tool_call(&StoryTemplateProps::default())
        .await
        .unwrap_err();

    assert_eq!(failing.calls(), 3);
    match err {
        StoryError::Llm(message) => assert!(message.contains("upstream unavailable")),
        other => panic!("expected LLM error, got {:?}", other),
    }
}

#[tokio::test]
async fn exhausted_rate_limit_is_reported() {
    let server = MockServer::start_async().await;
    let limited = server.mock(|when, then| {
        when.method(POST).path("/v1/chat/completions");
        then.status(429).header("retry-after", "0").body("slow down");
    });

    let mut cfg = config(&server);
    cfg.max_retries = 1;
    let runtime = Arc::new(OpenAiRuntime::new(&cfg).unwrap());
    let extractor = UserStoryExtractor::new(runtime, "gpt-mock");
    let err = extractor
        .tool_call(&StoryTemplateProps::default())
        .await
        .unwrap_err();

    assert_eq!(limited.calls(), 2);
    assert!(matches!(err, StoryError::RateLimited(0)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn retry_after_beyond_budget_fails_fast() {
    let server = MockServer::start_async().await;
    let limited = server.mock(|when, then| {
        when.method(POST).path("/v1/chat/completions");
        then.status(429).header("retry-after", "86400").body("come back tomorrow");
    });

    let mut cfg = config(&server);
    cfg.max_retries = 1;
    cfg.request_timeout_ms = 1_000;
    let runtime = Arc::new(OpenAiRuntime::new(&cfg).unwrap());
    let extractor = UserStoryExtractor::new(runtime, "gpt-mock");

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        extractor.tool_call(&StoryTemplateProps::default()),
    )
    .await
    .expect("rate limited call should not wait out retry-after")
    .unwrap_err();

    limited.assert_calls(1);
    assert!(matches!(err, StoryError::RateLimited(86400)));
}

#[tokio::test]
async fn server_error_retry_after_beyond_budget_is_not_retried() {
    let server = MockServer::start_async().await;
    let failing = server.mock(|when, then| {
        when.method(POST).path("/v1/chat/completions");
        then.status(503).header("retry-after", "120").body("maintenance");
    });

    let mut cfg = config(&server);
    cfg.retry_budget_ms = 5_000;
    let runtime = Arc::new(OpenAiRuntime::new(&cfg).unwrap());
    let err = tokio::time::timeout(
        Duration::from_secs(5),
        UserStoryExtractor::new(runtime, "gpt-mock").tool_call(&StoryTemplateProps::default()),
    )
    .await
    .expect("server error should not wait out retry-after")
    .unwrap_err();

    failing.assert_calls(1);
    match err {
        StoryError::Llm(message) => assert!(message.contains("maintenance")),
        other => panic!("expected LLM error, got {:?}", other),
    }
}

#[tokio::test]
async fn short_retry_after_is_honored() {
    let server = MockServer::start_async().await;
    let limited = server.mock(|when, then| {
        when.method(POST).path("/v1/chat/completions");
        then.status(429).header("retry-after", "1").body("slow down");
    });

    let mut cfg = config(&server);
    cfg.max_retries = 1;
    let runtime = Arc::new(OpenAiRuntime::new(&cfg).unwrap());
    let started = Instant::now();
    let err = UserStoryExtractor::new(runtime, "gpt-mock")
        .tool_call(&StoryTemplateProps::default())
        .await
        .unwrap_err();

    limited.assert_calls(2);
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert!(matches!(err, StoryError::RateLimited(1)));
}

#[tokio::test]
async fn request_timeouts_are_retried() {
    let server = MockServer::start_async().await;
    let slow = server.mock(|when, then| {
        when.method(POST).path("/v1/chat/completions");
        then.status(200)
            .delay(Duration::from_millis(1_500))
            .json_body(tool_call_response(r##"{"story":"# Late"}"##));
    });

    let mut cfg = config(&server);
    cfg.max_retries = 1;
    cfg.request_timeout_ms = 100;
    let runtime = Arc::new(OpenAiRuntime::new(&cfg).unwrap());
    let err = UserStoryExtractor::new(runtime, "gpt-mock")
        .tool_call(&StoryTemplateProps::default())
        .await
        .unwrap_err();

    slow.assert_calls(2);
    match err {
        StoryError::Http(e) => assert!(e.is_timeout()),
        other => panic!("expected HTTP timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn connect_failures_are_retried_within_budget() {
    let cfg = StoryAgentConfig {
        api_key: Some("test-openai-key".to_string()),
        base_url: Some("http://127.0.0.1:1/v1".to_string()),
        request_timeout_ms: 1_000,
        max_retries: 1,
        ..Default::default()
    };
    let runtime = Arc::new(OpenAiRuntime::new(&cfg).unwrap());
    let started = Instant::now();
    let err = UserStoryExtractor::new(runtime, "gpt-mock")
        .tool_call(&StoryTemplateProps::default())
        .await
        .unwrap_err();

    assert!(started.elapsed() >= Duration::from_millis(500));
    match err {
        StoryError::Http(e) => assert!(e.is_connect()),
        other => panic!("expected HTTP connect error, got {:?}", other),
    }
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start_async().await;
    let rejected = server.mock(|when, then| {
        when.method(POST).path("/v1/chat/completions");
        then.status(400).body("bad request");
    });

    let runtime = Arc::new(OpenAiRuntime::new(&config(&server)).unwrap());
    let err = UserStoryExtractor::new(runtime, "gpt-mock")
        .tool_call(&StoryTemplateProps::default())
        .await
        .unwrap_err();

    rejected.assert_calls(1);
    assert!(matches!(err, StoryError::Llm(_)));
}

#[tokio::test]
async fn tool_arguments_missing_story_fail_validation() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(POST).path("/v1/chat/completions");
        then.status(200)
            .json_body(tool_call_response(r#"{"summary":"no story here"}"#));
    });

    let runtime = Arc::new(OpenAiRuntime::new(&config(&server)).unwrap());
    let err = UserStoryExtractor::new(runtime, "gpt-mock")
        .structured_call(&StoryTemplateProps::default())
        .await
        .unwrap_err();

    assert!(matches!(err, StoryError::Validation(_)));
}
