//! Webhook and workflow routes driven through the axum router
//!
//! Run with: cargo test --test http_routes

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tower::ServiceExt;

use memory_story::config::StoryAgentConfig;
use memory_story::error::{Result, StoryError};
use memory_story::llm::{GenerateObjectRequest, GeneratedObject, ModelRuntime, ToolCall};
use memory_story::server::{ServerState, StoryServer, WEBHOOK_PATH, WORKFLOW_PATH};
use memory_story::storage::insert_memory;
use memory_story::{MemoryLayer, NewUserMemory, Storage, StoryModel, StoryService};

/// Returns a fixed story, or fails for one named user
struct StubRuntime {
    fail_for: Option<String>,
    prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl ModelRuntime for StubRuntime {
    async fn generate_object(&self, request: GenerateObjectRequest) -> Result<GeneratedObject> {
        let user_prompt = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.prompts.lock().push(user_prompt.clone());

        if let Some(user) = &self.fail_for {
            if user_prompt.contains(user.as_str()) {
                return Err(StoryError::Llm("model exploded".to_string()));
            }
        }

        Ok(GeneratedObject::ToolCalls(vec![ToolCall {
            name: "commit_user_story".to_string(),
            arguments: Value::String(
                json!({
                    "story": "# Story",
                    "summary": "summary",
                    "diff": "- updated",
                    "reasoning": "reason",
                    "sourceIds": ["src-1"]
                })
                .to_string(),
            ),
        }]))
    }

    fn provider(&self) -> &str {
        "stub"
    }
}

struct Harness {
    app: Router,
    storage: Storage,
    runtime: Arc<StubRuntime>,
}

fn harness(headers: &[(&str, &str)], fail_for: Option<&str>) -> Harness {
    let storage = Storage::open_in_memory().unwrap();
    let runtime = Arc::new(StubRuntime {
        fail_for: fail_for.map(str::to_string),
        prompts: Mutex::new(Vec::new()),
    });
    let service = StoryService::new(
        storage.clone(),
        runtime.clone(),
        StoryAgentConfig {
            model: "gpt-mock".to_string(),
            language: Some("English".to_string()),
            ..Default::default()
        },
    );
    let webhook_headers: BTreeMap<String, String> = headers
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    Harness {
        app: StoryServer::router(ServerState::new(service, webhook_headers)),
        storage,
        runtime,
    }
}

fn seed_memory(storage: &Storage, user_id: &str, title: &str) {
    storage
        .with_connection(|conn| {
            insert_memory(
                conn,
                user_id,
                &NewUserMemory {
                    layer: MemoryLayer::Activity,
                    title: Some(title.to_string()),
                    summary: None,
                    details: None,
                    captured_at: None,
                },
            )
        })
        .unwrap();
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.expect("route response");
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    let parsed = serde_json::from_slice(&body).expect("parse response body as json");
    (status, parsed)
}

fn post(path: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(body.into())
        .expect("request")
}

#[tokio::test]
async fn webhook_rejects_missing_header() {
    let h = harness(&[("x-story-secret", "s3cret")], None);

    let (status, body) = send(&h.app, post(WEBHOOK_PATH, r#"{"userId":"u1"}"#)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(
        body["error"],
        "Unauthorized: Missing or invalid header 'x-story-secret'"
    );

    let wrong = Request::builder()
        .method("POST")
        .uri(WEBHOOK_PATH)
        .header("x-story-secret", "nope")
        .body(Body::from(r#"{"userId":"u1"}"#))
        .unwrap();
    let (status, _) = send(&h.app, wrong).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(h.runtime.prompts.lock().is_empty());
}

#[tokio::test]
async fn webhook_requires_user_ids() {
    let h = harness(&[], None);

    let (status, body) = send(&h.app, post(WEBHOOK_PATH, r#"{"userIds":["", ""]}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "userId or userIds is required"}));
}

#[tokio::test]
async fn webhook_malformed_body_is_server_error() {
    let h = harness(&[], None);

    let (status, body) = send(&h.app, post(WEBHOOK_PATH, "not json")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].is_string());

    let (status, _) = send(&h.app, post(WEBHOOK_PATH, r#"{"userIds":"u1"}"#)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn webhook_generates_stories_in_order() {
    let h = harness(&[("x-story-secret", "s3cret")], None);
    seed_memory(&h.storage, "u1", "Ran a marathon");

    let request = Request::builder()
        .method("POST")
        .uri(WEBHOOK_PATH)
        .header("X-Story-Secret", "s3cret")
        .body(Body::from(r#"{"userIds":["u1","u2","u1"],"userId":"u3"}"#))
        .unwrap();
    let (status, body) = send(&h.app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "User story generated via webhook.");

    let results = body["results"].as_array().unwrap();
    let users: Vec<_> = results.iter().map(|r| r["userId"].as_str().unwrap()).collect();
    assert_eq!(users, vec!["u1", "u2", "u3"]);

    let first = &results[0];
    assert_eq!(first["agentResult"]["story"], "# Story");
    assert_eq!(first["document"]["version"], 1);
    assert_eq!(first["document"]["title"], "User Story for User");
    assert_eq!(first["diff"]["nextVersion"], 1);
    assert_eq!(first["document"]["memoryIds"].as_array().unwrap().len(), 1);

    let prompts = h.runtime.prompts.lock();
    assert_eq!(prompts.len(), 3);
    assert!(prompts[0].contains("## Recent Memories"));
    assert!(prompts[0].contains("Ran a marathon"));
    assert!(prompts[1].contains("## Retrieved Memories / Signals\n\nN/A"));
}

#[tokio::test]
async fn webhook_failure_aborts_batch() {
    let h = harness(&[], Some("boom"));
    seed_memory(&h.storage, "u2", "boom");

    let (status, body) = send(
        &h.app,
        post(WEBHOOK_PATH, r#"{"userIds":["u1","u2","u3"]}"#),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "LLM error: model exploded");

    let stored = |user: &str| {
        StoryModel::new(h.storage.clone(), user)
            .get_latest_story_document()
            .unwrap()
    };
    assert!(stored("u1").is_some());
    assert!(stored("u2").is_none());
    assert!(stored("u3").is_none());
}

#[tokio::test]
async fn workflow_empty_body_reports_nothing_to_do() {
    let h = harness(&[], None);

    let (status, body) = send(&h.app, post(WORKFLOW_PATH, Body::empty())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"message": "userId or userIds is required", "processedUsers": 0})
    );

    let (status, body) = send(&h.app, post(WORKFLOW_PATH, "null")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["processedUsers"], 0);
}

#[tokio::test]
async fn workflow_malformed_body_is_server_error() {
    let h = harness(&[], None);

    let (status, body) = send(&h.app, post(WORKFLOW_PATH, "not json")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].is_string());

    let (status, body) = send(&h.app, post(WORKFLOW_PATH, r#"{"userIds":"u1"}"#)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].is_string());
    assert!(h.runtime.prompts.lock().is_empty());
}

#[tokio::test]
async fn workflow_ignores_webhook_headers_and_summarizes() {
    let h = harness(&[("x-story-secret", "s3cret")], None);

    let (status, body) = send(&h.app, post(WORKFLOW_PATH, r#"{"userId":"u1"}"#)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "User story processed via workflow.");
    assert_eq!(body["processedUsers"], 1);

    let result = &body["results"][0];
    assert_eq!(result["userId"], "u1");
    assert_eq!(result["version"], 1);
    assert!(result["documentId"].is_string());
    assert!(result["diffId"].is_string());

    let (_, body) = send(&h.app, post(WORKFLOW_PATH, r#"{"userId":"u1"}"#)).await;
    assert_eq!(body["results"][0]["version"], 2);
    assert_eq!(
        body["results"][0]["documentId"],
        result["documentId"].clone()
    );
}

#[tokio::test]
async fn workflow_failure_is_server_error() {
    let h = harness(&[], Some("boom"));
    seed_memory(&h.storage, "u1", "boom");

    let (status, body) = send(&h.app, post(WORKFLOW_PATH, r#"{"userId":"u1"}"#)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("model exploded"));
}

#[tokio::test]
async fn health_reports_version() {
    let h = harness(&[], None);

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], memory_story::VERSION);
}
