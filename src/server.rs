//! HTTP entry points for story generation
//!
//! - `POST /api/webhooks/user-story`: header-guarded, returns full results
//! - `POST /api/workflows/user-story/process`: workflow step, returns a summary
//! - `GET /health`

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::StoryError;
use crate::service::{StoryService, UserStoryOutcome};
use crate::types::RecordId;

pub const WEBHOOK_PATH: &str = "/api/webhooks/user-story";
pub const WORKFLOW_PATH: &str = "/api/workflows/user-story/process";

const MISSING_USER_IDS: &str = "userId or userIds is required";

/// Body accepted by both entry points
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStoryRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_ids: Option<Vec<String>>,
}

impl UserStoryRequest {
    /// `user_ids` then `user_id`, first occurrence wins, empty ids dropped
    pub fn merged_user_ids(&self) -> Vec<String> {
        merge_user_ids(self.user_ids.as_deref().unwrap_or_default(), self.user_id.as_deref())
    }
}

/// Merge a list of ids with an optional single id, preserving order
pub fn merge_user_ids(user_ids: &[String], user_id: Option<&str>) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(user_ids.len() + 1);

    for id in user_ids.iter().map(String::as_str).chain(user_id) {
        if !id.is_empty() && !merged.iter().any(|seen| seen == id) {
            merged.push(id.to_string());
        }
    }

    merged
}

/// Per-user entry in the workflow response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff_id: Option<RecordId>,
    pub document_id: RecordId,
    pub user_id: String,
    pub version: i32,
}

impl From<&UserStoryOutcome> for WorkflowResult {
    fn from(outcome: &UserStoryOutcome) -> Self {
        Self {
            diff_id: outcome.result.diff.as_ref().map(|d| d.id.clone()),
            document_id: outcome.result.document.id.clone(),
            user_id: outcome.user_id.clone(),
            version: outcome.result.document.version,
        }
    }
}

/// Shared handler state
#[derive(Clone)]
pub struct ServerState {
    service: Arc<StoryService>,
    /// Lowercased header name to required value
    webhook_headers: Arc<BTreeMap<String, String>>,
}

impl ServerState {
    pub fn new(service: StoryService, webhook_headers: BTreeMap<String, String>) -> Self {
        Self {
            service: Arc::new(service),
            webhook_headers: Arc::new(webhook_headers),
        }
    }

    /// Every configured header must be present with exactly the configured value
    fn check_webhook_headers(&self, headers: &HeaderMap) -> Result<(), StoryError> {
        for (key, expected) in self.webhook_headers.iter() {
            let actual = headers.get(key.as_str()).and_then(|v| v.to_str().ok());
            if actual != Some(expected.as_str()) {
                return Err(StoryError::Unauthorized(format!(
                    "Missing or invalid header '{}'",
                    key
                )));
            }
        }
        Ok(())
    }
}

/// HTTP server for the story entry points
pub struct StoryServer {
    state: ServerState,
    addr: SocketAddr,
}

impl StoryServer {
    pub fn new(state: ServerState, addr: SocketAddr) -> Self {
        Self { state, addr }
    }

    /// Build the router
    pub fn router(state: ServerState) -> Router {
        Router::new()
            .route(WEBHOOK_PATH, post(webhook_handler))
            .route(WORKFLOW_PATH, post(workflow_handler))
            .route("/health", get(health_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Start the server
    pub async fn start(self) -> std::io::Result<()> {
        let app = Self::router(self.state);

        tracing::info!("Story server listening on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn status_for(error: &StoryError) -> StatusCode {
    StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Health check endpoint
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
    }))
}

async fn webhook_handler(
    State(state): State<ServerState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(e) = state.check_webhook_headers(&headers) {
        tracing::warn!(error = %e, "Rejected user story webhook");
        return error_response(status_for(&e), e.to_string());
    }

    let run_id = Uuid::new_v4();
    let span = tracing::info_span!("user_story_webhook", %run_id);

    async move {
        let request: UserStoryRequest = match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(e) => {
                tracing::error!(error = %e, "Invalid user story webhook body");
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
            }
        };

        let user_ids = request.merged_user_ids();
        if user_ids.is_empty() {
            let e = StoryError::InvalidInput(MISSING_USER_IDS.to_string());
            return error_response(status_for(&e), MISSING_USER_IDS);
        }

        match state.service.process_users(&user_ids).await {
            Ok(results) => (
                StatusCode::OK,
                Json(json!({
                    "message": "User story generated via webhook.",
                    "results": results,
                })),
            )
                .into_response(),
            Err(e) => {
                tracing::error!(error = %e, "[user-story] failed");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        }
    }
    .instrument(span)
    .await
}

async fn workflow_handler(State(state): State<ServerState>, body: Bytes) -> Response {
    let run_id = Uuid::new_v4();
    let span = tracing::info_span!("user_story_workflow", %run_id);

    async move {
        let request: UserStoryRequest = if body.iter().all(u8::is_ascii_whitespace) {
            UserStoryRequest::default()
        } else {
            match serde_json::from_slice::<Option<UserStoryRequest>>(&body) {
                Ok(request) => request.unwrap_or_default(),
                Err(e) => {
                    tracing::error!(error = %e, "Invalid user story workflow payload");
                    return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
                }
            }
        };

        let user_ids = request.merged_user_ids();
        if user_ids.is_empty() {
            return Json(json!({
                "message": MISSING_USER_IDS,
                "processedUsers": 0,
            }))
            .into_response();
        }

        match state.service.process_users(&user_ids).await {
            Ok(outcomes) => {
                let results: Vec<WorkflowResult> =
                    outcomes.iter().map(WorkflowResult::from).collect();
                Json(json!({
                    "message": "User story processed via workflow.",
                    "processedUsers": user_ids.len(),
                    "results": results,
                }))
                .into_response()
            }
            Err(e) => {
                tracing::error!(error = %e, "User story workflow step failed");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        }
    }
    .instrument(span)
    .await
}
