//! OpenAI-compatible chat completions runtime

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{GenerateObjectRequest, GeneratedObject, ModelRuntime, ToolCall, ToolDefinition};
use crate::config::StoryAgentConfig;
use crate::error::{Result, StoryError};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const RETRY_BASE_DELAY_MS: u64 = 500;

/// OpenAI chat completions client
///
/// Supports OpenAI, OpenRouter, Azure OpenAI, and other OpenAI-compatible APIs.
pub struct OpenAiRuntime {
    client: reqwest::Client,
    base_url: String,
    max_retries: usize,
    retry_budget: Duration,
}

impl OpenAiRuntime {
    pub fn new(config: &StoryAgentConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                StoryError::Config(
                    "MEMORY_AGENT_STORY_API_KEY (or OPENAI_API_KEY) is required".to_string(),
                )
            })?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| StoryError::Config(format!("invalid API key header: {}", e)))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()?;

        Ok(Self {
            client,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            max_retries: config.max_retries,
            retry_budget: Duration::from_millis(config.retry_budget_ms),
        })
    }

    fn chat_completions_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            return base.to_string();
        }
        format!("{}/chat/completions", base)
    }

    /// Whether waiting `delay` more keeps the call inside its retry budget
    fn budget_allows(&self, started: Instant, delay: Duration) -> bool {
        self.retry_budget.is_zero()
            || started
                .elapsed()
                .checked_add(delay)
                .is_some_and(|total| total <= self.retry_budget)
    }
}

#[async_trait]
impl ModelRuntime for OpenAiRuntime {
    async fn generate_object(&self, request: GenerateObjectRequest) -> Result<GeneratedObject> {
        let body = build_chat_request_body(&request);
        let url = self.chat_completions_url();
        let started = Instant::now();

        for attempt in 0..=self.max_retries {
            let response = self.client.post(&url).json(&body).send().await;

            let response = match response {
                Ok(response) => response,
                Err(e)
                    if attempt < self.max_retries
                        && (e.is_timeout() || e.is_connect())
                        && self.budget_allows(started, retry_delay(attempt)) =>
                {
                    tracing::warn!(attempt, error = %e, "Chat completion request failed, retrying");
                    tokio::time::sleep(retry_delay(attempt)).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let status = response.status();
            if status.is_success() {
                let raw = response.text().await?;
                return parse_chat_response(&raw);
            }

            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let text = response.text().await.unwrap_or_default();

            let retryable = status.as_u16() == 429 || status.is_server_error();
            if retryable && attempt < self.max_retries {
                let delay = retry_after
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| retry_delay(attempt));
                if self.budget_allows(started, delay) {
                    tracing::warn!(
                        attempt,
                        status = status.as_u16(),
                        delay_ms = delay.as_millis() as u64,
                        "Chat completion returned retryable status"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                tracing::warn!(
                    attempt,
                    status = status.as_u16(),
                    delay_ms = delay.as_millis() as u64,
                    budget_ms = self.retry_budget.as_millis() as u64,
                    "Retry delay exceeds budget, giving up"
                );
            }

            if status.as_u16() == 429 {
                return Err(StoryError::RateLimited(retry_after.unwrap_or(0)));
            }

            return Err(StoryError::Llm(format!(
                "Chat completion API error {}: {}",
                status, text
            )));
        }

        Err(StoryError::Llm(
            "request retry loop terminated unexpectedly".to_string(),
        ))
    }

    fn provider(&self) -> &str {
        "openai"
    }
}

fn retry_delay(attempt: usize) -> Duration {
    Duration::from_millis(RETRY_BASE_DELAY_MS.saturating_mul(1u64 << attempt.min(6)))
}

fn build_chat_request_body(request: &GenerateObjectRequest) -> Value {
    let mut body = json!({
        "model": request.model,
        "messages": request.messages,
    });

    if !request.tools.is_empty() {
        body["tools"] = to_openai_tools(&request.tools);
    }

    // A single tool is the structured output channel, so force it.
    if let [tool] = request.tools.as_slice() {
        body["tool_choice"] = json!({
            "type": "function",
            "function": { "name": tool.name },
        });
    }

    body
}

fn to_openai_tools(tools: &[ToolDefinition]) -> Value {
    Value::Array(
        tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect(),
    )
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiToolCall {
    #[serde(rename = "type", default = "default_call_type")]
    call_type: String,
    function: OpenAiFunctionCall,
}

#[derive(Debug, Deserialize)]
struct OpenAiFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn default_call_type() -> String {
    "function".to_string()
}

fn parse_chat_response(raw: &str) -> Result<GeneratedObject> {
    let parsed: OpenAiChatResponse = serde_json::from_str(raw)?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| StoryError::Llm("response contained no choices".to_string()))?;

    let calls: Vec<ToolCall> = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .filter(|call| call.call_type == "function")
        .map(|call| ToolCall {
            arguments: serde_json::from_str::<Value>(&call.function.arguments)
                .unwrap_or(Value::String(call.function.arguments)),
            name: call.function.name,
        })
        .collect();

    if !calls.is_empty() {
        return Ok(GeneratedObject::ToolCalls(calls));
    }

    let content = choice.message.content.unwrap_or_default();
    serde_json::from_str::<Value>(content.trim())
        .map(GeneratedObject::Object)
        .map_err(|_| StoryError::Llm("model returned neither a tool call nor JSON".to_string()))
}
