//! Model runtime for structured (tool-call) generation
//!
//! Supports:
//! - OpenAI-compatible chat completions (OpenAI, OpenRouter, Azure, local
//!   gateways) - requires `openai` feature
//!
//! # Feature Flags
//!
//! - `openai`: Enables the OpenAI runtime (requires API key)

#[cfg(feature = "openai")]
mod openai;

#[cfg(feature = "openai")]
pub use openai::OpenAiRuntime;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::StoryAgentConfig;
use crate::error::{Result, StoryError};

/// Chat message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// A function the model may call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: Value,
}

/// Request for one structured generation
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateObjectRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
}

/// A function call returned by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    /// Parsed arguments, or the raw string when they were not valid JSON
    pub arguments: Value,
}

/// What the model produced
#[derive(Debug, Clone, PartialEq)]
pub enum GeneratedObject {
    /// One or more tool calls, in model order
    ToolCalls(Vec<ToolCall>),
    /// A plain JSON object (no tool call was made)
    Object(Value),
}

/// Trait for model runtimes
#[async_trait]
pub trait ModelRuntime: Send + Sync {
    /// Run one generation and return its structured output
    async fn generate_object(&self, request: GenerateObjectRequest) -> Result<GeneratedObject>;

    /// Provider name, for logging
    fn provider(&self) -> &str;
}

/// Create a runtime from configuration
///
/// Available providers depend on enabled features:
/// - `"openai"`: Requires `openai` feature and API key
pub fn create_runtime(config: &StoryAgentConfig) -> Result<Arc<dyn ModelRuntime>> {
    match config.provider.as_str() {
        #[cfg(feature = "openai")]
        "openai" | "" => Ok(Arc::new(OpenAiRuntime::new(config)?)),
        #[cfg(not(feature = "openai"))]
        "openai" | "" => Err(StoryError::Config(
            "The OpenAI runtime requires the 'openai' feature to be enabled".to_string(),
        )),
        other => Err(StoryError::Config(format!(
            "Unknown model provider: '{}'. Use 'openai'",
            other
        ))),
    }
}
