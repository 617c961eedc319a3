//! User story extractor
//!
//! Renders the story prompts, asks the model to call `commit_user_story`
//! and validates the returned arguments.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::prompt::{render_placeholder_template, STORY_TOP_K, USER_STORY_PROMPT};
use crate::error::{Result, StoryError};
use crate::llm::{
    ChatMessage, GenerateObjectRequest, GeneratedObject, ModelRuntime, ToolDefinition,
};

/// Name of the single tool offered to the model
pub const COMMIT_USER_STORY_TOOL: &str = "commit_user_story";

const DEFAULT_LANGUAGE: &str = "English";
const DEFAULT_USERNAME: &str = "User";

/// Validated `commit_user_story` arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryExtractionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ids: Option<Vec<String>>,
    /// Complete markdown story
    pub story: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Inputs rendered into the story prompts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoryTemplateProps {
    pub existing_story: Option<String>,
    pub language: Option<String>,
    pub recent_events: Option<String>,
    pub retrieved_memories: Option<String>,
    pub story_notes: Option<String>,
    pub user_profile: Option<String>,
    pub username: Option<String>,
    /// Inserted between the system and user prompts
    pub additional_messages: Vec<ChatMessage>,
}

/// Composes a user story with one tool call
pub struct UserStoryExtractor {
    runtime: Arc<dyn ModelRuntime>,
    model: String,
}

impl UserStoryExtractor {
    pub fn new(runtime: Arc<dyn ModelRuntime>, model: impl Into<String>) -> Self {
        Self {
            runtime,
            model: model.into(),
        }
    }

    /// Prompt name used in logs
    pub fn prompt_name(&self) -> &'static str {
        "user-story"
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// The tool the model must call
    pub fn tools(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: COMMIT_USER_STORY_TOOL.to_string(),
            description: "Persist an updated user story document that summarizes the user, \
                preferences, relationships, and recent events."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "diff": {
                        "type": "string",
                        "description": "Bullet list of changes applied this run"
                    },
                    "memoryIds": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Related memory IDs used to craft the story"
                    },
                    "reasoning": {
                        "type": "string",
                        "description": "Why these changes were applied"
                    },
                    "sourceIds": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Source IDs (topic ID, document ID, or anything related) tied to this update"
                    },
                    "story": {
                        "type": "string",
                        "description": "Complete Markdown story for the user"
                    },
                    "summary": {
                        "type": "string",
                        "description": "Executive summary (2-3 lines)"
                    }
                },
                "required": ["story"]
            }),
        }]
    }

    /// Values substituted into the system prompt
    pub fn template_props(&self, options: &StoryTemplateProps) -> HashMap<&'static str, String> {
        let mut props = HashMap::new();
        props.insert(
            "language",
            non_blank(&options.language).unwrap_or(DEFAULT_LANGUAGE).to_string(),
        );
        props.insert(
            "username",
            non_blank(&options.username).unwrap_or(DEFAULT_USERNAME).to_string(),
        );
        props.insert("topK", STORY_TOP_K.to_string());
        props
    }

    pub fn build_system_prompt(&self, options: &StoryTemplateProps) -> String {
        render_placeholder_template(USER_STORY_PROMPT, &self.template_props(options))
    }

    /// Sectioned user prompt; missing inputs get a placeholder line
    pub fn build_user_prompt(&self, options: &StoryTemplateProps) -> String {
        let sections = [
            "## Existing Story (baseline)",
            non_blank(&options.existing_story).unwrap_or("No existing story provided."),
            "## Retrieved Memories / Signals",
            non_blank(&options.retrieved_memories).unwrap_or("N/A"),
            "## Recent Events or Highlights",
            non_blank(&options.recent_events).unwrap_or("N/A"),
            "## User Provided Notes or Requests",
            non_blank(&options.story_notes).unwrap_or("N/A"),
            "## Extra Profile Context",
            non_blank(&options.user_profile).unwrap_or("N/A"),
        ];

        sections.join("\n\n")
    }

    /// System prompt, any additional messages, then the user prompt
    pub fn build_messages(&self, options: &StoryTemplateProps) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(options.additional_messages.len() + 2);
        messages.push(ChatMessage::system(self.build_system_prompt(options)));
        messages.extend(options.additional_messages.iter().cloned());
        messages.push(ChatMessage::user(self.build_user_prompt(options)));
        messages
    }

    /// Ask the model for a story and validate the tool-call arguments
    pub async fn tool_call(&self, options: &StoryTemplateProps) -> Result<StoryExtractionResult> {
        let request = GenerateObjectRequest {
            model: self.model.clone(),
            messages: self.build_messages(options),
            tools: self.tools(),
        };

        tracing::debug!(
            prompt = self.prompt_name(),
            model = %self.model,
            provider = self.runtime.provider(),
            "Requesting story tool call"
        );

        let generated = self.runtime.generate_object(request).await?;
        parse_extraction_result(generated)
    }

    /// Alias of [`Self::tool_call`]
    pub async fn structured_call(
        &self,
        options: &StoryTemplateProps,
    ) -> Result<StoryExtractionResult> {
        self.tool_call(options).await
    }
}

/// Validate model output against the `commit_user_story` argument shape.
///
/// Tool calls: the first call's arguments are used; string arguments are
/// parsed as JSON and an empty string counts as `{}`. A plain object is
/// validated directly.
pub fn parse_extraction_result(generated: GeneratedObject) -> Result<StoryExtractionResult> {
    let args = match generated {
        GeneratedObject::ToolCalls(calls) => match calls.into_iter().next() {
            Some(call) => match call.arguments {
                Value::String(raw) if raw.trim().is_empty() => json!({}),
                Value::String(raw) => serde_json::from_str(&raw).map_err(|e| {
                    StoryError::Validation(format!("tool arguments are not valid JSON: {}", e))
                })?,
                Value::Null => json!({}),
                other => other,
            },
            None => json!({}),
        },
        GeneratedObject::Object(value) => value,
    };

    serde_json::from_value(args).map_err(|e| StoryError::Validation(e.to_string()))
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MessageRole, ToolCall};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    struct RecordingRuntime {
        output: GeneratedObject,
        requests: Mutex<Vec<GenerateObjectRequest>>,
    }

    #[async_trait]
    impl ModelRuntime for RecordingRuntime {
        async fn generate_object(&self, request: GenerateObjectRequest) -> Result<GeneratedObject> {
            self.requests.lock().push(request);
            Ok(self.output.clone())
        }

        fn provider(&self) -> &str {
            "recording"
        }
    }

    fn runtime(output: GeneratedObject) -> Arc<RecordingRuntime> {
        Arc::new(RecordingRuntime {
            output,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn template_options() -> StoryTemplateProps {
        StoryTemplateProps {
            existing_story: Some("# Existing".to_string()),
            language: Some("English".to_string()),
            recent_events: Some("- Event 1".to_string()),
            retrieved_memories: Some("- mem".to_string()),
            story_notes: Some("- note".to_string()),
            user_profile: Some("- profile".to_string()),
            username: Some("User".to_string()),
            additional_messages: vec![],
        }
    }

    #[test]
    fn test_exposes_single_commit_tool() {
        let extractor = UserStoryExtractor::new(runtime(GeneratedObject::Object(json!({}))), "m");
        let tools = extractor.tools();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, COMMIT_USER_STORY_TOOL);
        assert_eq!(tools[0].parameters["required"], json!(["story"]));
    }

    #[test]
    fn test_user_prompt_sections() {
        let extractor = UserStoryExtractor::new(runtime(GeneratedObject::Object(json!({}))), "m");
        let prompt = extractor.build_user_prompt(&template_options());
        assert!(prompt.starts_with("## Existing Story (baseline)\n\n# Existing\n\n"));
        assert!(prompt.contains("## Recent Events or Highlights\n\n- Event 1"));
        assert!(prompt.ends_with("## Extra Profile Context\n\n- profile"));
    }

    #[test]
    fn test_user_prompt_placeholders_for_missing_inputs() {
        let extractor = UserStoryExtractor::new(runtime(GeneratedObject::Object(json!({}))), "m");
        let prompt = extractor.build_user_prompt(&StoryTemplateProps {
            existing_story: Some("   ".to_string()),
            ..Default::default()
        });
        assert_eq!(
            prompt,
            [
                "## Existing Story (baseline)",
                "No existing story provided.",
                "## Retrieved Memories / Signals",
                "N/A",
                "## Recent Events or Highlights",
                "N/A",
                "## User Provided Notes or Requests",
                "N/A",
                "## Extra Profile Context",
                "N/A",
            ]
            .join("\n\n")
        );
    }

    #[tokio::test]
    async fn test_tool_call_sends_structured_request() {
        let rt = runtime(GeneratedObject::ToolCalls(vec![ToolCall {
            name: COMMIT_USER_STORY_TOOL.to_string(),
            arguments: Value::String(
                json!({
                    "diff": "- updated",
                    "memoryIds": ["mem-1"],
                    "reasoning": "why",
                    "sourceIds": ["src-1"],
                    "story": "# Story",
                    "summary": "summary"
                })
                .to_string(),
            ),
        }]));
        let extractor = UserStoryExtractor::new(rt.clone(), "gpt-mock");

        let mut options = template_options();
        options.additional_messages = vec![ChatMessage::assistant("earlier turn")];
        let result = extractor.tool_call(&options).await.unwrap();

        assert_eq!(result.story, "# Story");
        assert_eq!(result.memory_ids, Some(vec!["mem-1".to_string()]));

        let requests = rt.requests.lock();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.model, "gpt-mock");
        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[0].role, MessageRole::System);
        assert_eq!(
            request.messages[0].content,
            extractor.build_system_prompt(&options)
        );
        assert_eq!(request.messages[1].content, "earlier turn");
        assert_eq!(request.messages[2].role, MessageRole::User);
        assert_eq!(request.tools[0].name, COMMIT_USER_STORY_TOOL);
    }

    #[tokio::test]
    async fn test_structured_call_accepts_plain_object() {
        let rt = runtime(GeneratedObject::Object(json!({"story": "# Plain"})));
        let extractor = UserStoryExtractor::new(rt, "gpt-mock");
        let result = extractor.structured_call(&template_options()).await.unwrap();
        assert_eq!(result.story, "# Plain");
        assert_eq!(result.summary, None);
    }

    #[test]
    fn test_parse_rejects_missing_story() {
        let err = parse_extraction_result(GeneratedObject::ToolCalls(vec![ToolCall {
            name: COMMIT_USER_STORY_TOOL.to_string(),
            arguments: Value::String(String::new()),
        }]))
        .unwrap_err();
        assert!(matches!(err, StoryError::Validation(_)));

        let err = parse_extraction_result(GeneratedObject::ToolCalls(vec![])).unwrap_err();
        assert!(matches!(err, StoryError::Validation(_)));
    }

    #[test]
    fn test_parse_rejects_wrong_types() {
        let err = parse_extraction_result(GeneratedObject::Object(
            json!({"story": "# ok", "memoryIds": "not-a-list"}),
        ))
        .unwrap_err();
        assert!(matches!(err, StoryError::Validation(_)));
    }

    #[test]
    fn test_system_prompt_defaults() {
        let extractor = UserStoryExtractor::new(runtime(GeneratedObject::Object(json!({}))), "m");
        let prompt = extractor.build_system_prompt(&StoryTemplateProps::default());
        assert!(prompt.contains("biographer of User"));
        assert!(prompt.contains("in English."));
        assert!(prompt.contains("at most the 10 most relevant"));
    }
}
