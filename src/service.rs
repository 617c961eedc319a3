//! Story composition service
//!
//! Runs the extractor for a user and persists the result as the next story
//! version.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::StoryAgentConfig;
use crate::context::{build_user_story_job_input, StoryJobInput};
use crate::error::Result;
use crate::extractor::{StoryExtractionResult, StoryTemplateProps, UserStoryExtractor};
use crate::llm::ModelRuntime;
use crate::storage::{MemorySource, SqliteMemorySource, Storage, StoryModel};
use crate::types::{truncate_title, Metadata, StoryDiff, StoryDocument, UpsertStoryParams};

/// Inputs for one compose run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposePayload {
    pub user_id: String,
    /// Falls back to the stored story when absent
    pub existing_story: Option<String>,
    pub language: Option<String>,
    /// Overrides the ids returned by the model
    pub memory_ids: Option<Vec<String>>,
    pub metadata: Option<Metadata>,
    pub recent_events: Option<String>,
    pub retrieved_memories: Option<String>,
    /// Overrides the ids returned by the model
    pub source_ids: Option<Vec<String>>,
    pub story_notes: Option<String>,
    pub user_profile: Option<String>,
    pub username: Option<String>,
}

impl ComposePayload {
    /// Payload built from assembled job input
    pub fn from_job_input(user_id: impl Into<String>, input: StoryJobInput) -> Self {
        Self {
            user_id: user_id.into(),
            existing_story: input.existing_story,
            memory_ids: Some(input.memory_ids),
            retrieved_memories: input.retrieved_memories,
            ..Default::default()
        }
    }
}

/// What a compose run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposeResult {
    pub agent_result: StoryExtractionResult,
    pub document: StoryDocument,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<StoryDiff>,
}

/// Result for one user in a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStoryOutcome {
    pub user_id: String,
    #[serde(flatten)]
    pub result: ComposeResult,
}

/// Composes and persists user stories
#[derive(Clone)]
pub struct StoryService {
    storage: Storage,
    memories: Arc<dyn MemorySource>,
    runtime: Arc<dyn ModelRuntime>,
    agent_config: StoryAgentConfig,
}

impl StoryService {
    /// Service reading memories from the story database
    pub fn new(
        storage: Storage,
        runtime: Arc<dyn ModelRuntime>,
        agent_config: StoryAgentConfig,
    ) -> Self {
        let memories = Arc::new(SqliteMemorySource::new(storage.clone()));
        Self::with_memory_source(storage, memories, runtime, agent_config)
    }

    pub fn with_memory_source(
        storage: Storage,
        memories: Arc<dyn MemorySource>,
        runtime: Arc<dyn ModelRuntime>,
        agent_config: StoryAgentConfig,
    ) -> Self {
        Self {
            storage,
            memories,
            runtime,
            agent_config,
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn agent_config(&self) -> &StoryAgentConfig {
        &self.agent_config
    }

    /// Run the extractor for one user and persist the new story version
    pub async fn compose_story(&self, payload: ComposePayload) -> Result<ComposeResult> {
        let model = StoryModel::new(self.storage.clone(), payload.user_id.as_str());

        let existing_story = match payload.existing_story.filter(|s| !s.trim().is_empty()) {
            Some(story) => Some(story),
            None => model.get_latest_story_document()?.and_then(|doc| doc.story),
        };

        let extractor = UserStoryExtractor::new(self.runtime.clone(), self.agent_config.model.as_str());
        let agent_result = extractor
            .tool_call(&StoryTemplateProps {
                existing_story,
                language: payload
                    .language
                    .filter(|l| !l.trim().is_empty())
                    .or_else(|| self.agent_config.language.clone()),
                recent_events: payload.recent_events,
                retrieved_memories: payload.retrieved_memories,
                story_notes: payload.story_notes,
                user_profile: payload.user_profile,
                username: payload.username.clone(),
                additional_messages: Vec::new(),
            })
            .await?;

        let username = payload
            .username
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or("User");

        let outcome = model.upsert_story(&UpsertStoryParams {
            captured_at: Some(Utc::now()),
            diff: agent_result.diff.clone(),
            memory_ids: payload.memory_ids.or_else(|| agent_result.memory_ids.clone()),
            metadata: payload.metadata,
            reasoning: agent_result.reasoning.clone(),
            snapshot: Some(agent_result.story.clone()),
            source_ids: payload.source_ids.or_else(|| agent_result.source_ids.clone()),
            story: agent_result.story.clone(),
            summary: agent_result.summary.clone(),
            title: Some(truncate_title(&format!("User Story for {}", username))),
        })?;

        tracing::info!(
            user_id = %payload.user_id,
            version = outcome.document.version,
            diff_recorded = outcome.diff.is_some(),
            "Story composed"
        );

        Ok(ComposeResult {
            agent_result,
            document: outcome.document,
            diff: outcome.diff,
        })
    }

    /// Gather memory context for a user
    pub fn build_job_input(&self, user_id: &str) -> Result<StoryJobInput> {
        build_user_story_job_input(&self.storage, self.memories.as_ref(), user_id)
    }

    /// Build input and compose a story for each user in order
    ///
    /// Stops at the first failure.
    pub async fn process_users(&self, user_ids: &[String]) -> Result<Vec<UserStoryOutcome>> {
        let mut outcomes = Vec::with_capacity(user_ids.len());

        for user_id in user_ids {
            let input = self.build_job_input(user_id)?;
            let result = self
                .compose_story(ComposePayload::from_job_input(user_id.as_str(), input))
                .await
                .map_err(|e| {
                    tracing::error!(user_id = %user_id, error = %e, "Story composition failed");
                    e
                })?;

            outcomes.push(UserStoryOutcome {
                user_id: user_id.clone(),
                result,
            });
        }

        Ok(outcomes)
    }
}
