//! Core types for memory-story

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identifier for story documents, diffs and memories
pub type RecordId = String;

/// Free-form JSON metadata attached to documents and diffs
pub type Metadata = HashMap<String, serde_json::Value>;

/// Maximum stored title length (mirrors a varchar(255) column)
pub const MAX_TITLE_LENGTH: usize = 255;

/// Length of generated record identifiers
pub const RECORD_ID_LENGTH: usize = 18;

/// The current story for a user. One row per user; only the latest version is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryDocument {
    pub id: RecordId,
    pub user_id: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    /// Complete markdown story
    pub story: Option<String>,
    pub reasoning: Option<String>,
    pub memory_ids: Option<Vec<String>>,
    pub source_ids: Option<Vec<String>>,
    pub metadata: Option<Metadata>,
    /// Monotonic version, starts at 1
    pub version: i32,
    pub captured_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Immutable record of one story update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryDiff {
    pub id: RecordId,
    pub user_id: String,
    pub story_id: RecordId,
    /// Bullet list of changes applied this run
    pub diff: Option<String>,
    /// Full story text at `next_version`
    pub snapshot: Option<String>,
    pub summary: Option<String>,
    pub reasoning: Option<String>,
    pub memory_ids: Option<Vec<String>>,
    pub source_ids: Option<Vec<String>>,
    pub metadata: Option<Metadata>,
    /// None when the diff created the document
    pub previous_version: Option<i32>,
    pub next_version: Option<i32>,
    pub captured_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for [`crate::storage::StoryModel::upsert_story`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertStoryParams {
    /// Defaults to now
    pub captured_at: Option<DateTime<Utc>>,
    pub diff: Option<String>,
    pub memory_ids: Option<Vec<String>>,
    pub metadata: Option<Metadata>,
    pub reasoning: Option<String>,
    /// Defaults to `story` when a diff row is written
    pub snapshot: Option<String>,
    pub source_ids: Option<Vec<String>>,
    pub story: String,
    pub summary: Option<String>,
    pub title: Option<String>,
}

impl UpsertStoryParams {
    /// Whether this update carries enough change information to record a diff
    pub fn has_diff_content(&self) -> bool {
        fn present(value: &Option<String>) -> bool {
            value.as_deref().is_some_and(|s| !s.is_empty())
        }
        fn non_empty(ids: &Option<Vec<String>>) -> bool {
            ids.as_ref().is_some_and(|ids| !ids.is_empty())
        }

        present(&self.diff)
            || present(&self.snapshot)
            || present(&self.reasoning)
            || non_empty(&self.memory_ids)
            || non_empty(&self.source_ids)
    }
}

/// Input for [`crate::storage::StoryModel::append_diff`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewStoryDiff {
    pub story_id: RecordId,
    pub captured_at: Option<DateTime<Utc>>,
    pub diff: Option<String>,
    pub snapshot: Option<String>,
    pub summary: Option<String>,
    pub reasoning: Option<String>,
    pub memory_ids: Option<Vec<String>>,
    pub source_ids: Option<Vec<String>>,
    pub metadata: Option<Metadata>,
    pub previous_version: Option<i32>,
    pub next_version: Option<i32>,
}

/// Result of an upsert: the written document and the diff, if one was recorded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertOutcome {
    pub document: StoryDocument,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<StoryDiff>,
}

/// Memory layer produced by the upstream extraction pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryLayer {
    Context,
    Preference,
    Identity,
    Experience,
    Activity,
}

impl MemoryLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryLayer::Context => "context",
            MemoryLayer::Preference => "preference",
            MemoryLayer::Identity => "identity",
            MemoryLayer::Experience => "experience",
            MemoryLayer::Activity => "activity",
        }
    }
}

impl std::fmt::Display for MemoryLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryLayer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "context" => Ok(MemoryLayer::Context),
            "preference" => Ok(MemoryLayer::Preference),
            "identity" => Ok(MemoryLayer::Identity),
            "experience" => Ok(MemoryLayer::Experience),
            "activity" => Ok(MemoryLayer::Activity),
            _ => Err(format!("Unknown memory layer: {}", s)),
        }
    }
}

/// An extracted memory about a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMemory {
    pub id: RecordId,
    pub user_id: String,
    pub layer: MemoryLayer,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub details: Option<String>,
    pub captured_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Input for inserting a memory record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUserMemory {
    pub layer: MemoryLayer,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub details: Option<String>,
    /// Defaults to now
    pub captured_at: Option<DateTime<Utc>>,
}

/// An identity fact about the user (a person, role or relationship in their life)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryIdentity {
    pub id: RecordId,
    pub user_id: String,
    pub memory_id: Option<RecordId>,
    /// e.g. "personal", "professional"
    pub identity_type: Option<String>,
    pub role: Option<String>,
    pub relationship: Option<String>,
    pub description: Option<String>,
    pub captured_at: DateTime<Utc>,
    /// Title of the linked memory, when there is one
    pub memory_title: Option<String>,
    /// Summary of the linked memory, when there is one
    pub memory_summary: Option<String>,
}

/// Input for inserting an identity record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMemoryIdentity {
    pub memory_id: Option<RecordId>,
    pub identity_type: Option<String>,
    pub role: Option<String>,
    pub relationship: Option<String>,
    pub description: Option<String>,
    pub captured_at: Option<DateTime<Utc>>,
}

/// Configuration for the storage engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database
    pub db_path: String,
    /// Storage mode (local or cloud-safe)
    #[serde(default)]
    pub storage_mode: StorageMode,
}

impl StorageConfig {
    pub fn in_memory() -> Self {
        Self {
            db_path: ":memory:".to_string(),
            storage_mode: StorageMode::Local,
        }
    }
}

/// Storage mode for SQLite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StorageMode {
    #[default]
    Local,
    CloudSafe,
}

impl std::str::FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(StorageMode::Local),
            "cloud-safe" => Ok(StorageMode::CloudSafe),
            _ => Err(format!("Unknown storage mode: {}", s)),
        }
    }
}

/// Generate an 18-character alphanumeric record id
pub fn new_record_id() -> RecordId {
    use rand::distributions::Alphanumeric;
    use rand::Rng;

    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RECORD_ID_LENGTH)
        .map(char::from)
        .collect()
}

/// Clamp a title to [`MAX_TITLE_LENGTH`] characters
pub fn truncate_title(title: &str) -> String {
    title.chars().take(MAX_TITLE_LENGTH).collect()
}
