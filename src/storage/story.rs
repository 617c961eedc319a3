//! Per-user story model
//!
//! Scopes every read and write to one user ID.

use super::queries;
use super::Storage;
use crate::error::Result;
use crate::types::{NewStoryDiff, StoryDiff, StoryDocument, UpsertOutcome, UpsertStoryParams};

/// Versioned story document store for a single user
#[derive(Clone)]
pub struct StoryModel {
    storage: Storage,
    user_id: String,
}

impl StoryModel {
    pub fn new(storage: Storage, user_id: impl Into<String>) -> Self {
        Self {
            storage,
            user_id: user_id.into(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// The user's current story, if any
    pub fn get_latest_story_document(&self) -> Result<Option<StoryDocument>> {
        self.storage
            .with_connection(|conn| queries::get_latest_story_document(conn, &self.user_id))
    }

    /// Alias of [`Self::get_latest_story_document`]
    pub fn get_latest_document(&self) -> Result<Option<StoryDocument>> {
        self.get_latest_story_document()
    }

    /// The user's diffs, newest first
    pub fn list_diffs(&self, limit: Option<usize>) -> Result<Vec<StoryDiff>> {
        let limit = limit.unwrap_or(queries::DEFAULT_DIFF_LIMIT);
        self.storage
            .with_connection(|conn| queries::list_story_diffs(conn, &self.user_id, limit))
    }

    /// Append a diff for this user against an explicit story
    pub fn append_diff(&self, input: &NewStoryDiff) -> Result<StoryDiff> {
        self.storage
            .with_connection(|conn| queries::insert_story_diff(conn, &self.user_id, input))
    }

    /// Create or update the story in one transaction, recording a diff when
    /// the update carries change information
    pub fn upsert_story(&self, input: &UpsertStoryParams) -> Result<UpsertOutcome> {
        self.storage
            .with_transaction(|conn| queries::upsert_story(conn, &self.user_id, input))
    }
}
