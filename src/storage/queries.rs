//! Database queries for story documents and diffs
//!
//! Functions take a bare connection so callers decide the transaction
//! boundary. [`upsert_story`] must run inside one.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{Result, StoryError};
use crate::types::*;

/// Default page size for [`list_story_diffs`]
pub const DEFAULT_DIFF_LIMIT: usize = 50;

const DOCUMENT_COLUMNS: &str = "id, user_id, title, summary, story, reasoning, memory_ids,
     source_ids, metadata, version, captured_at, created_at, updated_at";

const DIFF_COLUMNS: &str = "id, user_id, story_id, diff, snapshot, summary, reasoning,
     memory_ids, source_ids, metadata, previous_version, next_version,
     captured_at, created_at, updated_at";

/// Fixed-width RFC3339 so stored timestamps sort lexicographically
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp, substituting the current time for corrupt values
pub(crate) fn parse_timestamp(value: &str) -> DateTime<Utc> {
    match DateTime::parse_from_rfc3339(value) {
        Ok(dt) => dt.with_timezone(&Utc),
        Err(e) => {
            tracing::warn!(value, error = %e, "Invalid stored timestamp, using current time");
            Utc::now()
        }
    }
}

fn parse_json_column<T: serde::de::DeserializeOwned>(
    column: &str,
    value: Option<String>,
) -> Option<T> {
    let raw = value?;
    match serde_json::from_str(&raw) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            tracing::warn!(column, error = %e, "Invalid JSON column, treating as empty");
            None
        }
    }
}

fn to_json_column<T: serde::Serialize>(value: &Option<T>) -> Result<Option<String>> {
    value
        .as_ref()
        .map(|v| serde_json::to_string(v).map_err(StoryError::from))
        .transpose()
}

/// Parse a story document from a database row
pub fn document_from_row(row: &Row) -> rusqlite::Result<StoryDocument> {
    let captured_at: String = row.get("captured_at")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(StoryDocument {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        title: row.get("title")?,
        summary: row.get("summary")?,
        story: row.get("story")?,
        reasoning: row.get("reasoning")?,
        memory_ids: parse_json_column("memory_ids", row.get("memory_ids")?),
        source_ids: parse_json_column("source_ids", row.get("source_ids")?),
        metadata: parse_json_column("metadata", row.get("metadata")?),
        version: row.get("version")?,
        captured_at: parse_timestamp(&captured_at),
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
    })
}

/// Parse a story diff from a database row
pub fn diff_from_row(row: &Row) -> rusqlite::Result<StoryDiff> {
    let captured_at: String = row.get("captured_at")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(StoryDiff {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        story_id: row.get("story_id")?,
        diff: row.get("diff")?,
        snapshot: row.get("snapshot")?,
        summary: row.get("summary")?,
        reasoning: row.get("reasoning")?,
        memory_ids: parse_json_column("memory_ids", row.get("memory_ids")?),
        source_ids: parse_json_column("source_ids", row.get("source_ids")?),
        metadata: parse_json_column("metadata", row.get("metadata")?),
        previous_version: row.get("previous_version")?,
        next_version: row.get("next_version")?,
        captured_at: parse_timestamp(&captured_at),
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
    })
}

/// Latest story document for a user
pub fn get_latest_story_document(
    conn: &Connection,
    user_id: &str,
) -> Result<Option<StoryDocument>> {
    let sql = format!(
        "SELECT {} FROM user_memory_story_documents
         WHERE user_id = ?
         ORDER BY version DESC, updated_at DESC
         LIMIT 1",
        DOCUMENT_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let document = stmt.query_row([user_id], document_from_row).optional()?;
    Ok(document)
}

/// Get a story document by id
pub fn get_story_document(conn: &Connection, id: &str) -> Result<StoryDocument> {
    let sql = format!(
        "SELECT {} FROM user_memory_story_documents WHERE id = ?",
        DOCUMENT_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    stmt.query_row([id], document_from_row)
        .optional()?
        .ok_or_else(|| StoryError::NotFound(id.to_string()))
}

/// Get a story diff by id
pub fn get_story_diff(conn: &Connection, id: &str) -> Result<StoryDiff> {
    let sql = format!(
        "SELECT {} FROM user_memory_story_diffs WHERE id = ?",
        DIFF_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    stmt.query_row([id], diff_from_row)
        .optional()?
        .ok_or_else(|| StoryError::NotFound(id.to_string()))
}

/// A user's diffs, newest first
pub fn list_story_diffs(conn: &Connection, user_id: &str, limit: usize) -> Result<Vec<StoryDiff>> {
    let sql = format!(
        "SELECT {} FROM user_memory_story_diffs
         WHERE user_id = ?
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?",
        DIFF_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let diffs = stmt
        .query_map(params![user_id, limit as i64], diff_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(diffs)
}

/// Insert a diff row for a user
pub fn insert_story_diff(conn: &Connection, user_id: &str, input: &NewStoryDiff) -> Result<StoryDiff> {
    let id = new_record_id();
    let now = format_timestamp(&Utc::now());
    let captured_at = input
        .captured_at
        .as_ref()
        .map(format_timestamp)
        .unwrap_or_else(|| now.clone());

    conn.execute(
        "INSERT INTO user_memory_story_diffs (
            id, user_id, story_id, diff, snapshot, summary, reasoning,
            memory_ids, source_ids, metadata, previous_version, next_version,
            captured_at, created_at, updated_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            id,
            user_id,
            input.story_id,
            input.diff,
            input.snapshot,
            input.summary,
            input.reasoning,
            to_json_column(&input.memory_ids)?,
            to_json_column(&input.source_ids)?,
            to_json_column(&input.metadata)?,
            input.previous_version,
            input.next_version,
            captured_at,
            now,
            now,
        ],
    )?;

    get_story_diff(conn, &id)
}

/// Create or bump the user's story document and optionally record a diff.
///
/// Fields left as `None` keep their stored value on update; `story` and
/// `version` are always written. Must be called inside a transaction.
pub fn upsert_story(
    conn: &Connection,
    user_id: &str,
    input: &UpsertStoryParams,
) -> Result<UpsertOutcome> {
    let existing = conn
        .query_row(
            "SELECT id, version FROM user_memory_story_documents WHERE user_id = ?",
            [user_id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i32>(1)?)),
        )
        .optional()?;

    let next_version = existing.as_ref().map(|(_, v)| v + 1).unwrap_or(1);
    let now = format_timestamp(&Utc::now());
    let captured_at = input.captured_at.as_ref().map(format_timestamp);
    let title = input.title.as_deref().map(truncate_title);
    let memory_ids = to_json_column(&input.memory_ids)?;
    let source_ids = to_json_column(&input.source_ids)?;
    let metadata = to_json_column(&input.metadata)?;

    let document_id = match &existing {
        Some((id, _)) => {
            conn.execute(
                "UPDATE user_memory_story_documents SET
                    title = COALESCE(?, title),
                    summary = COALESCE(?, summary),
                    story = ?,
                    reasoning = COALESCE(?, reasoning),
                    memory_ids = COALESCE(?, memory_ids),
                    source_ids = COALESCE(?, source_ids),
                    metadata = COALESCE(?, metadata),
                    version = ?,
                    captured_at = COALESCE(?, captured_at),
                    updated_at = ?
                 WHERE id = ? AND user_id = ?",
                params![
                    title,
                    input.summary,
                    input.story,
                    input.reasoning,
                    memory_ids,
                    source_ids,
                    metadata,
                    next_version,
                    captured_at,
                    now,
                    id,
                    user_id,
                ],
            )?;
            id.clone()
        }
        None => {
            let id = new_record_id();
            conn.execute(
                "INSERT INTO user_memory_story_documents (
                    id, user_id, title, summary, story, reasoning, memory_ids,
                    source_ids, metadata, version, captured_at, created_at, updated_at
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    id,
                    user_id,
                    title,
                    input.summary,
                    input.story,
                    input.reasoning,
                    memory_ids,
                    source_ids,
                    metadata,
                    next_version,
                    captured_at.clone().unwrap_or_else(|| now.clone()),
                    now,
                    now,
                ],
            )?;
            id
        }
    };

    let document = get_story_document(conn, &document_id)?;

    let diff = if input.has_diff_content() {
        let new_diff = NewStoryDiff {
            story_id: document.id.clone(),
            captured_at: input.captured_at,
            diff: input.diff.clone(),
            snapshot: input
                .snapshot
                .clone()
                .or_else(|| Some(input.story.clone())),
            summary: input.summary.clone(),
            reasoning: input.reasoning.clone(),
            memory_ids: input.memory_ids.clone(),
            source_ids: input.source_ids.clone(),
            metadata: input.metadata.clone(),
            previous_version: existing.as_ref().map(|(_, v)| *v),
            next_version: Some(document.version),
        };
        Some(insert_story_diff(conn, user_id, &new_diff)?)
    } else {
        None
    };

    tracing::debug!(
        user_id,
        version = document.version,
        diff_recorded = diff.is_some(),
        "Upserted story document"
    );

    Ok(UpsertOutcome { document, diff })
}
