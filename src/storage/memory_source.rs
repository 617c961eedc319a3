//! Read access to extracted user memories
//!
//! The extraction pipeline owns these tables; story composition only reads
//! them. Insert helpers exist for seeding (CLI, tests).

use chrono::Utc;
use rusqlite::{params, Connection, Row};

use super::queries::{format_timestamp, parse_timestamp};
use super::Storage;
use crate::error::Result;
use crate::types::*;

/// Source of memories used to assemble story context
pub trait MemorySource: Send + Sync {
    /// All identities for the user, with their linked memory when present
    fn identities_with_memory(&self, user_id: &str) -> Result<Vec<MemoryIdentity>>;

    /// Newest memories of one layer
    fn list_memories(
        &self,
        user_id: &str,
        layer: MemoryLayer,
        page_size: usize,
    ) -> Result<Vec<UserMemory>>;

    /// Newest memories across all layers
    fn recent_memories(&self, user_id: &str, limit: usize) -> Result<Vec<UserMemory>>;
}

/// [`MemorySource`] backed by the story database
#[derive(Clone)]
pub struct SqliteMemorySource {
    storage: Storage,
}

impl SqliteMemorySource {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }
}

impl MemorySource for SqliteMemorySource {
    fn identities_with_memory(&self, user_id: &str) -> Result<Vec<MemoryIdentity>> {
        self.storage
            .with_connection(|conn| list_identities_with_memory(conn, user_id))
    }

    fn list_memories(
        &self,
        user_id: &str,
        layer: MemoryLayer,
        page_size: usize,
    ) -> Result<Vec<UserMemory>> {
        self.storage
            .with_connection(|conn| list_memories_by_layer(conn, user_id, layer, page_size))
    }

    fn recent_memories(&self, user_id: &str, limit: usize) -> Result<Vec<UserMemory>> {
        self.storage
            .with_connection(|conn| list_recent_memories(conn, user_id, limit))
    }
}

fn memory_from_row(row: &Row) -> rusqlite::Result<UserMemory> {
    let layer: String = row.get("layer")?;
    let captured_at: String = row.get("captured_at")?;
    let created_at: String = row.get("created_at")?;

    Ok(UserMemory {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        layer: layer.parse().unwrap_or_else(|_| {
            tracing::warn!(layer = %layer, "Unknown memory layer, treating as context");
            MemoryLayer::Context
        }),
        title: row.get("title")?,
        summary: row.get("summary")?,
        details: row.get("details")?,
        captured_at: parse_timestamp(&captured_at),
        created_at: parse_timestamp(&created_at),
    })
}

/// Newest memories of a layer for a user
pub fn list_memories_by_layer(
    conn: &Connection,
    user_id: &str,
    layer: MemoryLayer,
    page_size: usize,
) -> Result<Vec<UserMemory>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, user_id, layer, title, summary, details, captured_at, created_at
         FROM user_memories
         WHERE user_id = ? AND layer = ?
         ORDER BY captured_at DESC, rowid DESC
         LIMIT ?",
    )?;
    let memories = stmt
        .query_map(
            params![user_id, layer.as_str(), page_size as i64],
            memory_from_row,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(memories)
}

/// Newest memories across layers for a user
pub fn list_recent_memories(conn: &Connection, user_id: &str, limit: usize) -> Result<Vec<UserMemory>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, user_id, layer, title, summary, details, captured_at, created_at
         FROM user_memories
         WHERE user_id = ?
         ORDER BY captured_at DESC, rowid DESC
         LIMIT ?",
    )?;
    let memories = stmt
        .query_map(params![user_id, limit as i64], memory_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(memories)
}

/// Identities joined with their source memory
pub fn list_identities_with_memory(conn: &Connection, user_id: &str) -> Result<Vec<MemoryIdentity>> {
    let mut stmt = conn.prepare_cached(
        "SELECT i.id, i.user_id, i.memory_id, i.type, i.role, i.relationship,
                i.description, i.captured_at, m.title AS memory_title,
                m.summary AS memory_summary
         FROM user_memory_identities i
         LEFT JOIN user_memories m ON m.id = i.memory_id
         WHERE i.user_id = ?
         ORDER BY i.captured_at DESC, i.rowid DESC",
    )?;
    let identities = stmt
        .query_map([user_id], |row| {
            let captured_at: String = row.get("captured_at")?;
            Ok(MemoryIdentity {
                id: row.get("id")?,
                user_id: row.get("user_id")?,
                memory_id: row.get("memory_id")?,
                identity_type: row.get("type")?,
                role: row.get("role")?,
                relationship: row.get("relationship")?,
                description: row.get("description")?,
                captured_at: parse_timestamp(&captured_at),
                memory_title: row.get("memory_title")?,
                memory_summary: row.get("memory_summary")?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(identities)
}

/// Insert a memory record
pub fn insert_memory(conn: &Connection, user_id: &str, input: &NewUserMemory) -> Result<UserMemory> {
    let now = Utc::now();
    let memory = UserMemory {
        id: new_record_id(),
        user_id: user_id.to_string(),
        layer: input.layer,
        title: input.title.clone(),
        summary: input.summary.clone(),
        details: input.details.clone(),
        captured_at: input.captured_at.unwrap_or(now),
        created_at: now,
    };

    conn.execute(
        "INSERT INTO user_memories (id, user_id, layer, title, summary, details, captured_at, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            memory.id,
            memory.user_id,
            memory.layer.as_str(),
            memory.title,
            memory.summary,
            memory.details,
            format_timestamp(&memory.captured_at),
            format_timestamp(&memory.created_at),
        ],
    )?;

    Ok(memory)
}

/// Insert an identity record
pub fn insert_identity(
    conn: &Connection,
    user_id: &str,
    input: &NewMemoryIdentity,
) -> Result<RecordId> {
    let id = new_record_id();
    let now = Utc::now();
    let captured_at = input.captured_at.unwrap_or(now);

    conn.execute(
        "INSERT INTO user_memory_identities
            (id, user_id, memory_id, type, role, relationship, description, captured_at, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            id,
            user_id,
            input.memory_id,
            input.identity_type,
            input.role,
            input.relationship,
            input.description,
            format_timestamp(&captured_at),
            format_timestamp(&now),
        ],
    )?;

    Ok(id)
}
