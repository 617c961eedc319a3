//! Database migrations for memory-story

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Run all migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    if current_version < SCHEMA_VERSION {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Story documents and diffs (v1)
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- One row per user, latest version only
        CREATE TABLE IF NOT EXISTS user_memory_story_documents (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            title TEXT,
            summary TEXT,
            story TEXT,
            reasoning TEXT,
            memory_ids TEXT,          -- JSON array
            source_ids TEXT,          -- JSON array
            metadata TEXT,            -- JSON object
            version INTEGER NOT NULL DEFAULT 1,
            captured_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS user_story_documents_user_id_unique
            ON user_memory_story_documents(user_id);

        -- Append-only change log
        CREATE TABLE IF NOT EXISTS user_memory_story_diffs (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            story_id TEXT NOT NULL,
            diff TEXT,
            snapshot TEXT,
            summary TEXT,
            reasoning TEXT,
            memory_ids TEXT,
            source_ids TEXT,
            metadata TEXT,
            previous_version INTEGER,
            next_version INTEGER,
            captured_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (story_id) REFERENCES user_memory_story_documents(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS user_story_diffs_story_id_index
            ON user_memory_story_diffs(story_id);
        CREATE INDEX IF NOT EXISTS user_story_diffs_user_id_index
            ON user_memory_story_diffs(user_id, created_at DESC);

        INSERT INTO schema_version (version) VALUES (1);
        "#,
    )?;

    Ok(())
}

/// Memory source tables (v2)
///
/// Written by the upstream extraction pipeline; this crate reads them to
/// assemble story context.
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS user_memories (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            layer TEXT NOT NULL,      -- context, preference, identity, experience, activity
            title TEXT,
            summary TEXT,
            details TEXT,
            captured_at TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_user_memories_user_captured
            ON user_memories(user_id, captured_at DESC);
        CREATE INDEX IF NOT EXISTS idx_user_memories_user_layer
            ON user_memories(user_id, layer, captured_at DESC);

        CREATE TABLE IF NOT EXISTS user_memory_identities (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            memory_id TEXT,
            type TEXT,
            role TEXT,
            relationship TEXT,
            description TEXT,
            captured_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY (memory_id) REFERENCES user_memories(id) ON DELETE SET NULL
        );

        CREATE INDEX IF NOT EXISTS idx_user_memory_identities_user
            ON user_memory_identities(user_id);

        INSERT INTO schema_version (version) VALUES (2);
        "#,
    )?;

    Ok(())
}
