//! Storage engine for memory-story
//!
//! Handles SQLite connection setup, schema management, the versioned story
//! tables and read access to extracted memories.

mod connection;
mod memory_source;
mod migrations;
pub mod queries;
mod story;

pub use connection::Storage;
pub use memory_source::{
    insert_identity, insert_memory, list_identities_with_memory, list_memories_by_layer,
    list_recent_memories, MemorySource, SqliteMemorySource,
};
pub use migrations::SCHEMA_VERSION;
pub use story::StoryModel;
