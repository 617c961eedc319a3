//! Memory Story - per-user narrative synthesis
//!
//! Composes a living markdown "user story" from extracted memories with one
//! LLM tool call, and keeps it as a versioned document with an append-only
//! diff history.

pub mod config;
pub mod context;
pub mod error;
pub mod extractor;
pub mod llm;
pub mod server;
pub mod service;
pub mod storage;
pub mod types;

pub use config::{MemoryExtractionConfig, StoryAgentConfig};
pub use error::{Result, StoryError};
pub use service::{ComposePayload, ComposeResult, StoryService};
pub use storage::{Storage, StoryModel};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
