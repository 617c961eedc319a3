//! Runtime configuration for the story agent and webhook entry points

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Result, StoryError};

/// Default chat model for story composition
pub const DEFAULT_STORY_MODEL: &str = "gpt-4o-mini";

/// Default provider name
pub const DEFAULT_PROVIDER: &str = "openai";

/// Model settings for the story agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryAgentConfig {
    /// Provider name ("openai" for any OpenAI-compatible endpoint)
    pub provider: String,
    pub api_key: Option<String>,
    /// API base URL override (OpenRouter, Azure, local gateways)
    pub base_url: Option<String>,
    pub model: String,
    /// Preferred output language used when a request does not name one
    pub language: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// Total time a call may spend waiting between retries (0 disables the cap)
    #[serde(default = "default_retry_budget_ms")]
    pub retry_budget_ms: u64,
}

fn default_timeout_ms() -> u64 {
    120_000
}

fn default_max_retries() -> usize {
    2
}

fn default_retry_budget_ms() -> u64 {
    30_000
}

impl Default for StoryAgentConfig {
    fn default() -> Self {
        Self {
            provider: DEFAULT_PROVIDER.to_string(),
            api_key: None,
            base_url: None,
            model: DEFAULT_STORY_MODEL.to_string(),
            language: None,
            request_timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            retry_budget_ms: default_retry_budget_ms(),
        }
    }
}

impl StoryAgentConfig {
    /// Create config from environment variables
    ///
    /// `MEMORY_AGENT_STORY_API_KEY` falls back to `OPENAI_API_KEY`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build config from any variable source; blank values count as unset
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| non_empty(lookup(name));
        let defaults = Self::default();
        Self {
            provider: var("MEMORY_AGENT_STORY_PROVIDER").unwrap_or(defaults.provider),
            api_key: var("MEMORY_AGENT_STORY_API_KEY").or_else(|| var("OPENAI_API_KEY")),
            base_url: var("MEMORY_AGENT_STORY_BASE_URL"),
            model: var("MEMORY_AGENT_STORY_MODEL").unwrap_or(defaults.model),
            language: var("MEMORY_AGENT_STORY_LANGUAGE"),
            request_timeout_ms: var("MEMORY_AGENT_STORY_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.request_timeout_ms),
            max_retries: var("MEMORY_AGENT_STORY_MAX_RETRIES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_retries),
            retry_budget_ms: var("MEMORY_AGENT_STORY_RETRY_BUDGET_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.retry_budget_ms),
        }
    }
}

/// Full configuration consumed by the HTTP entry points
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryExtractionConfig {
    pub agent_story: StoryAgentConfig,
    /// Headers every webhook call must carry with exactly these values
    #[serde(default)]
    pub webhook_headers: BTreeMap<String, String>,
}

impl MemoryExtractionConfig {
    /// Create config from environment variables
    pub fn from_env() -> Result<Self> {
        let webhook_headers = match non_empty_env("MEMORY_WEBHOOK_HEADERS") {
            Some(raw) => parse_webhook_headers(&raw)?,
            None => BTreeMap::new(),
        };

        Ok(Self {
            agent_story: StoryAgentConfig::from_env(),
            webhook_headers,
        })
    }
}

/// Parse `key=value,key2=value2` into a header map
///
/// Blank entries are skipped. Keys are lowercased since HTTP header names
/// are case-insensitive.
pub fn parse_webhook_headers(raw: &str) -> Result<BTreeMap<String, String>> {
    let mut headers = BTreeMap::new();

    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }

        let (key, value) = entry.split_once('=').ok_or_else(|| {
            StoryError::Config(format!(
                "Invalid webhook header entry '{}': expected key=value",
                entry
            ))
        })?;

        let key = key.trim();
        if key.is_empty() {
            return Err(StoryError::Config(format!(
                "Invalid webhook header entry '{}': empty header name",
                entry
            )));
        }

        headers.insert(key.to_ascii_lowercase(), value.trim().to_string());
    }

    Ok(headers)
}

fn non_empty_env(name: &str) -> Option<String> {
    non_empty(std::env::var(name).ok())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
