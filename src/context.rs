//! Story job input assembly
//!
//! Collects the user's stored story and memories and renders them into the
//! `retrieved_memories` text handed to the story extractor.

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::{MemorySource, Storage, StoryModel};
use crate::types::{MemoryIdentity, MemoryLayer, RecordId, UserMemory};

/// Context memories included per job
pub const CONTEXT_PAGE_SIZE: usize = 3;
/// Preference memories included per job
pub const PREFERENCE_PAGE_SIZE: usize = 10;
/// Recent memories listed per job (their ids become the story's memory ids)
pub const RECENT_MEMORY_LIMIT: usize = 20;

const CONTEXT_SCOPE: &str = "user-story-memories";
const IDENTITY_SCOPE: &str = "user-story-memories-identities";

/// Inputs gathered for one user's story run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryJobInput {
    pub existing_story: Option<String>,
    pub memory_ids: Vec<RecordId>,
    pub retrieved_memories: Option<String>,
}

/// Gather the stored story and memory context for `user_id`
pub fn build_user_story_job_input(
    storage: &Storage,
    memories: &dyn MemorySource,
    user_id: &str,
) -> Result<StoryJobInput> {
    let latest = StoryModel::new(storage.clone(), user_id).get_latest_story_document()?;

    let identities = memories.identities_with_memory(user_id)?;
    let contexts = memories.list_memories(user_id, MemoryLayer::Context, CONTEXT_PAGE_SIZE)?;
    let preferences =
        memories.list_memories(user_id, MemoryLayer::Preference, PREFERENCE_PAGE_SIZE)?;
    let recent = memories.recent_memories(user_id, RECENT_MEMORY_LIMIT)?;

    let recent_lines = recent_memory_lines(&recent);
    let recent_section = if recent_lines.is_empty() {
        String::new()
    } else {
        format!("## Recent Memories\n{}", recent_lines)
    };

    let parts = [
        recent_section,
        build_context_block(user_id, &contexts, &preferences),
        build_identity_block(user_id, &identities),
    ];
    let assembled = parts
        .iter()
        .filter(|part| !part.is_empty())
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("\n\n");

    tracing::debug!(
        user_id,
        identities = identities.len(),
        contexts = contexts.len(),
        preferences = preferences.len(),
        recent = recent.len(),
        "Assembled story job input"
    );

    Ok(StoryJobInput {
        existing_story: latest
            .and_then(|doc| doc.story)
            .filter(|story| !story.is_empty()),
        memory_ids: recent.into_iter().map(|m| m.id).collect(),
        retrieved_memories: (!assembled.is_empty()).then_some(assembled),
    })
}

/// One `- [timestamp] title — summary` line per memory
pub fn recent_memory_lines(memories: &[UserMemory]) -> String {
    memories
        .iter()
        .map(|m| {
            let date = m.captured_at.to_rfc3339_opts(SecondsFormat::Millis, true);
            let title = m
                .title
                .as_deref()
                .filter(|t| !t.is_empty())
                .unwrap_or("Untitled memory");
            let summary = m
                .summary
                .as_deref()
                .filter(|s| !s.is_empty())
                .or(m.details.as_deref())
                .unwrap_or("");
            format!("- [{}] {} — {}", date, title, summary)
                .trim()
                .to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Context and preference memories as an XML block; empty when there are none
pub fn build_context_block(
    user_id: &str,
    contexts: &[UserMemory],
    preferences: &[UserMemory],
) -> String {
    if contexts.is_empty() && preferences.is_empty() {
        return String::new();
    }

    let mut xml = format!(
        "<user_memory_context user_id=\"{}\" scope=\"{}\">\n",
        escape_xml(user_id),
        CONTEXT_SCOPE
    );
    push_memory_group(&mut xml, "contexts", "context", contexts);
    push_memory_group(&mut xml, "preferences", "preference", preferences);
    xml.push_str("</user_memory_context>");
    xml
}

fn push_memory_group(xml: &mut String, group: &str, tag: &str, memories: &[UserMemory]) {
    if memories.is_empty() {
        return;
    }

    xml.push_str(&format!("  <{}>\n", group));
    for memory in memories {
        xml.push_str(&format!(
            "    <{} id=\"{}\" captured_at=\"{}\">\n",
            tag,
            escape_xml(&memory.id),
            memory.captured_at.to_rfc3339_opts(SecondsFormat::Millis, true)
        ));
        push_text_element(xml, "title", memory.title.as_deref());
        push_text_element(xml, "summary", memory.summary.as_deref());
        push_text_element(xml, "details", memory.details.as_deref());
        xml.push_str(&format!("    </{}>\n", tag));
    }
    xml.push_str(&format!("  </{}>\n", group));
}

/// Identity records as an XML block; empty when there are none
pub fn build_identity_block(user_id: &str, identities: &[MemoryIdentity]) -> String {
    if identities.is_empty() {
        return String::new();
    }

    let mut xml = format!(
        "<user_memory_identities user_id=\"{}\" scope=\"{}\">\n",
        escape_xml(user_id),
        IDENTITY_SCOPE
    );

    for identity in identities {
        xml.push_str(&format!("    <identity id=\"{}\"", escape_xml(&identity.id)));
        for (name, value) in [
            ("type", identity.identity_type.as_deref()),
            ("role", identity.role.as_deref()),
            ("relationship", identity.relationship.as_deref()),
        ] {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                xml.push_str(&format!(" {}=\"{}\"", name, escape_xml(value)));
            }
        }
        xml.push_str(&format!(
            " captured_at=\"{}\">\n",
            identity.captured_at.to_rfc3339_opts(SecondsFormat::Millis, true)
        ));
        push_text_element(&mut xml, "description", identity.description.as_deref());
        push_text_element(&mut xml, "memory_title", identity.memory_title.as_deref());
        push_text_element(&mut xml, "memory_summary", identity.memory_summary.as_deref());
        xml.push_str("    </identity>\n");
    }

    xml.push_str("</user_memory_identities>");
    xml
}

fn push_text_element(xml: &mut String, tag: &str, value: Option<&str>) {
    if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
        xml.push_str(&format!("      <{tag}>{}</{tag}>\n", escape_xml(value)));
    }
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
