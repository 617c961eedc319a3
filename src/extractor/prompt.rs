//! Prompt templates and placeholder rendering

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// Number of memory signals the system prompt asks the model to weigh
pub const STORY_TOP_K: usize = 10;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap());

/// System prompt for the story agent
///
/// Placeholders: `username`, `language`, `topK`.
pub const USER_STORY_PROMPT: &str = r#"You are the biographer of {{ username }}, maintaining a living "user story" document.

The story is a second-person markdown narrative ("You are...", "You prefer...") that captures who {{ username }} is: identity and roles, the people and relationships that matter to them, stable preferences, ongoing projects and goals, and notable recent events.

How to work:
- Start from the existing story when one is provided. Keep what is still true, revise what changed, and remove what is contradicted by newer signals.
- Weigh at most the {{ topK }} most relevant memory signals. Prefer recent, specific and repeated signals over one-off remarks.
- Never invent facts. If the signals are thin, write a shorter story.
- Do not include secrets, credentials, or sensitive data such as health or financial details unless the user explicitly asked to keep them.
- Organize the story with short markdown sections (for example: About You, People, Preferences, Current Focus, Recent Highlights).
- Write the story, summary and diff in {{ language }}.

When you are done, call the `commit_user_story` tool exactly once with:
- `story`: the complete updated markdown story (not a patch)
- `summary`: a 2-3 line executive summary
- `diff`: a bullet list of the changes applied this run
- `reasoning`: why these changes were applied
- `memoryIds` / `sourceIds`: identifiers of the memories and sources you relied on, when they are visible in the input
"#;

/// Replace `{{ key }}` placeholders with values from `props`.
///
/// Whitespace inside the braces is ignored. Placeholders with no value
/// render as an empty string.
pub fn render_placeholder_template(template: &str, props: &HashMap<&str, String>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures| {
            props.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}
