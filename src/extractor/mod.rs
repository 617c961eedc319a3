//! Story extraction: prompt construction and the `commit_user_story` tool call

mod prompt;
mod story;

pub use prompt::{render_placeholder_template, STORY_TOP_K, USER_STORY_PROMPT};
pub use story::{
    parse_extraction_result, StoryExtractionResult, StoryTemplateProps, UserStoryExtractor,
    COMMIT_USER_STORY_TOOL,
};
