//! Memory Story CLI
//!
//! Operator commands for stories, diffs and seeded memories.

use clap::{Parser, Subcommand};

use memory_story::error::{Result, StoryError};
use memory_story::llm::create_runtime;
use memory_story::service::ComposePayload;
use memory_story::storage::{insert_identity, insert_memory};
use memory_story::types::*;
use memory_story::{MemoryExtractionConfig, Storage, StoryModel, StoryService};

#[derive(Parser)]
#[command(name = "story-cli")]
#[command(about = "User story synthesis CLI")]
#[command(version)]
struct Cli {
    /// Database path
    #[arg(
        long,
        env = "STORY_DB_PATH",
        default_value = "~/.local/share/memory-story/stories.db"
    )]
    db_path: String,

    /// Storage mode (local or cloud-safe)
    #[arg(long, env = "STORY_STORAGE_MODE", default_value = "local")]
    storage_mode: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compose stories for one or more users from their stored memories
    Compose {
        /// User IDs, processed in order
        #[arg(required = true)]
        user_ids: Vec<String>,
        /// Display name used in the prompt and title
        #[arg(short, long)]
        username: Option<String>,
        /// Story language (defaults to MEMORY_AGENT_STORY_LANGUAGE)
        #[arg(short, long)]
        language: Option<String>,
        /// Extra notes or requests for the story
        #[arg(short, long)]
        notes: Option<String>,
    },
    /// Show the current story for a user
    Show {
        user_id: String,
        /// Print the full document as JSON
        #[arg(long)]
        json: bool,
    },
    /// List story diffs for a user, newest first
    Diffs {
        user_id: String,
        /// Maximum number to return
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },
    /// Print the memory context a compose run would use
    Context { user_id: String },
    /// Add a memory record
    AddMemory {
        user_id: String,
        /// Layer (context, preference, identity, experience, activity)
        #[arg(short = 'L', long, default_value = "context")]
        layer: String,
        #[arg(short, long)]
        title: Option<String>,
        #[arg(short, long)]
        summary: Option<String>,
        #[arg(short, long)]
        details: Option<String>,
    },
    /// Add an identity record
    AddIdentity {
        user_id: String,
        /// Linked memory ID
        #[arg(short, long)]
        memory_id: Option<String>,
        /// Identity type (e.g. personal, professional)
        #[arg(short = 'T', long)]
        r#type: Option<String>,
        #[arg(short, long)]
        role: Option<String>,
        #[arg(long)]
        relationship: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Expand ~ in path
    let db_path = shellexpand::tilde(&cli.db_path).to_string();
    let storage_mode: StorageMode = cli.storage_mode.parse().map_err(StoryError::Config)?;

    let storage = Storage::open(StorageConfig {
        db_path,
        storage_mode,
    })?;

    match cli.command {
        Commands::Compose {
            user_ids,
            username,
            language,
            notes,
        } => {
            let config = MemoryExtractionConfig::from_env()?;
            let runtime = create_runtime(&config.agent_story)?;
            let service = StoryService::new(storage, runtime, config.agent_story);

            for user_id in user_ids {
                let input = service.build_job_input(&user_id)?;
                let payload = ComposePayload {
                    username: username.clone(),
                    language: language.clone(),
                    story_notes: notes.clone(),
                    ..ComposePayload::from_job_input(user_id.as_str(), input)
                };
                let result = service.compose_story(payload).await?;

                println!(
                    "{}: v{} (document {}{})",
                    user_id,
                    result.document.version,
                    result.document.id,
                    result
                        .diff
                        .as_ref()
                        .map(|d| format!(", diff {}", d.id))
                        .unwrap_or_default()
                );
                if let Some(summary) = &result.agent_result.summary {
                    println!("  {}", truncate(summary, 100));
                }
            }
        }

        Commands::Show { user_id, json } => {
            let model = StoryModel::new(storage, user_id.as_str());
            match model.get_latest_story_document()? {
                Some(document) if json => {
                    println!("{}", serde_json::to_string_pretty(&document)?);
                }
                Some(document) => {
                    println!(
                        "{} (v{}, updated {})",
                        document.title.as_deref().unwrap_or("Untitled"),
                        document.version,
                        document.updated_at.format("%Y-%m-%d %H:%M")
                    );
                    println!();
                    println!("{}", document.story.unwrap_or_default());
                }
                None => println!("No story for {}", user_id),
            }
        }

        Commands::Diffs { user_id, limit } => {
            let model = StoryModel::new(storage, user_id.as_str());
            for diff in model.list_diffs(Some(limit))? {
                let previous = diff
                    .previous_version
                    .map(|v| format!("v{}", v))
                    .unwrap_or_else(|| "new".to_string());
                let next = diff
                    .next_version
                    .map(|v| format!("v{}", v))
                    .unwrap_or_else(|| "?".to_string());
                println!(
                    "{} {} -> {} ({}) - {}",
                    diff.id,
                    previous,
                    next,
                    diff.created_at.format("%Y-%m-%d %H:%M"),
                    truncate(diff.summary.as_deref().unwrap_or(""), 60)
                );
            }
        }

        Commands::Context { user_id } => {
            let memories = memory_story::storage::SqliteMemorySource::new(storage.clone());
            let input =
                memory_story::context::build_user_story_job_input(&storage, &memories, &user_id)?;
            println!("{}", serde_json::to_string_pretty(&input)?);
        }

        Commands::AddMemory {
            user_id,
            layer,
            title,
            summary,
            details,
        } => {
            let layer: MemoryLayer = layer.parse().map_err(StoryError::InvalidInput)?;
            let input = NewUserMemory {
                layer,
                title,
                summary,
                details,
                captured_at: None,
            };

            let memory = storage.with_transaction(|conn| insert_memory(conn, &user_id, &input))?;
            println!("Created memory {}", memory.id);
        }

        Commands::AddIdentity {
            user_id,
            memory_id,
            r#type,
            role,
            relationship,
            description,
        } => {
            let input = NewMemoryIdentity {
                memory_id,
                identity_type: r#type,
                role,
                relationship,
                description,
                captured_at: None,
            };

            let id = storage.with_transaction(|conn| insert_identity(conn, &user_id, &input))?;
            println!("Created identity {}", id);
        }
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    let first_line = s.lines().next().unwrap_or(s);
    if first_line.chars().count() <= max {
        first_line.to_string()
    } else {
        let head: String = first_line.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
