//! Memory Story HTTP server
//!
//! Run with: story-server

use std::net::SocketAddr;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use memory_story::config::parse_webhook_headers;
use memory_story::error::{Result, StoryError};
use memory_story::llm::create_runtime;
use memory_story::server::{ServerState, StoryServer};
use memory_story::{MemoryExtractionConfig, Storage, StorageConfig, StorageMode, StoryService};

#[derive(Parser, Debug)]
#[command(name = "story-server")]
#[command(about = "HTTP entry points for user story generation")]
#[command(version)]
struct Args {
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

    /// Address to listen on
    #[arg(long, env = "STORY_BIND", default_value = "127.0.0.1:8787")]
    bind: SocketAddr,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Model provider (overrides MEMORY_AGENT_STORY_PROVIDER)
    #[arg(long)]
    provider: Option<String>,

    /// API key (overrides MEMORY_AGENT_STORY_API_KEY and OPENAI_API_KEY)
    #[arg(long)]
    api_key: Option<String>,

    /// API base URL (overrides MEMORY_AGENT_STORY_BASE_URL)
    #[arg(long)]
    base_url: Option<String>,

    /// Chat model (overrides MEMORY_AGENT_STORY_MODEL)
    #[arg(long)]
    model: Option<String>,

    /// Story language when a request does not name one (overrides MEMORY_AGENT_STORY_LANGUAGE)
    #[arg(long)]
    language: Option<String>,

    /// Model request timeout in ms (overrides MEMORY_AGENT_STORY_TIMEOUT_MS)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Required webhook headers, key=value,key2=value2 (overrides MEMORY_WEBHOOK_HEADERS)
    #[arg(long)]
    webhook_headers: Option<String>,
}

fn init_tracing(json: bool) {
    let registry = tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::from_default_env());

    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    // Expand ~ in path
    let db_path = shellexpand::tilde(&args.db_path).to_string();

    let storage_mode: StorageMode = args.storage_mode.parse().map_err(StoryError::Config)?;
    let storage = Storage::open(StorageConfig {
        db_path,
        storage_mode,
    })?;

    if let Some(warning) = storage.storage_mode_warning() {
        tracing::warn!("{}", warning);
    }

    let mut config = MemoryExtractionConfig::from_env()?;
    let agent_config = &mut config.agent_story;
    if let Some(provider) = args.provider {
        agent_config.provider = provider;
    }
    if let Some(api_key) = args.api_key.filter(|key| !key.trim().is_empty()) {
        agent_config.api_key = Some(api_key);
    }
    if let Some(base_url) = args.base_url {
        agent_config.base_url = Some(base_url);
    }
    if let Some(model) = args.model {
        agent_config.model = model;
    }
    if let Some(language) = args.language {
        agent_config.language = Some(language);
    }
    if let Some(timeout_ms) = args.timeout_ms {
        agent_config.request_timeout_ms = timeout_ms;
    }
    if let Some(raw) = args.webhook_headers.as_deref() {
        config.webhook_headers = parse_webhook_headers(raw)?;
    }

    let MemoryExtractionConfig {
        agent_story: agent_config,
        webhook_headers,
    } = config;
    let runtime = create_runtime(&agent_config)?;

    if webhook_headers.is_empty() {
        tracing::warn!("MEMORY_WEBHOOK_HEADERS is not set; the webhook accepts unauthenticated calls");
    }

    tracing::info!(
        provider = runtime.provider(),
        model = %agent_config.model,
        max_retries = agent_config.max_retries,
        retry_budget_ms = agent_config.retry_budget_ms,
        db = %storage.db_path(),
        "Story service ready"
    );

    let service = StoryService::new(storage, runtime, agent_config);
    let state = ServerState::new(service, webhook_headers);

    StoryServer::new(state, args.bind).start().await?;

    Ok(())
}
