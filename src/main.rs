//! Presence - Main CLI
//!
//! Turns real development activity into evaluated, published content.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use presence::embeddings::provider_from_config;
use presence::ingestion::{ClaudeLogParser, GitHubClient};
use presence::knowledge::ingest::{ingest_own_conversation, ingest_own_post, InsightExtractor};
use presence::knowledge::KnowledgeStore;
use presence::output::XClient;
use presence::pipeline::{poll_once, Pipeline, PromptRef};
use presence::storage::Database;
use presence::synthesis::generator::CommitRef;
use presence::synthesis::AnthropicModel;
use presence::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "presence")]
#[command(about = "Turn real development activity into published content")]
struct Cli {
    /// Path to the YAML config file (default: config.local.yaml, then config.yaml)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one poll cycle: ingest new activity, synthesize, evaluate, post
    Poll,

    /// Retry queued posts that passed evaluation but were never published
    Retry,

    /// Post a thread summarizing recent activity
    Digest {
        /// How far back to look for commits and prompts
        #[arg(long, default_value_t = 24)]
        hours: i64,
    },

    /// Ingest published posts and session prompts into the knowledge base
    BuildKnowledge,

    /// Create the database file and write a starter config
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,presence=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref().map(Path::new))?;

    match cli.command {
        Commands::Poll => run_poll(config).await,
        Commands::Retry => run_retry(config).await,
        Commands::Digest { hours } => run_digest(config, hours).await,
        Commands::BuildKnowledge => run_build_knowledge(config).await,
        Commands::Init => run_init(config),
    }
}

fn build_pipeline(config: &Config, db: Arc<Database>) -> Result<Pipeline> {
    let model = Arc::new(AnthropicModel::new(
        &config.anthropic.api_key,
        &config.synthesis.model,
    ));
    let publisher = Arc::new(XClient::new(&config.x.bearer_token));
    let mut pipeline = Pipeline::new(
        db.clone(),
        model,
        publisher,
        config.synthesis.eval_threshold,
        Duration::from_secs(config.polling.post_delay_secs),
    );

    // Knowledge retrieval is opt-in: without an embedding key, the
    // pipeline generates from activity alone.
    if !config.knowledge.api_key.is_empty() {
        let embedder = provider_from_config(&config.knowledge)?;
        pipeline = pipeline.with_knowledge(Arc::new(KnowledgeStore::new(db, embedder)));
    }
    Ok(pipeline)
}

async fn run_poll(config: Config) -> Result<()> {
    let db = Arc::new(Database::open(&config.paths.database)?);
    let github = GitHubClient::new(&config.github.token, &config.github.username);
    let logs = ClaudeLogParser::new(&config.paths.claude_logs);
    let pipeline = build_pipeline(&config, db.clone())?;

    let outcome = poll_once(&db, &github, &logs, &pipeline, &config.polling).await?;
    if let Some(eval) = &outcome.eval {
        tracing::info!(
            "Cycle complete: score {}/10, posted: {}",
            eval.overall,
            outcome.posted
        );
    } else {
        tracing::info!("Cycle complete: nothing to synthesize");
    }
    Ok(())
}

async fn run_retry(config: Config) -> Result<()> {
    let db = Arc::new(Database::open(&config.paths.database)?);
    let pipeline = build_pipeline(&config, db)?;

    let posted = pipeline.retry_unpublished("x_post").await?;
    tracing::info!("Retry run complete: {} post(s) published", posted);
    Ok(())
}

async fn run_digest(config: Config, hours: i64) -> Result<()> {
    let db = Arc::new(Database::open(&config.paths.database)?);
    let pipeline = build_pipeline(&config, db.clone())?;

    let end = Utc::now();
    let start = end - chrono::Duration::hours(hours);
    let commits: Vec<CommitRef> = db
        .commits_in_range(start, end)?
        .into_iter()
        .map(|c| CommitRef {
            repo_name: c.repo_name,
            sha: c.commit_sha,
            message: c.commit_message,
        })
        .collect();
    let prompts: Vec<PromptRef> = db
        .messages_in_range(start, end)?
        .into_iter()
        .map(|m| PromptRef {
            uuid: m.message_uuid,
            text: m.prompt_text,
        })
        .collect();

    let outcome = pipeline.run_digest(&commits, &prompts).await?;
    if let Some(eval) = &outcome.eval {
        tracing::info!(
            "Digest complete: score {}/10, posted: {}",
            eval.overall,
            outcome.posted
        );
    } else {
        tracing::info!("Digest complete: nothing to summarize");
    }
    Ok(())
}

async fn run_build_knowledge(config: Config) -> Result<()> {
    let db = Arc::new(Database::open(&config.paths.database)?);
    let embedder = provider_from_config(&config.knowledge)?;
    let store = KnowledgeStore::new(db.clone(), embedder);
    let extractor = InsightExtractor::new(AnthropicModel::new(
        &config.anthropic.api_key,
        &config.synthesis.model,
    ));
    let logs = ClaudeLogParser::new(&config.paths.claude_logs);

    let mut ingested = 0usize;
    for message in logs.parse_global_history()? {
        match ingest_own_conversation(
            &store,
            &extractor,
            &message.message_uuid,
            &message.prompt_text,
            &message.project_path,
        )
        .await
        {
            Ok(Some(_)) => ingested += 1,
            Ok(None) => {}
            Err(err) => {
                tracing::warn!("Skipping prompt {}: {}", message.message_uuid, err);
            }
        }
    }

    for record in db.get_published_content("x_post")? {
        let url = record.published_url.as_deref().unwrap_or_default();
        match ingest_own_post(
            &store,
            &extractor,
            &record.id.to_string(),
            &record.content,
            url,
            &config.github.username,
        )
        .await
        {
            Ok(Some(_)) => ingested += 1,
            Ok(None) => {}
            Err(err) => {
                tracing::warn!("Skipping post {}: {}", record.id, err);
            }
        }
    }

    tracing::info!("Knowledge build complete: {} new item(s)", ingested);
    Ok(())
}

const STARTER_CONFIG: &str = "\
github:
  username: your-github-username
  token: ${GITHUB_TOKEN}

x:
  bearer_token: ${X_BEARER_TOKEN}

anthropic:
  api_key: ${ANTHROPIC_API_KEY}

paths:
  claude_logs: ~/.claude
  database: presence.db

synthesis:
  model: claude-sonnet-4-20250514
  eval_threshold: 0.7

knowledge:
  provider: voyage
  api_key: ${VOYAGE_API_KEY}
  dimension: 512

polling:
  lookback_minutes: 90
  prompt_window_minutes: 30
  post_delay_secs: 30
";

fn run_init(config: Config) -> Result<()> {
    Database::open(&config.paths.database)
        .with_context(|| format!("Failed to create database at {}", config.paths.database))?;
    tracing::info!("Database ready at {}", config.paths.database);

    let config_path = Path::new("config.yaml");
    if config_path.exists() {
        tracing::info!("config.yaml already exists, leaving it alone");
    } else {
        std::fs::write(config_path, STARTER_CONFIG).context("Failed to write config.yaml")?;
        tracing::info!("Wrote starter config.yaml");
    }
    Ok(())
}
