//! Command-line entry points.

use crate::compaction::TokenCounter;
use crate::config::Config;
use crate::history::{HistoryStore, Turn};
use crate::provider::OpenAIClient;
use crate::relay::RelayHandler;
use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

/// Environment variable that switches logging to `relay.log`.
pub const LOG_FILE_ENV: &str = "RELAY_LOG";

/// Discord bot that relays mentions to an OpenAI-compatible chat model
#[derive(Parser, Debug)]
#[command(name = "chat-relay", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config file (default: platform config dir)
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect to Discord and relay mentions (default)
    Serve,
    /// Print a channel's stored history
    History(HistoryArgs),
    /// Validate config, tokenizer and history database
    Check,
    /// Show config file path
    Config,
}

#[derive(Parser, Debug)]
pub struct HistoryArgs {
    /// Discord channel id
    pub channel_id: u64,

    /// Number of most recent turns to show
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,

    /// Output format
    #[arg(short = 'o', long, default_value = "text", value_enum)]
    pub output_format: OutputFormat,
}

#[derive(ValueEnum, Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Install the global tracing subscriber.
///
/// With `RELAY_LOG` set, everything from this crate at debug level goes to
/// `relay.log`. Otherwise logs go to stderr filtered by `RUST_LOG`
/// (default `chat_relay=info`).
pub fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    if std::env::var(LOG_FILE_ENV).is_ok() {
        if let Ok(file) = std::fs::File::create("relay.log") {
            let layer = fmt::layer().with_writer(file).with_ansi(false);
            let filter = EnvFilter::new("chat_relay=debug");
            let _ = tracing_subscriber::registry()
                .with(layer.with_filter(filter))
                .try_init();
            return;
        }
        eprintln!("Warning: could not create relay.log, logging to stderr");
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chat_relay=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Everything `serve` needs before connecting: valid settings, a tokenizer
/// for the model and an open history database.
pub fn preflight(config: &Config) -> crate::error::Result<HistoryStore> {
    config.validate()?;
    TokenCounter::new().encoder(&config.model)?;
    let store = HistoryStore::open(&config.history_db_path())?;
    Ok(store.with_limit(config.history_limit))
}

/// Run the relay until the gateway connection ends.
pub async fn serve(config_path: Option<&Path>) -> ExitCode {
    match serve_inner(config_path).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn serve_inner(config_path: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path)?;
    let store = preflight(&config)?;
    let (Some(token), Some(api_key)) = (&config.discord_token, &config.openai_api_key) else {
        anyhow::bail!("credentials missing after validation");
    };
    let db_path = config.history_db_path();

    let completions = OpenAIClient::with_base_url(api_key.clone(), config.base_url.clone())
        .with_timeout(config.request_timeout())
        .with_retry(config.retry_policy());

    let relay = RelayHandler::new(
        Arc::new(store),
        Arc::new(completions),
        config.relay_settings(),
    );

    info!(
        model = %config.model,
        history = %db_path.display(),
        budget = config.context_budget().available_tokens(),
        "Starting relay"
    );
    crate::discord::run(token, Arc::new(relay)).await?;
    info!("Relay stopped");
    Ok(())
}

#[derive(Debug, Serialize)]
struct HistoryRow<'a> {
    sequence: i64,
    created_at: String,
    author: Option<&'a str>,
    role: &'static str,
    tokens: usize,
    content: &'a str,
}

impl<'a> HistoryRow<'a> {
    fn new(turn: &'a Turn, tokens: usize) -> Self {
        let created_at = chrono::DateTime::from_timestamp(turn.created_at, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        Self {
            sequence: turn.sequence,
            created_at,
            author: turn.author_name.as_deref(),
            role: turn.role().as_str(),
            tokens,
            content: turn.content(),
        }
    }
}

/// Print the turns the relay would load for a channel.
#[must_use]
pub fn history(args: HistoryArgs, config_path: Option<&Path>) -> ExitCode {
    match history_inner(&args, config_path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn history_inner(args: &HistoryArgs, config_path: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path)?;
    let store = HistoryStore::open(&config.history_db_path())?
        .with_limit(args.limit.unwrap_or(config.history_limit));
    let turns = store.load(args.channel_id)?;

    let counter = TokenCounter::new();
    let mut rows = Vec::with_capacity(turns.len());
    for turn in &turns {
        let tokens = counter.count_message(&turn.message, &config.model)?;
        rows.push(HistoryRow::new(turn, tokens));
    }

    match args.output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        OutputFormat::Text => {
            if rows.is_empty() {
                println!("No history for channel {}", args.channel_id);
                return Ok(());
            }
            for row in &rows {
                println!(
                    "[{}] {} {} ({} tokens)",
                    row.created_at,
                    row.role,
                    row.author.unwrap_or("-"),
                    row.tokens
                );
                println!("{}\n", row.content);
            }
            let total: usize = rows.iter().map(|r| r.tokens).sum();
            println!(
                "{} of {} stored turns, {total} tokens of {} available",
                rows.len(),
                store.count(args.channel_id)?,
                config.context_budget().available_tokens()
            );
        }
    }
    Ok(())
}

/// Check that `serve` would start.
#[must_use]
pub fn check(config_path: Option<&Path>) -> ExitCode {
    match check_inner(config_path) {
        Ok(()) => {
            println!("OK");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn check_inner(config_path: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path)?;
    preflight(&config)?;
    println!("model: {}", config.model);
    println!("endpoint: {}", config.base_url);
    println!("history: {}", config.history_db_path().display());
    Ok(())
}

/// Print the config file path in use.
#[must_use]
pub fn config_path(config_path: Option<&Path>) -> ExitCode {
    let path = config_path.map_or_else(Config::default_path, Path::to_path_buf);
    println!("{}", path.display());
    ExitCode::SUCCESS
}
