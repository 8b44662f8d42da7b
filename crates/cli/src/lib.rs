//! # Context CLI
//!
//! The `context` binary. Offline subcommands (`patch`, `render`, `chunk`)
//! never touch the network; the model-backed ones (`answer`, `group`,
//! `label`, `edit`) talk to an OpenAI-compatible endpoint.
//!
//! ## Configuration
//!
//! ```text
//! defaults
//!     └─> --config <path> | ./.context/config.toml
//!           └─> CONTEXT_BACKEND_URL, CONTEXT_API_KEY, CONTEXT_MODEL,
//!               CONTEXT_MAX_INPUT_TOKENS, CONTEXT_CONCURRENCY, CONTEXT_MAX_RETRIES
//!                 └─> --model, --concurrency
//! ```
//!
//! Results go to stdout, logs to stderr. With `--json`, failures are also
//! printed to stdout as an error envelope.

mod backend;
mod commands;
mod config;

pub use backend::OpenAiBackend;
pub use config::{BackendConfig, CliConfig, DEFAULT_CONFIG_PATH};

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use context_chunker::{ChunkerError, HeuristicTokenizer, Tokenizer};
use context_dispatch::CancellationToken;
use context_micropatch::{Eol, PatchError};
use context_operations::{
    ErrorEnvelope, ErrorKind, OperationError, Session, DEFAULT_CHUNK_LENGTH,
};
use serde::Serialize;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "context")]
#[command(about = "Line-addressed patches and model-backed operations over large inputs", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ./.context/config.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Print results, and failures, as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Override the model id
    #[arg(long, global = true)]
    model: Option<String>,

    /// Override the number of backend calls in flight
    #[arg(long, global = true)]
    concurrency: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply micropatch ops to a file
    Patch(PatchArgs),

    /// Show a file with the line numbers ops refer to
    Render(RenderArgs),

    /// Plan token-bounded chunks for a JSONL item list
    Chunk(ChunkArgs),

    /// Answer a question over JSONL documents, with line citations
    Answer(AnswerArgs),

    /// Sort JSONL items into labelled groups
    Group(GroupArgs),

    /// Tag a file with yes/no verdicts for label questions
    Label(LabelArgs),

    /// Edit files by instruction through model-written micropatch ops
    Edit(EditArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum EolArg {
    Lf,
    Crlf,
}

impl From<EolArg> for Eol {
    fn from(arg: EolArg) -> Self {
        match arg {
            EolArg::Lf => Self::Lf,
            EolArg::Crlf => Self::Crlf,
        }
    }
}

#[derive(Args)]
struct PatchArgs {
    /// File to patch
    file: PathBuf,

    /// File holding the ops, or `-` for stdin
    #[arg(long)]
    ops: PathBuf,

    /// Line ending of the output (default: detected from the file)
    #[arg(long, value_enum)]
    eol: Option<EolArg>,

    /// Write the result back instead of printing it
    #[arg(long)]
    in_place: bool,
}

#[derive(Args)]
struct RenderArgs {
    /// File to render, or `-` for stdin
    file: PathBuf,
}

#[derive(Args)]
struct ChunkArgs {
    /// JSONL file with one item per line, or `-` for stdin
    items: PathBuf,

    /// Token budget per chunk
    #[arg(long, default_value_t = 16_000)]
    budget: usize,

    /// Maximum items per chunk
    #[arg(long)]
    max_items: Option<usize>,

    /// Truncate items to this many tokens
    #[arg(long)]
    per_item: Option<usize>,
}

#[derive(Args)]
struct AnswerArgs {
    /// JSONL file with one document per line, or `-` for stdin
    docs: PathBuf,

    /// Question to answer
    #[arg(long)]
    question: String,

    /// Extra instructions for the model
    #[arg(long)]
    instructions: Option<String>,

    /// Token budget of one call
    #[arg(long, default_value_t = DEFAULT_CHUNK_LENGTH)]
    chunk_length: usize,
}

#[derive(Args)]
struct GroupArgs {
    /// JSONL file with one item per line, or `-` for stdin
    items: PathBuf,

    /// How to group, e.g. "by topic, at most 5 groups"
    #[arg(long)]
    instructions: Option<String>,

    /// Items longer than this are truncated
    #[arg(long, default_value_t = 250)]
    tokens_per_element: usize,

    /// Token ceiling for the elements of one call
    #[arg(long, default_value_t = 16_000)]
    chunk_length: usize,
}

#[derive(Args)]
struct LabelArgs {
    /// File to tag, or `-` for stdin
    input: PathBuf,

    /// Label as `key=question`; repeat for several labels
    #[arg(long = "label", value_parser = parse_label, required = true)]
    labels: Vec<(String, String)>,

    /// Extra instructions for the model
    #[arg(long)]
    instructions: Option<String>,

    /// Token budget of one call
    #[arg(long, default_value_t = 16_000)]
    chunk_length: usize,
}

#[derive(Args)]
struct EditArgs {
    /// Files to edit
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// What to change
    #[arg(long)]
    instructions: String,

    /// Write changed files back
    #[arg(long)]
    write: bool,
}

fn parse_label(raw: &str) -> Result<(String, String), String> {
    let (key, question) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=question, got '{raw}'"))?;
    Ok((key.trim().to_string(), question.trim().to_string()))
}

/// Write `text` and a newline to stdout; a closed pipe is not an error
fn print_stdout(text: &str) -> Result<()> {
    let mut stdout = io::stdout().lock();
    if let Err(err) = stdout
        .write_all(text.as_bytes())
        .and_then(|()| stdout.write_all(b"\n"))
        .and_then(|()| stdout.flush())
    {
        if err.kind() == io::ErrorKind::BrokenPipe {
            return Ok(());
        }
        return Err(err.into());
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    print_stdout(&serde_json::to_string_pretty(value)?)
}

/// Structured form of any failure, for `--json`
fn error_envelope(err: &anyhow::Error) -> ErrorEnvelope {
    if let Some(err) = err.downcast_ref::<OperationError>() {
        return err.to_envelope();
    }
    let kind = if err.downcast_ref::<PatchError>().is_some() {
        ErrorKind::Parse
    } else if let Some(ChunkerError::BudgetExceeded { .. }) = err.downcast_ref::<ChunkerError>() {
        ErrorKind::BudgetExceeded
    } else {
        ErrorKind::InvalidInput
    };
    ErrorEnvelope::new(kind, format!("{err:#}"))
}

fn init_logging(cli: &Cli) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();
}

fn load_config(cli: &Cli) -> Result<CliConfig> {
    let mut config = CliConfig::load(cli.config.as_deref())?;
    if let Some(model) = &cli.model {
        config.backend.model.clone_from(model);
    }
    if let Some(concurrency) = cli.concurrency {
        config.dispatch.concurrency = concurrency;
    }
    config.validate().map_err(anyhow::Error::msg)?;
    Ok(config)
}

fn tokenizer(config: &CliConfig) -> Result<Arc<dyn Tokenizer>> {
    match &config.tokenizer {
        #[cfg(feature = "hf-tokenizer")]
        Some(path) => {
            use anyhow::Context as AnyhowContext;
            let tokenizer = context_chunker::HfTokenizer::from_file(path)
                .with_context(|| format!("Failed to load tokenizer {}", path.display()))?;
            Ok(Arc::new(tokenizer))
        }
        #[cfg(not(feature = "hf-tokenizer"))]
        Some(path) => {
            log::warn!(
                "Ignoring tokenizer {}: built without the hf-tokenizer feature",
                path.display()
            );
            Ok(Arc::new(HeuristicTokenizer::default()))
        }
        None => Ok(Arc::new(HeuristicTokenizer::default())),
    }
}

/// Session over the configured backend; Ctrl-C cancels it
fn build_session(config: &CliConfig) -> Result<Session> {
    let backend = Arc::new(OpenAiBackend::new(&config.backend)?);
    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling in-flight requests");
            watcher.cancel();
        }
    });

    Ok(Session::new(backend, tokenizer(config)?)
        .with_limits(config.limits)?
        .with_dispatch_config(config.dispatch)?
        .with_cancellation(cancel))
}

async fn run(cli: Cli) -> Result<()> {
    let json = cli.json;
    match &cli.command {
        Commands::Patch(args) => commands::patch(args, json),
        Commands::Render(args) => commands::render(args, json),
        Commands::Chunk(args) => {
            let config = load_config(&cli)?;
            commands::chunk(args, tokenizer(&config)?.as_ref(), json)
        }
        Commands::Answer(args) => {
            let session = build_session(&load_config(&cli)?)?;
            commands::answer(&session, args, json).await
        }
        Commands::Group(args) => {
            let session = build_session(&load_config(&cli)?)?;
            commands::group(&session, args, json).await
        }
        Commands::Label(args) => {
            let session = build_session(&load_config(&cli)?)?;
            commands::label(&session, args, json).await
        }
        Commands::Edit(args) => {
            let session = build_session(&load_config(&cli)?)?;
            commands::edit(&session, args, json).await
        }
    }
}

pub async fn main_entry() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let json = cli.json;
    let result = run(cli).await;
    if let Err(err) = &result {
        if json {
            print_json(&error_envelope(err))?;
        }
    }
    result
}
