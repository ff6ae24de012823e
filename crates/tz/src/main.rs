//! tz CLI - TikZ live preview for Markdown.
//!
//! Provides commands for:
//! - `render`: Render every TikZ block in a document and write an HTML preview
//! - `watch`: Re-render a document whenever it changes
//! - `retry`: Re-render one block, bypassing its cached result
//! - `cache stats|clear|invalidate`: Inspect and manage the persistent cache

mod commands;
mod context;
mod error;
mod output;
mod preview;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::{CacheCommand, RenderArgs, RetryArgs, WatchArgs};
use error::CliError;
use output::Output;

/// tz - TikZ live preview for Markdown.
#[derive(Parser)]
#[command(name = "tz", version, about)]
struct Cli {
    /// Enable verbose output (render timing and cache logs).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render all TikZ blocks in a Markdown file.
    Render(RenderArgs),
    /// Watch a Markdown file and re-render on change.
    Watch(WatchArgs),
    /// Re-render a single block by fingerprint.
    Retry(RetryArgs),
    /// Persistent cache commands.
    #[command(subcommand)]
    Cache(CacheCommand),
}

fn main() {
    let cli = Cli::parse();
    let output = Output::new();

    // --verbose enables INFO level, otherwise use RUST_LOG or default to WARN
    let filter = if cli.verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = match cli.command {
        Commands::Render(args) => block_on(args.execute()),
        Commands::Watch(args) => block_on(args.execute()),
        Commands::Retry(args) => block_on(args.execute()),
        Commands::Cache(cmd) => cmd.execute(),
    };

    if let Err(err) = result {
        output.error(&format!("Error: {err}"));
        std::process::exit(1);
    }
}

fn block_on<F>(future: F) -> Result<(), CliError>
where
    F: Future<Output = Result<(), CliError>>,
{
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(future)
}
