//! `tz cache` subcommand group.

use std::path::PathBuf;

use clap::{Args, Subcommand};
use tz_config::{CliSettings, Config};
use tz_diagrams::Fingerprint;

use crate::context::open_persistent;
use crate::error::CliError;
use crate::output::Output;

/// Persistent cache commands.
#[derive(Subcommand)]
pub(crate) enum CacheCommand {
    /// Show cache statistics.
    Stats(StatsArgs),
    /// Remove every cached artifact.
    Clear(LocationArgs),
    /// Remove cached artifacts by fingerprint.
    Invalidate(InvalidateArgs),
}

impl CacheCommand {
    /// Execute the cache subcommand.
    pub(crate) fn execute(self) -> Result<(), CliError> {
        match self {
            Self::Stats(args) => args.execute(),
            Self::Clear(args) => clear(&args),
            Self::Invalidate(args) => args.execute(),
        }
    }
}

/// Where the cache lives.
#[derive(Args)]
pub(crate) struct LocationArgs {
    /// Path to configuration file (default: auto-discover tikz.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Cache directory (overrides config).
    #[arg(long)]
    cache_dir: Option<PathBuf>,
}

impl LocationArgs {
    /// Load configuration for cache maintenance; caching is always on here.
    fn load_config(&self) -> Result<Config, CliError> {
        let cli_settings = CliSettings {
            cache_enabled: Some(true),
            cache_dir: self.cache_dir.clone(),
            ..CliSettings::default()
        };
        Ok(Config::load(self.config.as_deref(), Some(&cli_settings))?)
    }
}

/// Arguments for `tz cache stats`.
#[derive(Args)]
pub(crate) struct StatsArgs {
    /// List every entry.
    #[arg(long)]
    entries: bool,

    #[command(flatten)]
    location: LocationArgs,
}

impl StatsArgs {
    fn execute(self) -> Result<(), CliError> {
        let output = Output::new();
        let config = self.location.load_config()?;
        let dir = &config.cache.dir;

        if !dir.exists() {
            output.info(&format!("Cache is empty ({} does not exist)", dir.display()));
            return Ok(());
        }

        let cache = open_persistent(&config)?;
        let stats = cache.stats()?;
        output.info(&format!("Cache directory: {}", dir.display()));
        output.info(&format!("Entries: {}", stats.count));
        output.info(&format!(
            "Approximate size: {}",
            format_size(stats.approximate_total_size)
        ));

        if self.entries {
            for entry in cache.entries()? {
                output.info(&format!(
                    "{}  {:>10}  {}  {} hit(s)",
                    entry.fingerprint,
                    format_size(entry.artifact.len() as u64),
                    entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.access_count
                ));
            }
        }
        Ok(())
    }
}

fn clear(args: &LocationArgs) -> Result<(), CliError> {
    let output = Output::new();
    let config = args.load_config()?;
    let cache = open_persistent(&config)?;

    let count = cache.stats()?.count;
    cache.clear()?;
    output.success(&format!("Removed {count} cached artifact(s)"));
    Ok(())
}

/// Arguments for `tz cache invalidate`.
#[derive(Args)]
pub(crate) struct InvalidateArgs {
    /// Fingerprints to remove (64 hex characters each).
    #[arg(required = true)]
    fingerprints: Vec<String>,

    #[command(flatten)]
    location: LocationArgs,
}

impl InvalidateArgs {
    fn execute(self) -> Result<(), CliError> {
        let output = Output::new();
        // Validate everything before touching the cache
        let fingerprints = self
            .fingerprints
            .iter()
            .map(|fp| fp.parse::<Fingerprint>())
            .collect::<Result<Vec<_>, _>>()?;

        let config = self.location.load_config()?;
        let cache = open_persistent(&config)?;

        for fingerprint in &fingerprints {
            if cache.contains(fingerprint.as_str())? {
                cache.invalidate(fingerprint.as_str())?;
                output.success(&format!("Removed {}", fingerprint.short()));
            } else {
                output.warning(&format!("Not cached: {}", fingerprint.short()));
            }
        }
        Ok(())
    }
}

/// Format a byte count for humans.
#[allow(clippy::cast_precision_loss)]
fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
