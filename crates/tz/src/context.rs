//! Shared setup for commands: configuration, caches and the renderer.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use tz_cache::{FileStore, NullStore, PersistentCache, Store};
use tz_config::{CliSettings, Config};
use tz_diagrams::{
    DocumentRenderer, KrokiLoader, Presenter, RenderCaches, SchedulerOptions, SvgPostProcessor,
};

use crate::error::CliError;

/// Options shared by every command that touches configuration.
#[derive(Args, Debug, Default)]
pub(crate) struct CommonArgs {
    /// Path to configuration file (default: auto-discover tikz.toml).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Kroki server URL for TikZ rendering (overrides config).
    #[arg(long, env = "TZ_KROKI_URL")]
    pub kroki_url: Option<String>,

    /// Render timeout in seconds (overrides config).
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Render for a dark theme.
    #[arg(long)]
    pub dark: bool,

    /// Cache directory (overrides config).
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Enable caching (default: enabled).
    #[arg(long)]
    pub cache: Option<bool>,

    /// Disable caching.
    #[arg(long, conflicts_with = "cache")]
    pub no_cache: bool,
}

impl CommonArgs {
    /// Load configuration with these arguments applied on top.
    pub(crate) fn load_config(&self, debounce_ms: Option<u64>) -> Result<Config, CliError> {
        let cli_settings = CliSettings {
            kroki_url: self.kroki_url.clone(),
            timeout_secs: self.timeout,
            dark_mode: self.dark.then_some(true),
            cache_enabled: self.resolve_cache_enabled(),
            cache_dir: self.cache_dir.clone(),
            debounce_ms,
        };
        Ok(Config::load(self.config.as_deref(), Some(&cli_settings))?)
    }

    /// Resolve `cache_enabled` from --cache/--no-cache flags.
    fn resolve_cache_enabled(&self) -> Option<bool> {
        self.no_cache.then_some(false).or(self.cache)
    }
}

/// Open the persistent cache described by `config`.
///
/// A disabled cache is backed by a store that never retains anything.
pub(crate) fn open_persistent(config: &Config) -> Result<PersistentCache, CliError> {
    let cache = &config.cache;
    let store: Box<dyn Store> = if cache.enabled {
        ensure_cache_dir(&cache.dir)?;
        Box::new(FileStore::new(&cache.dir)?)
    } else {
        Box::new(NullStore)
    };
    Ok(PersistentCache::open(store, &cache.prefix)?)
}

/// Build both cache tiers for the configured theme.
pub(crate) fn build_caches(config: &Config) -> Result<Arc<RenderCaches>, CliError> {
    let persistent = open_persistent(config)?;
    Ok(Arc::new(RenderCaches::new(
        persistent,
        SvgPostProcessor,
        config.render.dark_mode,
    )))
}

/// Start a renderer backed by the configured Kroki server.
pub(crate) fn build_renderer(
    config: &Config,
    caches: Arc<RenderCaches>,
    presenter: Arc<dyn Presenter>,
) -> Arc<DocumentRenderer> {
    let options = SchedulerOptions {
        timeout: config.render.timeout(),
        max_pgfplots_compat: config.render.max_pgfplots_compat.clone(),
    };
    let loader = KrokiLoader::new(&config.render.kroki_url, options.timeout);
    Arc::new(DocumentRenderer::spawn(
        Arc::new(loader),
        caches,
        presenter,
        options,
    ))
}

/// Ensure the cache directory exists with a `.gitignore`.
fn ensure_cache_dir(dir: &Path) -> Result<(), CliError> {
    std::fs::create_dir_all(dir)?;

    let gitignore_path = dir.join(".gitignore");
    if !gitignore_path.exists() {
        let _ = std::fs::write(&gitignore_path, "# Automatically created by tz\n*\n");
    }

    Ok(())
}

/// Canonical path of an existing document.
pub(crate) fn resolve_document(path: &Path) -> Result<PathBuf, CliError> {
    path.canonicalize().map_err(|e| {
        CliError::Validation(format!("Cannot open {}: {e}", path.display()))
    })
}
