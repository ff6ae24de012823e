//! `tikz.toml` loading for tz.
//!
//! The file is looked up in the working directory and then each parent, so a
//! single config at a repository root covers every document below it. Missing
//! sections fall back to defaults, and [`CliSettings`] win over anything read
//! from disk.
//!
//! ```toml
//! [render]
//! kroki_url = "${KROKI_URL:-https://kroki.io}"
//! timeout_secs = 30
//! max_pgfplots_compat = "1.16"
//! dark_mode = false
//!
//! [cache]
//! enabled = true
//! dir = ".tz/cache"
//! prefix = "tikz"
//!
//! [watch]
//! debounce_ms = 300
//! ```
//!
//! `render.kroki_url` and `cache.dir` accept `${VAR}` and `${VAR:-default}`.
//! A relative `cache.dir` is taken relative to the config file.

mod error;
mod expand;
mod validate;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

pub use error::ConfigError;

const CONFIG_FILE_NAME: &str = "tikz.toml";

/// Cache location relative to the config file or working directory.
const DEFAULT_CACHE_SUBDIR: [&str; 2] = [".tz", "cache"];

/// Command-line overrides; `None` keeps the loaded value.
#[derive(Debug, Default)]
pub struct CliSettings {
    pub kroki_url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub dark_mode: Option<bool>,
    pub cache_enabled: Option<bool>,
    pub cache_dir: Option<PathBuf>,
    pub debounce_ms: Option<u64>,
}

/// Fully resolved configuration.
#[derive(Debug)]
pub struct Config {
    pub render: RenderConfig,
    pub cache: CacheConfig,
    pub watch: WatchConfig,
    /// File the values came from, if any.
    pub source: Option<PathBuf>,
}

/// `[render]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Base URL of the Kroki server that compiles TikZ.
    pub kroki_url: String,
    /// Per-block render timeout in seconds.
    pub timeout_secs: u64,
    /// Newest `pgfplots` compat level the server understands; documents
    /// asking for more are clamped to this.
    pub max_pgfplots_compat: String,
    pub dark_mode: bool,
}

impl RenderConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            kroki_url: "https://kroki.io".to_owned(),
            timeout_secs: 30,
            max_pgfplots_compat: "1.16".to_owned(),
            dark_mode: false,
        }
    }
}

/// Persistent cache settings with the directory made absolute.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    pub dir: PathBuf,
    /// Namespace for entry keys inside `dir`.
    pub prefix: String,
}

impl CacheConfig {
    fn under(base: &Path) -> Self {
        Self {
            enabled: true,
            dir: DEFAULT_CACHE_SUBDIR.iter().fold(base.to_path_buf(), |dir, part| dir.join(part)),
            prefix: "tikz".to_owned(),
        }
    }
}

/// `[watch]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Quiet period after the last edit before a render pass starts.
    pub debounce_ms: u64,
}

impl WatchConfig {
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { debounce_ms: 300 }
    }
}

/// On-disk shape of `tikz.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    render: RenderConfig,
    cache: CacheSection,
    watch: WatchConfig,
}

/// `[cache]` as written; the directory is still unresolved text.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CacheSection {
    enabled: Option<bool>,
    dir: Option<String>,
    prefix: Option<String>,
}

impl ConfigFile {
    fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut file: Self = toml::from_str(text)?;
        file.render.kroki_url = expand::expand_env(&file.render.kroki_url, "render.kroki_url")?;
        if let Some(dir) = &file.cache.dir {
            file.cache.dir = Some(expand::expand_env(dir, "cache.dir")?);
        }
        Ok(file)
    }

    /// Resolve against the directory holding the file.
    fn resolve(self, base: &Path) -> Config {
        let mut cache = CacheConfig::under(base);
        if let Some(enabled) = self.cache.enabled {
            cache.enabled = enabled;
        }
        if let Some(dir) = self.cache.dir {
            cache.dir = base.join(dir);
        }
        if let Some(prefix) = self.cache.prefix {
            cache.prefix = prefix;
        }

        Config {
            render: self.render,
            cache,
            watch: self.watch,
            source: None,
        }
    }
}

impl Config {
    /// Load `config_path`, or the nearest `tikz.toml`, then apply `cli`.
    ///
    /// Without any file, defaults are used with the cache under the working
    /// directory.
    ///
    /// # Errors
    ///
    /// Fails when an explicit path is missing, the file is malformed, or the
    /// resulting values do not validate.
    pub fn load(config_path: Option<&Path>, cli: Option<&CliSettings>) -> Result<Self, ConfigError> {
        let path = match config_path {
            Some(path) if !path.exists() => return Err(ConfigError::NotFound(path.to_path_buf())),
            Some(path) => Some(path.to_path_buf()),
            None => find_config_file(),
        };

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::with_base(&std::env::current_dir().unwrap_or_default()),
        };

        if let Some(cli) = cli {
            config.apply(cli);
        }
        config.validate()?;
        Ok(config)
    }

    /// Defaults with the cache directory under `base`.
    #[must_use]
    pub fn with_base(base: &Path) -> Self {
        ConfigFile::default().resolve(base)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let base = path.parent().unwrap_or(Path::new("."));
        let mut config = ConfigFile::parse(&text)?.resolve(base);
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    fn apply(&mut self, cli: &CliSettings) {
        if let Some(url) = &cli.kroki_url {
            self.render.kroki_url.clone_from(url);
        }
        if let Some(secs) = cli.timeout_secs {
            self.render.timeout_secs = secs;
        }
        if let Some(dark) = cli.dark_mode {
            self.render.dark_mode = dark;
        }
        if let Some(enabled) = cli.cache_enabled {
            self.cache.enabled = enabled;
        }
        if let Some(dir) = &cli.cache_dir {
            self.cache.dir.clone_from(dir);
        }
        if let Some(ms) = cli.debounce_ms {
            self.watch.debounce_ms = ms;
        }
    }
}

/// Walk from the working directory up to the filesystem root.
fn find_config_file() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    cwd.ancestors()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .find(|candidate| candidate.is_file())
}
