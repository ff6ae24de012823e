//! CLI error types.

use tz_cache::CacheError;
use tz_config::ConfigError;
use tz_diagrams::{EngineError, ParseFingerprintError};

/// CLI error type.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("{0}")]
    Engine(#[from] EngineError),

    #[error("{0}")]
    Fingerprint(#[from] ParseFingerprintError),

    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("{0}")]
    Validation(String),
}
