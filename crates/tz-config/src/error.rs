use std::path::PathBuf;

/// Failure to load or validate `tikz.toml`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An explicitly requested config file does not exist.
    #[error("Config file {} does not exist", .0.display())]
    NotFound(PathBuf),

    #[error("Cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid tikz.toml: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed but is out of range or malformed.
    #[error("Invalid setting: {0}")]
    Validation(String),

    /// A `${VAR}` reference could not be resolved.
    #[error("Cannot expand {field}: {message}")]
    EnvVar {
        /// Dotted setting name, such as `render.kroki_url`.
        field: String,
        message: String,
    },
}
