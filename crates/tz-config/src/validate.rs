//! Range and format checks applied after every load and override.

use crate::{Config, ConfigError};

/// Upper bound for `render.timeout_secs`.
const TIMEOUT_CEILING_SECS: u64 = 600;

/// Upper bound for `watch.debounce_ms`.
const DEBOUNCE_CEILING_MS: u64 = 10_000;

impl Config {
    /// Check every setting, reporting the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_server_url(&self.render.kroki_url)?;
        check_compat_level(&self.render.max_pgfplots_compat)?;
        check_range(
            "render.timeout_secs",
            self.render.timeout_secs,
            1,
            TIMEOUT_CEILING_SECS,
        )?;
        check_range(
            "watch.debounce_ms",
            self.watch.debounce_ms,
            0,
            DEBOUNCE_CEILING_MS,
        )?;
        check_cache_prefix(&self.cache.prefix)
    }
}

fn invalid(message: String) -> ConfigError {
    ConfigError::Validation(message)
}

fn check_server_url(url: &str) -> Result<(), ConfigError> {
    let has_host = ["http://", "https://"]
        .iter()
        .find_map(|scheme| url.strip_prefix(scheme))
        .is_some_and(|rest| !rest.is_empty());
    if has_host {
        Ok(())
    } else {
        Err(invalid(format!(
            "render.kroki_url must be an http:// or https:// URL, got '{url}'"
        )))
    }
}

/// `pgfplots` compat levels are `MAJOR.MINOR`, both numeric.
fn check_compat_level(level: &str) -> Result<(), ConfigError> {
    let numeric = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
    match level.split_once('.') {
        Some((major, minor)) if numeric(major) && numeric(minor) => Ok(()),
        _ => Err(invalid(format!(
            "render.max_pgfplots_compat must look like 1.16, got '{level}'"
        ))),
    }
}

fn check_range(field: &str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(invalid(format!(
            "{field} must be between {min} and {max}, got {value}"
        )))
    }
}

/// The prefix becomes part of file names in the cache directory.
fn check_cache_prefix(prefix: &str) -> Result<(), ConfigError> {
    if prefix.is_empty() || prefix.contains(['/', '\\', '.']) {
        return Err(invalid(format!(
            "cache.prefix must be a non-empty name without '/', '\\' or '.', got '{prefix}'"
        )));
    }
    Ok(())
}
