//! `${VAR}` and `${VAR:-default}` substitution in string settings.

use std::env::VarError;

use crate::ConfigError;

/// Substitute environment variables into `value`.
///
/// `field` names the setting in error messages.
pub(crate) fn expand_env(value: &str, field: &str) -> Result<String, ConfigError> {
    let expanded = shellexpand::env_with_context(value, lookup).map_err(|e| {
        ConfigError::EnvVar {
            field: field.to_owned(),
            message: format!("${{{}}} is not valid unicode", e.var_name),
        }
    })?;

    // Unset variables without a default are left in place by shellexpand
    match leftover_reference(&expanded) {
        Some(var) => Err(ConfigError::EnvVar {
            field: field.to_owned(),
            message: format!("${{{var}}} not set"),
        }),
        None => Ok(expanded.into_owned()),
    }
}

fn lookup(var: &str) -> Result<Option<String>, VarError> {
    match std::env::var(var) {
        Ok(value) => Ok(Some(value)),
        Err(VarError::NotPresent) => Ok(None),
        Err(e) => Err(e),
    }
}

fn leftover_reference(value: &str) -> Option<&str> {
    let (_, rest) = value.split_once("${")?;
    rest.split_once('}').map(|(name, _)| name)
}
