//! Content fingerprints used as cache keys.
//!
//! Provides [`Fingerprint`], a SHA-256 digest of diagram source rendered as
//! lowercase hex. Every caching and equality decision is made on it.

use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};

/// Length of a hex-encoded SHA-256 digest.
const HEX_LEN: usize = 64;

/// Stable content fingerprint of a diagram's source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hash `text` exactly as given.
    #[must_use]
    pub fn digest(text: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Fingerprint diagram source, ignoring leading and trailing whitespace.
    ///
    /// Incidental whitespace around a fenced block must not defeat caching, so
    /// this is the constructor block extraction uses.
    #[must_use]
    pub fn of_source(source: &str) -> Self {
        Self::digest(source.trim())
    }

    /// Hex representation (64 lowercase characters).
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading characters, for log lines and UI labels.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Error returned when parsing a malformed fingerprint.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid fingerprint '{0}': expected 64 hex characters")]
pub struct ParseFingerprintError(String);

impl FromStr for Fingerprint {
    type Err = ParseFingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() == HEX_LEN && s.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(Self(s.to_ascii_lowercase()))
        } else {
            Err(ParseFingerprintError(s.to_owned()))
        }
    }
}
