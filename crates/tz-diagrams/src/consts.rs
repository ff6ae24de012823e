//! Internal constants for TikZ rendering.

use std::time::Duration;

/// Fence language tag that marks a TikZ block (matched case-insensitively).
pub const TIKZ_FENCE_TAG: &str = "tikz";

/// Default time to wait for a single engine render (30 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Highest `pgfplots` compat level the default engine supports.
pub const DEFAULT_MAX_PGFPLOTS_COMPAT: &str = "1.16";

/// Quiet period after the last document change before re-rendering.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Maximum length of a raw engine error shown to the user.
pub(crate) const ERROR_MESSAGE_LIMIT: usize = 500;
