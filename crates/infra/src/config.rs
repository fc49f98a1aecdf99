//! Configuration loading and representation.

use tracing::warn;

/// Environment variable overriding [`DispatcherConfig::max_conflict_retries`].
pub const MAX_CONFLICT_RETRIES_ENV: &str = "SHIPPING_MAX_CONFLICT_RETRIES";

/// Command dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// How many times a command is reloaded and re-validated after an
    /// optimistic concurrency conflict before the conflict is surfaced.
    pub max_conflict_retries: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 3,
        }
    }
}

impl DispatcherConfig {
    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    /// Read overrides from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through `lookup`; unparsable values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(MAX_CONFLICT_RETRIES_ENV) {
            match raw.trim().parse::<u32>() {
                Ok(retries) => config.max_conflict_retries = retries,
                Err(err) => warn!(
                    var = MAX_CONFLICT_RETRIES_ENV,
                    value = %raw,
                    error = %err,
                    "ignoring invalid dispatcher config value"
                ),
            }
        }

        config
    }
}
