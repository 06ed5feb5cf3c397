//! Queue configuration.
//!
//! [`QueueConfig`] can be built in code with the `with_*` builder methods or
//! deserialized from JSON; every field is optional and falls back to its default.
//!
//! ```json
//! { "max_concurrency": 2, "max_retries": 3, "base_delay_ms": 2000 }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::{DEFAULT_BASE_DELAY, DEFAULT_MAX_RETRIES};

/// Default number of simultaneous uploads.
pub const DEFAULT_MAX_CONCURRENCY: usize = 2;

/// Errors produced while loading or validating a [`QueueConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("max_concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("invalid queue config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Queue-wide tuning knobs.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use uploadq::QueueConfig;
///
/// let config = QueueConfig::default()
///     .with_max_concurrency(4)
///     .with_base_delay(Duration::from_millis(500));
///
/// assert_eq!(config.max_concurrency, 4);
/// assert_eq!(config.max_retries, 3);
/// assert_eq!(config.base_delay(), Duration::from_millis(500));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    /// Maximum number of tasks in `Uploading` at once.
    pub max_concurrency: usize,
    /// Automatic retries before a task becomes `Failed`.
    pub max_retries: u32,
    /// Base delay of the linear backoff, in milliseconds.
    pub base_delay_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY.as_millis() as u64,
        }
    }
}

impl QueueConfig {
    /// Parses and validates a JSON config document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON or unknown fields, and
    /// [`ConfigError::ZeroConcurrency`] if `max_concurrency` is `0`.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants the queue relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        Ok(())
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the backoff base delay. Sub-millisecond precision is truncated.
    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay_ms = u64::try_from(base_delay.as_millis()).unwrap_or(u64::MAX);
        self
    }
}
