//! Retry policy — whether, and after how long, a failed upload is attempted again.

use std::time::Duration;

use crate::config::QueueConfig;

/// Default number of automatic retries before a task becomes `Failed`.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for the linear backoff.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);

/// Linear backoff retry policy.
///
/// The policy is a pure function of the retry count: it never inspects the task
/// payload and holds no mutable state, so it can be copied freely.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use uploadq::RetryPolicy;
///
/// let policy = RetryPolicy::default();
/// assert!(policy.should_retry(2));
/// assert!(!policy.should_retry(3));
/// assert_eq!(policy.delay_for(2), Duration::from_secs(4));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_BASE_DELAY)
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Returns `true` while `retry_count < max_retries`.
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// Delay before the `retry_count`-th retry becomes eligible for dispatch.
    ///
    /// `base_delay * retry_count`, saturating at [`Duration::MAX`].
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        self.base_delay.saturating_mul(retry_count)
    }
}

impl From<&QueueConfig> for RetryPolicy {
    fn from(config: &QueueConfig) -> Self {
        Self::new(config.max_retries, config.base_delay())
    }
}
