// Retry and give-up policy for content resolution.
use std::time::Duration;

use crate::core::error::{Error, ErrorKind};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_GIVE_UP_THRESHOLD: u32 = 10;
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per hash per run.
    pub max_attempts: u32,
    /// Pause between two attempts on the same hash.
    pub backoff: Duration,
    /// Accumulated attempts above which a missing hash is recorded as empty.
    pub give_up_threshold: u32,
    /// Per-request timeout for content fetches.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Duration::ZERO,
            give_up_threshold: DEFAULT_GIVE_UP_THRESHOLD,
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_attempts == 0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("max attempts must be at least 1")
                .with_hint("Pass --max-retries 1 or higher."));
        }
        if self.timeout.is_zero() {
            return Err(Error::new(ErrorKind::Usage).with_message("fetch timeout must be non-zero"));
        }
        Ok(())
    }

    /// Whether a hash with `attempts` accumulated attempts should stop being retried.
    pub fn gives_up_after(&self, attempts: u32) -> bool {
        attempts > self.give_up_threshold
    }
}
