//! Time limits for the device check
//!
//! - `overall_seconds`: maximum wall-clock time for the programmer run
//! - `idle_seconds`: maximum time without a new output line
//! - `grace_seconds`: time between SIGTERM and SIGKILL when the run is stopped
//!
//! Enforcement happens in the runner; this module only validates the
//! configured values and turns them into [`RunOptions`].

use std::time::Duration;

use preflight_runner::{CancelToken, RunOptions};
use serde::{Deserialize, Serialize};

pub const DEFAULT_OVERALL_SECONDS: u64 = 120;
pub const DEFAULT_IDLE_SECONDS: u64 = 60;
pub const DEFAULT_GRACE_SECONDS: u64 = 5;

/// Upper bound for `overall_seconds` (one day)
pub const MAX_OVERALL_SECONDS: u64 = 86_400;

/// Upper bound for `grace_seconds`
pub const MAX_GRACE_SECONDS: u64 = 60;

/// Timeout configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutConfig {
    /// Maximum wall-clock time for the run (default: 120)
    pub overall_seconds: u64,

    /// Maximum time without output (default: 60)
    pub idle_seconds: u64,

    /// Time between SIGTERM and SIGKILL (default: 5)
    pub grace_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            overall_seconds: DEFAULT_OVERALL_SECONDS,
            idle_seconds: DEFAULT_IDLE_SECONDS,
            grace_seconds: DEFAULT_GRACE_SECONDS,
        }
    }
}

impl TimeoutConfig {
    /// Check the configured bounds.
    pub fn validate(&self) -> Result<(), TimeoutValidationError> {
        if self.overall_seconds == 0 || self.overall_seconds > MAX_OVERALL_SECONDS {
            return Err(TimeoutValidationError::OverallOutOfBounds {
                value: self.overall_seconds,
            });
        }

        if self.idle_seconds == 0 || self.idle_seconds > self.overall_seconds {
            return Err(TimeoutValidationError::IdleOutOfBounds {
                value: self.idle_seconds,
                max: self.overall_seconds,
            });
        }

        if self.grace_seconds > MAX_GRACE_SECONDS {
            return Err(TimeoutValidationError::GraceOutOfBounds {
                value: self.grace_seconds,
            });
        }

        Ok(())
    }

    pub fn overall(&self) -> Duration {
        Duration::from_secs(self.overall_seconds)
    }

    pub fn idle(&self) -> Duration {
        Duration::from_secs(self.idle_seconds)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_seconds)
    }

    /// Runner options enforcing these limits, stopped early by `cancel`.
    pub fn to_run_options(&self, cancel: CancelToken) -> RunOptions {
        RunOptions {
            overall_timeout: Some(self.overall()),
            idle_timeout: Some(self.idle()),
            grace_period: self.grace(),
            cancel,
            ..RunOptions::default()
        }
    }
}

/// Timeout validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeoutValidationError {
    #[error("timeouts.overall_seconds must be in (0, 86400], got {value}")]
    OverallOutOfBounds { value: u64 },

    #[error("timeouts.idle_seconds must be in (0, {max}], got {value}")]
    IdleOutOfBounds { value: u64, max: u64 },

    #[error("timeouts.grace_seconds must be in [0, 60], got {value}")]
    GraceOutOfBounds { value: u64 },
}
