//! Failure taxonomy and stable exit codes

use std::fmt;

use preflight_command::{ExpandError, FilterError};
use preflight_config::MissingConfigKey;
use preflight_runner::RunError;
use serde::{Deserialize, Serialize};

use super::report::PreflightReport;
use super::state::StateError;
use crate::registry::SelectorError;

/// Stable process exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum ExitCode {
    /// Device check passed
    Success = 0,
    /// Bad settings file or command line
    Usage = 1,
    /// Configuration could not be resolved, expanded or filtered
    Configuration = 10,
    /// Programmer could not be started
    Launch = 40,
    /// Programmer reported a failure
    DeviceCheck = 50,
    /// Cancelled by a signal or stopped by a timeout
    Cancelled = 80,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Exit code used when the run is cancelled
pub const EXIT_CANCELLED: i32 = ExitCode::Cancelled as i32;

/// Pipeline stage an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Resolve,
    Expand,
    Filter,
    Run,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Resolve => "resolve",
            Stage::Expand => "expand",
            Stage::Filter => "filter",
            Stage::Run => "run",
        }
    }
}

/// Coarse failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// Missing key, unknown selector, bad pattern or filter
    Configuration,
    /// Programmer binary could not be started
    Launch,
    /// Programmer ran and failed
    DeviceCheck,
    /// Stopped by a signal
    Cancelled,
    /// Stopped by a time limit
    TimedOut,
}

impl FailureKind {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            FailureKind::Configuration => ExitCode::Configuration,
            FailureKind::Launch => ExitCode::Launch,
            FailureKind::DeviceCheck => ExitCode::DeviceCheck,
            FailureKind::Cancelled | FailureKind::TimedOut => ExitCode::Cancelled,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            FailureKind::Configuration => "could not build the check command",
            FailureKind::Launch => "could not start the programmer",
            FailureKind::DeviceCheck => "device check failed",
            FailureKind::Cancelled => "device check cancelled",
            FailureKind::TimedOut => "device check timed out",
        }
    }
}

/// Underlying cause of a [`PreflightError`]
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    #[error(transparent)]
    MissingKey(#[from] MissingConfigKey),

    #[error(transparent)]
    Selector(#[from] SelectorError),

    #[error(transparent)]
    Expand(#[from] ExpandError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error(transparent)]
    State(#[from] StateError),
}

impl ErrorKind {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ErrorKind::Run(RunError::Cancelled { .. }) => FailureKind::Cancelled,
            ErrorKind::Run(RunError::TimedOut { .. }) => FailureKind::TimedOut,
            ErrorKind::Run(e) if e.is_launch_failure() => FailureKind::Launch,
            ErrorKind::Run(_) => FailureKind::DeviceCheck,
            ErrorKind::MissingKey(_)
            | ErrorKind::Selector(_)
            | ErrorKind::Expand(_)
            | ErrorKind::Filter(_)
            | ErrorKind::State(_) => FailureKind::Configuration,
        }
    }
}

/// A failed preflight: the stage, the cause, and the report up to the
/// point of failure.
#[derive(Debug)]
pub struct PreflightError {
    stage: Stage,
    kind: ErrorKind,
    report: Box<PreflightReport>,
}

impl PreflightError {
    pub(crate) fn new(stage: Stage, kind: ErrorKind, report: PreflightReport) -> Self {
        Self {
            stage,
            kind,
            report: Box::new(report),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Partial report, including the state history and any captured output
    pub fn report(&self) -> &PreflightReport {
        &self.report
    }

    pub fn into_report(self) -> PreflightReport {
        *self.report
    }

    pub fn failure_kind(&self) -> FailureKind {
        self.kind.failure_kind()
    }

    pub fn exit_code(&self) -> i32 {
        self.failure_kind().exit_code().code()
    }

    /// True when the command could not be built, as opposed to the device
    /// check itself failing.
    pub fn is_configuration_problem(&self) -> bool {
        self.failure_kind() == FailureKind::Configuration
    }
}

impl fmt::Display for PreflightError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} stage): {}",
            self.failure_kind().description(),
            self.stage.as_str(),
            self.kind
        )
    }
}

impl std::error::Error for PreflightError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use preflight_runner::{ExecutionResult, TimeoutKind};
    use std::time::Duration;

    fn result(code: Option<i32>) -> ExecutionResult {
        ExecutionResult {
            exit_code: code,
            output: Vec::new(),
            duration: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_exit_codes_are_stable() {
        assert_eq!(ExitCode::Success.code(), 0);
        assert_eq!(ExitCode::Usage.code(), 1);
        assert_eq!(ExitCode::Configuration.code(), 10);
        assert_eq!(ExitCode::Launch.code(), 40);
        assert_eq!(ExitCode::DeviceCheck.code(), 50);
        assert_eq!(EXIT_CANCELLED, 80);
    }

    #[test]
    fn test_configuration_errors() {
        let kinds: Vec<ErrorKind> = vec![
            MissingConfigKey::new("bootloader.tool").into(),
            SelectorError::UnknownProgrammer {
                selector: "avrispv2".to_string(),
                platform: "cestino:avr".to_string(),
            }
            .into(),
            FilterError::InvalidTruncation {
                drop_count: 2,
                len: 1,
            }
            .into(),
        ];
        for kind in kinds {
            assert_eq!(kind.failure_kind(), FailureKind::Configuration);
            assert_eq!(kind.failure_kind().exit_code(), ExitCode::Configuration);
        }
    }

    #[test]
    fn test_run_errors() {
        let exited: ErrorKind = RunError::ExitedNonZero {
            code: 1,
            result: result(Some(1)),
        }
        .into();
        assert_eq!(exited.failure_kind(), FailureKind::DeviceCheck);

        let launch: ErrorKind = RunError::EmptyCommand.into();
        assert_eq!(launch.failure_kind(), FailureKind::Launch);

        let timed_out: ErrorKind = RunError::TimedOut {
            kind: TimeoutKind::Idle,
            result: result(None),
        }
        .into();
        assert_eq!(timed_out.failure_kind().exit_code(), ExitCode::Cancelled);
    }

    #[test]
    fn test_display_names_key() {
        let err = PreflightError::new(
            Stage::Expand,
            MissingConfigKey::new("bootloader.pattern").into(),
            PreflightReport::new(),
        );
        let message = err.to_string();
        assert!(message.starts_with("could not build the check command"));
        assert!(message.contains("bootloader.pattern"));
        assert!(err.is_configuration_problem());
        assert_eq!(err.exit_code(), 10);
    }
}
