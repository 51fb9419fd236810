//! Serializable record of one preflight

use chrono::{DateTime, Utc};
use preflight_config::LayerSource;
use preflight_runner::{ExecutionResult, RunError};
use serde::Serialize;

use super::error::{ExitCode, FailureKind, Stage};
use super::state::StateChange;
use crate::registry::{PlatformId, ResolvedDefinition};

/// Schema identifier
pub const REPORT_SCHEMA_ID: &str = "burn-preflight/report@1";

/// Final outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PreflightStatus {
    /// Not finished yet
    Pending,
    Succeeded,
    Failed,
    Cancelled,
}

/// Why a preflight failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureSummary {
    pub stage: Stage,
    pub kind: FailureKind,

    /// `TIMEOUT_OVERALL` / `TIMEOUT_IDLE` for timeouts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subkind: Option<String>,

    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreflightReport {
    pub schema_id: String,

    /// ULID of this preflight
    pub run_id: String,

    pub started_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    pub status: PreflightStatus,

    pub exit_code: i32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<PlatformId>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub board: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub programmer: Option<ResolvedDefinition>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<ResolvedDefinition>,

    /// Configuration layers in merge order
    pub layers: Vec<LayerSource>,

    /// Command as the burn would run it
    pub full_command: Vec<String>,

    /// Command actually run
    pub command: Vec<String>,

    /// Arguments removed by the filter
    pub removed: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionResult>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureSummary>,

    pub history: Vec<StateChange>,
}

impl PreflightReport {
    pub fn new() -> Self {
        Self {
            schema_id: REPORT_SCHEMA_ID.to_string(),
            run_id: ulid::Ulid::new().to_string(),
            started_at: Utc::now(),
            finished_at: None,
            status: PreflightStatus::Pending,
            exit_code: ExitCode::Success.code(),
            platform: None,
            board: None,
            programmer: None,
            tool: None,
            layers: Vec::new(),
            full_command: Vec::new(),
            command: Vec::new(),
            removed: Vec::new(),
            execution: None,
            failure: None,
            history: Vec::new(),
        }
    }

    pub(crate) fn succeed(&mut self, history: &[StateChange]) {
        self.status = PreflightStatus::Succeeded;
        self.exit_code = ExitCode::Success.code();
        self.finish(history);
    }

    pub(crate) fn fail(&mut self, failure: FailureSummary, history: &[StateChange]) {
        self.status = match failure.kind {
            FailureKind::Cancelled | FailureKind::TimedOut => PreflightStatus::Cancelled,
            _ => PreflightStatus::Failed,
        };
        self.exit_code = failure.kind.exit_code().code();
        self.failure = Some(failure);
        self.finish(history);
    }

    fn finish(&mut self, history: &[StateChange]) {
        self.finished_at = Some(Utc::now());
        self.history = history.to_vec();
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl Default for PreflightReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Timeout subkind of a run error, if it is one.
pub(crate) fn timeout_subkind(err: &RunError) -> Option<String> {
    match err {
        RunError::TimedOut { kind, .. } => Some(kind.failure_subkind().to_string()),
        _ => None,
    }
}
