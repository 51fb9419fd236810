//! Preflight state machine
//!
//! IDLE → CONFIG_RESOLVED → COMMAND_BUILT → COMMAND_FILTERED → RUNNING →
//! {SUCCEEDED | FAILED}; every non-terminal state may fail directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PreflightState {
    /// Nothing done yet
    Idle,
    /// Layers merged into one configuration map
    ConfigResolved,
    /// Bootloader pattern expanded into the full command
    CommandBuilt,
    /// Destructive actions removed
    CommandFiltered,
    /// Programmer running
    Running,
    /// Device check passed
    Succeeded,
    /// Any stage failed
    Failed,
}

impl PreflightState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PreflightState::Succeeded | PreflightState::Failed)
    }

    /// Check if transition from this state to target is valid
    pub fn can_transition_to(&self, target: PreflightState) -> bool {
        use PreflightState::*;
        match (self, target) {
            (Idle, ConfigResolved)
            | (ConfigResolved, CommandBuilt)
            | (CommandBuilt, CommandFiltered)
            | (CommandFiltered, Running)
            | (Running, Succeeded) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PreflightState::Idle => "IDLE",
            PreflightState::ConfigResolved => "CONFIG_RESOLVED",
            PreflightState::CommandBuilt => "COMMAND_BUILT",
            PreflightState::CommandFiltered => "COMMAND_FILTERED",
            PreflightState::Running => "RUNNING",
            PreflightState::Succeeded => "SUCCEEDED",
            PreflightState::Failed => "FAILED",
        }
    }
}

/// One entry of the state history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub state: PreflightState,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("invalid state transition from {} to {}", .from.as_str(), .to.as_str())]
    InvalidTransition {
        from: PreflightState,
        to: PreflightState,
    },
}

/// Current state plus the timestamped history that led to it
#[derive(Debug, Clone)]
pub struct StateTracker {
    history: Vec<StateChange>,
}

impl StateTracker {
    /// Start in IDLE.
    pub fn new() -> Self {
        Self {
            history: vec![StateChange {
                state: PreflightState::Idle,
                at: Utc::now(),
            }],
        }
    }

    pub fn current(&self) -> PreflightState {
        self.history
            .last()
            .map(|change| change.state)
            .unwrap_or(PreflightState::Idle)
    }

    pub fn history(&self) -> &[StateChange] {
        &self.history
    }

    /// Move to `target`, rejecting transitions the state machine forbids.
    pub fn transition(&mut self, target: PreflightState) -> Result<(), StateError> {
        let from = self.current();
        if !from.can_transition_to(target) {
            return Err(StateError::InvalidTransition { from, to: target });
        }
        info!(from = from.as_str(), to = target.as_str(), "preflight state change");
        self.history.push(StateChange {
            state: target,
            at: Utc::now(),
        });
        Ok(())
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}
