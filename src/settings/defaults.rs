//! Typed settings and their built-in defaults (layer 1)

use std::path::PathBuf;

use preflight_command::{FilterPolicy, DEFAULT_DROP_TRAILING};
use serde::{Deserialize, Serialize};

use crate::timeout::TimeoutConfig;

/// Tool settings after all layers are merged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PreflightSettings {
    /// Arduino `preferences.txt` holding the global preferences
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferences: Option<PathBuf>,

    /// Hardware roots, scanned in order
    pub hardware: Vec<PathBuf>,

    /// Use the `.params.verbose` argument variants (default: true)
    pub verbose: bool,

    pub filter: FilterSettings,

    pub timeouts: TimeoutConfig,
}

impl Default for PreflightSettings {
    fn default() -> Self {
        Self {
            preferences: None,
            hardware: Vec::new(),
            verbose: true,
            filter: FilterSettings::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

/// `[filter]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterSettings {
    /// Trailing arguments to drop (default: 2)
    pub drop_trailing: usize,

    /// Regexes of arguments to drop; when non-empty this replaces
    /// `drop_trailing`
    pub exclude: Vec<String>,

    /// Regexes no surviving argument may match (default: any `-U<memory>:w:`)
    pub deny: Vec<String>,
}

/// Deny pattern applied unless the settings replace the list
pub const DEFAULT_DENY_PATTERN: &str = "^-U[a-z]+:w:";

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            drop_trailing: DEFAULT_DROP_TRAILING,
            exclude: Vec::new(),
            deny: vec![DEFAULT_DENY_PATTERN.to_string()],
        }
    }
}

/// Filter validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterValidationError {
    #[error("filter.drop_trailing must be at least {min}, got {value}")]
    DropTrailingTooSmall { value: usize, min: usize },
}

impl FilterSettings {
    /// The positional policy may never keep a bootloader or lock write.
    pub fn validate(&self) -> Result<(), FilterValidationError> {
        if self.exclude.is_empty() && self.drop_trailing < DEFAULT_DROP_TRAILING {
            return Err(FilterValidationError::DropTrailingTooSmall {
                value: self.drop_trailing,
                min: DEFAULT_DROP_TRAILING,
            });
        }
        Ok(())
    }

    pub fn policy(&self) -> FilterPolicy {
        if self.exclude.is_empty() {
            FilterPolicy::DropTrailing {
                count: self.drop_trailing,
            }
        } else {
            FilterPolicy::ExcludeActions {
                patterns: self.exclude.clone(),
            }
        }
    }
}
