//! Destructive-action filtering.
//!
//! Bootloader patterns end with the write actions (flash the bootloader,
//! then set the lock fuse). Removing those leaves every read and verify
//! step of the invocation, so the programmer still connects, checks the
//! device signature and reads the fuses, but writes nothing.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

/// Number of trailing tokens dropped by the default policy.
pub const DEFAULT_DROP_TRAILING: usize = 2;

/// Errors from command filtering
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    #[error("cannot drop {drop_count} trailing arguments from a command of {len}")]
    InvalidTruncation { drop_count: usize, len: usize },

    #[error("no argument matched the exclusion patterns {patterns:?}")]
    NothingExcluded { patterns: Vec<String> },

    #[error("destructive argument '{token}' survived filtering (matched '{pattern}')")]
    DestructiveTokenRetained { token: String, pattern: String },

    #[error("invalid filter pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Drop the last `drop_count` arguments of `cmd`.
///
/// The result has exactly `cmd.len() - drop_count` elements in their
/// original order. Asking for more than `cmd.len()` is an error.
pub fn filter_destructive_suffix(
    cmd: &[String],
    drop_count: usize,
) -> Result<Vec<String>, FilterError> {
    if drop_count > cmd.len() {
        return Err(FilterError::InvalidTruncation {
            drop_count,
            len: cmd.len(),
        });
    }
    Ok(cmd[..cmd.len() - drop_count].to_vec())
}

/// How destructive actions are located in a command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterPolicy {
    /// Remove a fixed number of trailing arguments
    DropTrailing { count: usize },
    /// Remove every argument matching one of these regexes
    ExcludeActions { patterns: Vec<String> },
}

impl Default for FilterPolicy {
    fn default() -> Self {
        FilterPolicy::DropTrailing {
            count: DEFAULT_DROP_TRAILING,
        }
    }
}

/// Result of applying a [`CommandFilter`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterOutcome {
    /// The safe command
    pub command: Vec<String>,
    /// Arguments that were removed, in original order
    pub removed: Vec<String>,
}

/// Compiled filter: a removal policy plus an optional deny list that the
/// surviving arguments are checked against.
#[derive(Debug, Clone)]
pub struct CommandFilter {
    policy: FilterPolicy,
    exclude: Vec<Regex>,
    deny: Vec<Regex>,
}

impl CommandFilter {
    /// Compile `policy` and `deny` patterns.
    pub fn new(policy: FilterPolicy, deny: &[String]) -> Result<Self, FilterError> {
        let exclude = match &policy {
            FilterPolicy::DropTrailing { .. } => Vec::new(),
            FilterPolicy::ExcludeActions { patterns } => compile_all(patterns)?,
        };
        Ok(Self {
            policy,
            exclude,
            deny: compile_all(deny)?,
        })
    }

    pub fn policy(&self) -> &FilterPolicy {
        &self.policy
    }

    /// Apply the policy, then check the result against the deny list.
    pub fn apply(&self, cmd: &[String]) -> Result<FilterOutcome, FilterError> {
        let outcome = match &self.policy {
            FilterPolicy::DropTrailing { count } => {
                let command = filter_destructive_suffix(cmd, *count)?;
                let removed = cmd[command.len()..].to_vec();
                FilterOutcome { command, removed }
            }
            FilterPolicy::ExcludeActions { patterns } => {
                let (removed, command): (Vec<String>, Vec<String>) = cmd
                    .iter()
                    .cloned()
                    .partition(|token| self.exclude.iter().any(|re| re.is_match(token)));
                if removed.is_empty() {
                    return Err(FilterError::NothingExcluded {
                        patterns: patterns.clone(),
                    });
                }
                FilterOutcome { command, removed }
            }
        };

        for token in &outcome.command {
            if let Some(re) = self.deny.iter().find(|re| re.is_match(token)) {
                return Err(FilterError::DestructiveTokenRetained {
                    token: token.clone(),
                    pattern: re.as_str().to_string(),
                });
            }
        }

        Ok(outcome)
    }
}

fn compile_all(patterns: &[String]) -> Result<Vec<Regex>, FilterError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| FilterError::InvalidPattern {
                pattern: p.clone(),
                reason: e.to_string(),
            })
        })
        .collect()
}
