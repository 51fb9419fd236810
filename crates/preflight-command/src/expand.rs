//! `{key}` pattern expansion.
//!
//! A pattern such as
//!
//! ```text
//! "{cmd.path}" "-C{config.path}" {bootloader.verbose} -p{build.mcu} -c{protocol}
//! ```
//!
//! is expanded in two steps: every placeholder is replaced by its value from
//! the [`ConfigMap`], then the resulting line is split into arguments with
//! shell quoting rules. Quoted values stay one argument; unquoted values
//! with spaces (`-v -v -v -v`) become several; empty arguments are dropped.

use preflight_config::{ConfigMap, MissingConfigKey};
use tracing::trace;

/// Maximum number of nested value expansions before giving up.
pub const MAX_INDIRECTION_DEPTH: usize = 10;

/// Errors from pattern expansion
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExpandError {
    #[error("pattern expansion failed: {0}")]
    MissingKey(#[from] MissingConfigKey),

    #[error(
        "pattern expansion failed: '{key}' nests more than {} levels of references",
        MAX_INDIRECTION_DEPTH
    )]
    RecursionLimit { key: String },

    #[error("pattern expansion failed: cannot split '{line}' into arguments: {reason}")]
    Tokenize { line: String, reason: String },
}

impl ExpandError {
    /// The configuration key this error is about, if any
    pub fn key(&self) -> Option<&str> {
        match self {
            ExpandError::MissingKey(missing) => Some(&missing.key),
            ExpandError::RecursionLimit { key } => Some(key),
            ExpandError::Tokenize { .. } => None,
        }
    }
}

/// Expand `pattern` against `config` into an argument vector.
///
/// With `allow_indirection`, substituted values that themselves contain
/// placeholders are expanded again (up to [`MAX_INDIRECTION_DEPTH`]).
/// Without it, substituted values are inserted verbatim.
pub fn expand(
    pattern: &str,
    config: &ConfigMap,
    allow_indirection: bool,
) -> Result<Vec<String>, ExpandError> {
    let line = substitute(pattern, config, allow_indirection)?;
    let tokens = shell_words::split(&line).map_err(|e| ExpandError::Tokenize {
        line: line.clone(),
        reason: e.to_string(),
    })?;
    Ok(tokens.into_iter().filter(|t| !t.is_empty()).collect())
}

/// Replace placeholders in `text` without splitting into arguments.
pub fn substitute(
    text: &str,
    config: &ConfigMap,
    allow_indirection: bool,
) -> Result<String, ExpandError> {
    substitute_at(text, config, allow_indirection, 0)
}

fn substitute_at(
    text: &str,
    config: &ConfigMap,
    allow_indirection: bool,
    depth: usize,
) -> Result<String, ExpandError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        let Some(name) = placeholder_name(after) else {
            out.push('{');
            rest = after;
            continue;
        };

        let value = config.get_required(name)?;
        if allow_indirection && placeholder_names(value).next().is_some() {
            if depth >= MAX_INDIRECTION_DEPTH {
                return Err(ExpandError::RecursionLimit {
                    key: name.to_string(),
                });
            }
            trace!(key = name, depth, "following indirect reference");
            out.push_str(&substitute_at(value, config, true, depth + 1)?);
        } else {
            out.push_str(value);
        }
        rest = &after[name.len() + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

fn placeholder_names(text: &str) -> impl Iterator<Item = &str> {
    text.match_indices('{')
        .filter_map(move |(i, _)| placeholder_name(&text[i + 1..]))
}

/// Name of the placeholder starting right after a `{`, if well formed.
fn placeholder_name(after_brace: &str) -> Option<&str> {
    let end = after_brace.find('}')?;
    let name = &after_brace[..end];
    if !name.is_empty() && name.chars().all(is_key_char) {
        Some(name)
    } else {
        None
    }
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}
