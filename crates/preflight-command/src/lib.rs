//! Programmer command construction.
//!
//! Expands a configuration-driven command pattern into an argument vector
//! and strips the destructive actions from it, producing a command that
//! only reads from the target device.

mod expand;
mod filter;

pub use expand::{expand, substitute, ExpandError, MAX_INDIRECTION_DEPTH};
pub use filter::{
    filter_destructive_suffix, CommandFilter, FilterError, FilterOutcome, FilterPolicy,
    DEFAULT_DROP_TRAILING,
};

/// Render an argument vector as a single shell-quoted line for display.
pub fn render_command(cmd: &[String]) -> String {
    shell_words::join(cmd)
}
