//! Subprocess runner with live output streaming.
//!
//! Launches an external program without a shell, drains its stdout and
//! stderr concurrently on two reader threads, and hands each line to a
//! [`LineConsumer`] as soon as it arrives. The calling thread waits for the
//! process while watching for cancellation and timeouts.

mod cancel;
mod output;
mod runner;

pub use cancel::CancelToken;
pub use output::{ExecutionResult, LineConsumer, OutputLine, Stream};
pub use runner::{RunError, RunOptions, Runner, TimeoutKind};
