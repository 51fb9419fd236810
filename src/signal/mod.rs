//! SIGINT/SIGTERM handling for the CLI
//!
//! On the first signal the shared [`CancelToken`] is tripped; the runner then
//! stops the programmer (SIGTERM, then SIGKILL after the grace period) and
//! the preflight ends as cancelled with exit code 80.
//!
//! A second signal exits the process immediately with the same code.
//! Further signals are ignored.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use preflight_runner::CancelToken;
use tracing::warn;

use crate::preflight::EXIT_CANCELLED;

/// Signal counter shared with the handler
#[derive(Debug, Default)]
pub struct SignalState {
    signal_count: AtomicU8,
    cancel: CancelToken,
}

impl SignalState {
    pub fn new(cancel: CancelToken) -> Self {
        Self {
            signal_count: AtomicU8::new(0),
            cancel,
        }
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn signal_count(&self) -> u8 {
        self.signal_count.load(Ordering::SeqCst)
    }

    /// Record one signal and decide what to do about it.
    pub fn handle_signal(&self) -> SignalAction {
        let previous = self
            .signal_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_add(1)))
            .unwrap_or(u8::MAX);

        match previous {
            0 => {
                self.cancel.cancel();
                SignalAction::Cancel
            }
            1 => SignalAction::Exit,
            _ => SignalAction::Ignore,
        }
    }
}

/// Action to take after receiving a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First signal: stop the running check
    Cancel,
    /// Second signal: exit now
    Exit,
    /// Any later signal
    Ignore,
}

/// Installs the process-wide handler.
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    pub fn new(cancel: CancelToken) -> Self {
        Self {
            state: Arc::new(SignalState::new(cancel)),
        }
    }

    pub fn state(&self) -> Arc<SignalState> {
        Arc::clone(&self.state)
    }

    /// Install handlers for SIGINT and SIGTERM. Call once at startup.
    pub fn install(&self) -> Result<(), ctrlc::Error> {
        let state = Arc::clone(&self.state);
        ctrlc::set_handler(move || match state.handle_signal() {
            SignalAction::Cancel => {
                warn!("interrupt received, stopping the device check");
            }
            SignalAction::Exit => {
                eprintln!("\nSecond interrupt received, exiting immediately");
                std::process::exit(EXIT_CANCELLED);
            }
            SignalAction::Ignore => {}
        })
    }
}
