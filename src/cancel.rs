//! Cooperative cancellation shared between the build driver and a run
//!
//! Workers poll the token between artifacts and between verification steps.
//! Nothing is interrupted forcibly.
//!
//! On Ctrl-C: the first signal cancels the run, the second exits immediately.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

/// Exit code for cancelled runs
pub const EXIT_CODE_CANCELLED: i32 = 130;

/// Action to take after a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First signal: cancel the run cooperatively
    Cancel,
    /// Second signal: exit now
    ImmediateExit,
    /// Further signals are ignored
    Ignore,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    signal_count: AtomicU8,
}

/// Cloneable cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Record a signal and decide what to do about it
    pub fn handle_signal(&self) -> SignalAction {
        match self.inner.signal_count.fetch_add(1, Ordering::SeqCst) {
            0 => {
                self.cancel();
                SignalAction::Cancel
            }
            1 => SignalAction::ImmediateExit,
            _ => SignalAction::Ignore,
        }
    }

    /// Install a Ctrl-C handler that drives this token
    pub fn install_signal_handler(&self) -> Result<(), ctrlc::Error> {
        let token = self.clone();
        ctrlc::set_handler(move || match token.handle_signal() {
            SignalAction::Cancel => {
                eprintln!("\nReceived interrupt, cancelling verification...");
            }
            SignalAction::ImmediateExit => {
                eprintln!("\nReceived second interrupt, exiting immediately...");
                std::process::exit(EXIT_CODE_CANCELLED);
            }
            SignalAction::Ignore => {}
        })
    }
}
