//! Failure strategies the diagnostics channel hands violations to.

use std::io::Write;
use std::panic::Location;

use parking_lot::Mutex;
use tracing::error;

use crate::error::MemoryError;

/// Decides what happens to a violation that was not skipped.
///
/// Returning from [`FailureHandler::on_failure`] lets the offending call
/// continue as a no-op.
pub trait FailureHandler: Send + Sync {
    fn on_failure(&self, error: &MemoryError, location: &'static Location<'static>);
}

/// Flushes output and terminates the process. Used in production.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminateHandler;

impl FailureHandler for TerminateHandler {
    fn on_failure(&self, error: &MemoryError, location: &'static Location<'static>) {
        error!(
            kind = error.kind(),
            file = location.file(),
            line = location.line(),
            "ASSERT_FAIL: terminating"
        );
        let _ = std::io::stdout().flush();
        let _ = std::io::stderr().flush();
        std::process::exit(1);
    }
}

/// Panics with the violation. Makes unexpected violations fail a test.
#[derive(Debug, Default, Clone, Copy)]
pub struct PanicHandler;

impl FailureHandler for PanicHandler {
    fn on_failure(&self, error: &MemoryError, location: &'static Location<'static>) {
        panic!("ASSERT_FAIL: {} at {}:{}", error, location.file(), location.line());
    }
}

/// One violation captured by [`RecordingHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    pub error: MemoryError,
    pub file: &'static str,
    pub line: u32,
}

/// Records violations and lets execution continue.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    signals: Mutex<Vec<Signal>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signals(&self) -> Vec<Signal> {
        self.signals.lock().clone()
    }

    /// Drains and returns the recorded violations.
    pub fn take(&self) -> Vec<Signal> {
        std::mem::take(&mut *self.signals.lock())
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.signals.lock().iter().map(|s| s.error.kind()).collect()
    }
}

impl FailureHandler for RecordingHandler {
    fn on_failure(&self, error: &MemoryError, location: &'static Location<'static>) {
        self.signals.lock().push(Signal {
            error: error.clone(),
            file: location.file(),
            line: location.line(),
        });
    }
}
