//! ## keel-core::diagnostics
//! **Single failure channel for memory manager violations**
//!
//! Every violation is logged, then either absorbed by the skip countdown or
//! handed to the injected [`FailureHandler`]. The countdown lets a test
//! assert that an operation fires exactly N violations:
//!
//! ```ignore
//! manager.diagnostics().skip_next(1);
//! drop(scope); // leaks
//! assert_eq!(manager.diagnostics().pending_skips(), 0);
//! ```

mod handler;

use std::panic::Location;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::{error, warn};

use crate::error::MemoryError;

pub use handler::{FailureHandler, PanicHandler, RecordingHandler, Signal, TerminateHandler};

pub struct Diagnostics {
    handler: Arc<dyn FailureHandler>,
    skips: AtomicU32,
}

impl Diagnostics {
    pub fn new(handler: Arc<dyn FailureHandler>) -> Self {
        Self {
            handler,
            skips: AtomicU32::new(0),
        }
    }

    /// Absorb the next `count` violations instead of handing them on.
    pub fn skip_next(&self, count: u32) {
        self.skips.store(count, Ordering::SeqCst);
    }

    /// Skips not yet consumed. Zero after the expected violations fired.
    pub fn pending_skips(&self) -> u32 {
        self.skips.load(Ordering::SeqCst)
    }

    /// Reports a violation. Returns only if it was skipped or the handler
    /// chose to continue.
    pub fn signal(&self, error: &MemoryError, location: &'static Location<'static>) {
        error!(
            kind = error.kind(),
            pool = error.pool().map(|pool| pool.name()),
            file = location.file(),
            line = location.line(),
            "{}",
            error
        );

        let skipped = self
            .skips
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if skipped {
            warn!(kind = error.kind(), "violation skipped");
            return;
        }

        self.handler.on_failure(error, location);
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(Arc::new(TerminateHandler))
    }
}
