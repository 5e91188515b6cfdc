//! ## keel-core::manager
//! **Accounting facade over the pool registry**
//!
//! [`MemoryManager`] is the process-wide state: pools, statistics, the
//! diagnostics channel and the enable / shutting-down toggles. It is
//! constructed explicitly and shared through an `Arc`; per-thread scope
//! state lives in [`ThreadContext`].

use std::panic::Location;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use keel_config::{DiagnosticLevel, MemoryConfig, ReleaseTier};
use tracing::{debug, info, trace};

use crate::alloc::stack::Outstanding;
use crate::alloc::{
    FreeTracking, PoolId, PoolRegistry, PoolReport, ReleaseFault, Released, StatsSnapshot,
};
use crate::diagnostics::{Diagnostics, FailureHandler, TerminateHandler};
use crate::error::{InvalidRelease, MemoryError};
use crate::scope::ThreadContext;

pub struct MemoryManager {
    registry: PoolRegistry,
    diagnostics: Diagnostics,
    level: DiagnosticLevel,
    tier: ReleaseTier,
    enabled: AtomicBool,
    shutting_down: AtomicBool,
}

impl MemoryManager {
    /// Creates a manager that terminates the process on violations.
    pub fn new(config: &MemoryConfig) -> Self {
        Self::with_handler(config, Arc::new(TerminateHandler))
    }

    pub fn with_handler(config: &MemoryConfig, handler: Arc<dyn FailureHandler>) -> Self {
        info!(
            level = ?config.diagnostic_level,
            tier = ?config.release_tier,
            enabled = config.enabled,
            permanent_capacity = config.permanent_capacity,
            temporary_stack_capacity = config.temporary_stack_capacity,
            "memory manager init"
        );
        Self {
            registry: PoolRegistry::new(config),
            diagnostics: Diagnostics::new(handler),
            level: config.diagnostic_level,
            tier: config.release_tier,
            enabled: AtomicBool::new(config.enabled),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Convenience for a fresh per-thread context bound to this manager.
    pub fn context(self: &Arc<Self>) -> ThreadContext {
        ThreadContext::new(Arc::clone(self))
    }

    pub fn registry(&self) -> &PoolRegistry {
        &self.registry
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn diagnostic_level(&self) -> DiagnosticLevel {
        self.level
    }

    pub fn release_tier(&self) -> ReleaseTier {
        self.tier
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// When disabled, allocations bypass the pools and no check runs.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// While set, misuse and leak checks are suppressed.
    pub fn set_shutting_down(&self, shutting_down: bool) {
        self.shutting_down.store(shutting_down, Ordering::Release);
    }

    /// Whether misuse and leak checks currently run.
    pub fn checks_active(&self) -> bool {
        self.tier.checks_enabled() && self.is_enabled() && !self.is_shutting_down()
    }

    pub fn stats(&self, pool: PoolId) -> StatsSnapshot {
        self.registry.snapshot(pool)
    }

    pub fn reports(&self) -> Vec<PoolReport> {
        self.registry.reports()
    }

    /// Allocates `size` bytes from `pool`.
    ///
    /// Exhaustion is signalled; `Err` is only seen when the signal is absorbed.
    #[track_caller]
    pub fn allocate_in(&self, pool: PoolId, size: usize) -> Result<NonNull<u8>, MemoryError> {
        self.allocate_at(pool, size, false, Location::caller())
    }

    /// Allocates without signalling on exhaustion.
    #[track_caller]
    pub fn try_allocate_in(&self, pool: PoolId, size: usize) -> Option<NonNull<u8>> {
        self.allocate_at(pool, size, true, Location::caller()).ok()
    }

    pub(crate) fn allocate_at(
        &self,
        pool: PoolId,
        size: usize,
        fallible: bool,
        location: &'static Location<'static>,
    ) -> Result<NonNull<u8>, MemoryError> {
        if !self.is_enabled() {
            return self
                .registry
                .heap()
                .allocate_untracked(size)
                .map(|block| block.ptr)
                .ok_or(MemoryError::OutOfMemory { pool, size });
        }

        match self.registry.pool(pool).allocate(size) {
            Some(block) => {
                let (live_count, live_bytes) = self.live_tracking(pool);
                self.registry.stats(pool).record_allocation(
                    block.size as u64,
                    live_count,
                    live_bytes,
                );
                trace!(%pool, size = block.size, "allocate");
                Ok(block.ptr)
            }
            None => {
                let error = MemoryError::OutOfMemory { pool, size };
                if fallible {
                    debug!(%pool, size, "fallible allocation failed");
                } else {
                    self.diagnostics.signal(&error, location);
                }
                Err(error)
            }
        }
    }

    /// Returns a block to whichever pool produced it.
    ///
    /// Violations are signalled; `Err` is only seen when the signal is absorbed.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by an allocation on this manager. Stale
    /// pointers (already released, or from a closed stack scope) are detected,
    /// except a heap block released twice while checks are inactive.
    #[track_caller]
    pub unsafe fn release(&self, ptr: NonNull<u8>) -> Result<(), MemoryError> {
        // SAFETY: forwarded to the caller.
        unsafe { self.release_at(ptr, Location::caller()) }
    }

    pub(crate) unsafe fn release_at(
        &self,
        ptr: NonNull<u8>,
        location: &'static Location<'static>,
    ) -> Result<(), MemoryError> {
        let Some(pool) = self.registry.owner_of(ptr) else {
            return self.violation(
                MemoryError::InvalidRelease {
                    reason: InvalidRelease::NotOwned,
                },
                location,
            );
        };

        // SAFETY: `owner_of` confirmed the pool owns `ptr`.
        match unsafe { self.registry.pool(pool).release(ptr) } {
            Ok(released) => {
                self.account_release(pool, released);
                if !released.in_order {
                    return self.violation(
                        MemoryError::OutOfOrderRelease {
                            pool,
                            size: released.size,
                        },
                        location,
                    );
                }
                Ok(())
            }
            Err(fault) => self.violation(fault_error(pool, fault), location),
        }
    }

    /// Signals a misuse when checks are active, otherwise ignores it.
    pub(crate) fn violation(
        &self,
        error: MemoryError,
        location: &'static Location<'static>,
    ) -> Result<(), MemoryError> {
        if !self.checks_active() {
            trace!(kind = error.kind(), "check suppressed");
            return Ok(());
        }
        self.diagnostics.signal(&error, location);
        Err(error)
    }

    fn live_tracking(&self, pool: PoolId) -> (bool, bool) {
        match self.registry.pool(pool).free_tracking() {
            FreeTracking::Precise | FreeTracking::Never => (true, true),
            FreeTracking::Coarse => (self.level.tracks_counts(), self.level.tracks_bytes()),
        }
    }

    fn account_release(&self, pool: PoolId, released: Released) {
        if !released.tracked {
            return;
        }
        let (count, bytes) = self.live_tracking(pool);
        if !count && !bytes {
            trace!(%pool, size = released.size, "release (untracked)");
            return;
        }
        self.registry.stats(pool).record_release(
            u64::from(count),
            if bytes { released.size as u64 } else { 0 },
        );
        trace!(%pool, size = released.size, "release");
    }

    pub(crate) fn account_rewind(&self, rewound: Outstanding) {
        self.registry
            .stats(PoolId::TemporaryStack)
            .record_release(rewound.count, rewound.bytes);
    }

    /// Suppresses checks for the rest of the process, logs a final report and
    /// disables bookkeeping.
    pub fn shutdown(&self) {
        self.set_shutting_down(true);
        for report in self.reports() {
            info!(
                pool = %report.pool,
                allocations = report.stats.allocation_count,
                bytes = report.stats.bytes_allocated,
                live_count = report.stats.live_count,
                live_bytes = report.stats.live_bytes,
                used = report.used_bytes,
                "pool report"
            );
        }
        self.set_enabled(false);
        info!("memory manager shut down");
    }
}

fn fault_error(pool: PoolId, fault: ReleaseFault) -> MemoryError {
    match fault {
        ReleaseFault::ScopeClosed => MemoryError::ReleaseAfterScopeClosed { pool },
        ReleaseFault::Corrupt => MemoryError::InvalidRelease {
            reason: InvalidRelease::Corrupt(pool),
        },
        ReleaseFault::DoubleRelease => MemoryError::InvalidRelease {
            reason: InvalidRelease::DoubleRelease(pool),
        },
        ReleaseFault::NotReleasable => MemoryError::InvalidRelease {
            reason: InvalidRelease::NotReleasable(pool),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::RecordingHandler;

    fn manager(level: DiagnosticLevel) -> (Arc<MemoryManager>, Arc<RecordingHandler>) {
        let recorder = Arc::new(RecordingHandler::new());
        let config = MemoryConfig {
            diagnostic_level: level,
            permanent_capacity: 4096,
            temporary_stack_capacity: 4096,
            ..MemoryConfig::default()
        };
        (
            Arc::new(MemoryManager::with_handler(&config, recorder.clone())),
            recorder,
        )
    }

    #[test]
    fn heap_release_restores_outstanding_with_byte_tracking() {
        let (manager, recorder) = manager(DiagnosticLevel::Bytes);
        let ptr = manager.allocate_in(PoolId::Heap, 100).unwrap();
        assert_eq!(manager.stats(PoolId::Heap).live_bytes, 112);

        unsafe { manager.release(ptr).unwrap() };
        let stats = manager.stats(PoolId::Heap);
        assert_eq!(stats.allocation_count, 1);
        assert_eq!(stats.bytes_allocated, 112);
        assert_eq!(stats.live_count, 0);
        assert_eq!(stats.live_bytes, 0);
        assert!(recorder.signals().is_empty());
    }

    #[test]
    fn heap_coarse_mode_keeps_no_outstanding() {
        let (manager, _) = manager(DiagnosticLevel::Off);
        let ptr = manager.allocate_in(PoolId::Heap, 100).unwrap();
        unsafe { manager.release(ptr).unwrap() };
        let stats = manager.stats(PoolId::Heap);
        assert_eq!(stats.allocation_count, 1);
        assert_eq!(stats.live_count, 0);
        assert_eq!(stats.live_bytes, 0);
    }

    #[test]
    fn heap_count_only_mode() {
        let (manager, _) = manager(DiagnosticLevel::Counts);
        let ptr = manager.allocate_in(PoolId::Heap, 100).unwrap();
        assert_eq!(manager.stats(PoolId::Heap).live_count, 1);
        assert_eq!(manager.stats(PoolId::Heap).live_bytes, 0);
        unsafe { manager.release(ptr).unwrap() };
        assert_eq!(manager.stats(PoolId::Heap).live_count, 0);
    }

    #[test]
    fn permanent_release_is_invalid() {
        let (manager, recorder) = manager(DiagnosticLevel::LeakDetection);
        let ptr = manager.allocate_in(PoolId::Permanent, 32).unwrap();
        let err = unsafe { manager.release(ptr) }.unwrap_err();
        assert_eq!(
            err,
            MemoryError::InvalidRelease {
                reason: InvalidRelease::NotReleasable(PoolId::Permanent)
            }
        );
        assert_eq!(recorder.kinds(), vec!["invalid_release"]);
        assert_eq!(manager.stats(PoolId::Permanent).live_count, 1);
    }

    #[test]
    fn foreign_pointer_is_invalid() {
        let (manager, recorder) = manager(DiagnosticLevel::LeakDetection);
        let mut local = 0u64;
        let err = unsafe { manager.release(NonNull::from(&mut local).cast()) }.unwrap_err();
        assert_eq!(
            err,
            MemoryError::InvalidRelease {
                reason: InvalidRelease::NotOwned
            }
        );
        assert_eq!(recorder.signals().len(), 1);
    }

    #[test]
    fn exhaustion_signals_unless_fallible() {
        let (manager, recorder) = manager(DiagnosticLevel::LeakDetection);
        assert!(manager.try_allocate_in(PoolId::Permanent, 8192).is_none());
        assert!(recorder.signals().is_empty());

        let err = manager.allocate_in(PoolId::TemporaryStack, 8192).unwrap_err();
        assert_eq!(
            err,
            MemoryError::OutOfMemory {
                pool: PoolId::TemporaryStack,
                size: 8192
            }
        );
        assert_eq!(recorder.kinds(), vec!["out_of_memory"]);
        assert_eq!(manager.stats(PoolId::TemporaryStack).allocation_count, 0);
    }

    #[test]
    fn huge_requests_fail_without_panicking() {
        let (manager, recorder) = manager(DiagnosticLevel::LeakDetection);
        manager.allocate_in(PoolId::Permanent, 64).unwrap();
        for pool in PoolId::ALL {
            assert!(manager.try_allocate_in(pool, usize::MAX - 40).is_none());
        }
        assert!(recorder.signals().is_empty());

        let err = manager.allocate_in(PoolId::Permanent, usize::MAX - 40).unwrap_err();
        assert_eq!(err.kind(), "out_of_memory");
        assert_eq!(recorder.kinds(), vec!["out_of_memory"]);
    }

    #[test]
    fn release_tier_suppresses_misuse_checks() {
        let recorder = Arc::new(RecordingHandler::new());
        let config = MemoryConfig {
            release_tier: ReleaseTier::Release,
            ..MemoryConfig::default()
        };
        let manager = MemoryManager::with_handler(&config, recorder.clone());
        let ptr = manager.allocate_in(PoolId::Permanent, 32).unwrap();
        assert!(unsafe { manager.release(ptr) }.is_ok());
        assert!(recorder.signals().is_empty());
    }

    #[test]
    fn disabled_manager_bypasses_pools() {
        let (manager, recorder) = manager(DiagnosticLevel::LeakDetection);
        manager.set_enabled(false);
        for id in PoolId::ALL {
            let ptr = manager.allocate_in(id, 64).unwrap();
            assert_eq!(manager.registry().owner_of(ptr), Some(PoolId::Heap));
            unsafe { manager.release(ptr).unwrap() };
        }
        for id in PoolId::ALL {
            assert_eq!(manager.stats(id), StatsSnapshot::default());
        }
        assert!(recorder.signals().is_empty());
    }

    #[test]
    fn shutdown_suppresses_checks_and_disables() {
        let (manager, recorder) = manager(DiagnosticLevel::LeakDetection);
        let ptr = manager.allocate_in(PoolId::Permanent, 32).unwrap();
        manager.shutdown();
        assert!(manager.is_shutting_down());
        assert!(!manager.is_enabled());
        assert!(unsafe { manager.release(ptr) }.is_ok());
        assert!(recorder.signals().is_empty());
    }
}
