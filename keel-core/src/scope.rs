//! ## keel-core::scope
//! **Allocator scope stack**
//!
//! A [`ThreadContext`] holds one thread's stack of scope frames and its
//! current pool. [`ThreadContext::enter_scope`] pushes a frame and returns an
//! [`AllocatorScope`] guard; dropping the guard runs the pool's exit check,
//! rewinds the temporary stack if the frame was bound to it, and restores
//! the previous pool. Because the exit runs in `Drop` it happens exactly
//! once on every path out of the enclosing block, `?` and early returns
//! included.
//!
//! Temporary stack scopes mark and rewind the calling thread's own region,
//! so scopes on different threads never see each other's blocks.

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::panic::Location;
use std::ptr::NonNull;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use keel_config::DiagnosticLevel;
use tracing::{trace, warn};

use crate::alloc::stack::StackMark;
use crate::alloc::{PoolId, StatsSnapshot};
use crate::error::MemoryError;
use crate::manager::MemoryManager;

#[derive(Debug)]
struct Frame {
    serial: u64,
    pool: PoolId,
    previous: PoolId,
    baseline: StatsSnapshot,
    mark: Option<StackMark>,
}

/// Per-thread scope state bound to a manager. Not `Send`.
pub struct ThreadContext {
    manager: Arc<MemoryManager>,
    current: Cell<PoolId>,
    frames: RefCell<Vec<Frame>>,
    next_serial: Cell<u64>,
    thread: ThreadId,
    _not_send: PhantomData<*const ()>,
}

impl ThreadContext {
    pub fn new(manager: Arc<MemoryManager>) -> Self {
        Self {
            manager,
            current: Cell::new(PoolId::Heap),
            frames: RefCell::new(Vec::new()),
            next_serial: Cell::new(0),
            thread: thread::current().id(),
            _not_send: PhantomData,
        }
    }

    pub fn manager(&self) -> &Arc<MemoryManager> {
        &self.manager
    }

    /// Pool untagged allocations go to.
    pub fn current_pool(&self) -> PoolId {
        self.current.get()
    }

    /// Number of open scopes on this thread.
    pub fn depth(&self) -> usize {
        self.frames.borrow().len()
    }

    /// Makes `pool` current until the returned guard is dropped.
    #[track_caller]
    pub fn enter_scope(&self, pool: PoolId) -> AllocatorScope<'_> {
        let baseline = self.manager.stats(pool);
        let mark = (pool == PoolId::TemporaryStack)
            .then(|| self.manager.registry().temporary_stack().mark());
        let previous = self.current.replace(pool);
        let serial = self.next_serial.get();
        self.next_serial.set(serial + 1);

        let mut frames = self.frames.borrow_mut();
        frames.push(Frame {
            serial,
            pool,
            previous,
            baseline,
            mark,
        });
        trace!(%pool, depth = frames.len(), "enter scope");

        AllocatorScope {
            ctx: self,
            pool,
            serial,
            baseline,
            location: Location::caller(),
        }
    }

    /// Allocates from the current pool.
    #[track_caller]
    pub fn allocate(&self, size: usize) -> Result<NonNull<u8>, MemoryError> {
        self.manager
            .allocate_at(self.current_pool(), size, false, Location::caller())
    }

    /// Allocates from the current pool, returning `None` on exhaustion without signalling.
    #[track_caller]
    pub fn try_allocate(&self, size: usize) -> Option<NonNull<u8>> {
        self.manager
            .allocate_at(self.current_pool(), size, true, Location::caller())
            .ok()
    }

    /// Releases a block to the pool that produced it.
    ///
    /// # Safety
    ///
    /// See [`MemoryManager::release`].
    #[track_caller]
    pub unsafe fn release(&self, ptr: NonNull<u8>) -> Result<(), MemoryError> {
        // SAFETY: forwarded to the caller.
        unsafe { self.manager.release_at(ptr, Location::caller()) }
    }

    fn exit_scope(&self, serial: u64, location: &'static Location<'static>) {
        let (frame, index, depth) = {
            let mut frames = self.frames.borrow_mut();
            let depth = frames.len();
            let Some(index) = frames.iter().position(|frame| frame.serial == serial) else {
                return;
            };
            let frame = frames.remove(index);
            // Keep the restore chain intact for the frame that moved down.
            if let Some(above) = frames.get_mut(index) {
                above.previous = frame.previous;
            }
            (frame, index, depth)
        };

        if index + 1 != depth {
            let _ = self.manager.violation(
                MemoryError::ScopeExitOrder {
                    pool: frame.pool,
                    frame: index,
                    depth,
                },
                location,
            );
        }

        self.check_exit(&frame, location);

        if let Some(mark) = &frame.mark {
            let rewound = self.manager.registry().temporary_stack().rewind(mark);
            if rewound.count > 0 {
                self.manager.account_rewind(rewound);
            }
        }

        if index + 1 == depth {
            self.current.set(frame.previous);
        }
        trace!(pool = %frame.pool, current = %self.current.get(), "exit scope");
    }

    fn check_exit(&self, frame: &Frame, location: &'static Location<'static>) {
        if !self.manager.checks_active()
            || self.manager.diagnostic_level() != DiagnosticLevel::LeakDetection
        {
            return;
        }
        match frame.pool {
            PoolId::TemporaryStack => {
                let Some(mark) = &frame.mark else { return };
                // Only blocks above this frame's mark; anything an earlier
                // exit already rewound is no longer counted.
                let leaked = self.manager.registry().temporary_stack().outstanding_since(mark);
                if leaked.count > 0 {
                    let _ = self.manager.violation(
                        MemoryError::ScopeLeak {
                            pool: frame.pool,
                            count: leaked.count,
                            bytes: leaked.bytes,
                        },
                        location,
                    );
                }
            }
            PoolId::Heap => {
                // Heap scopes may legitimately hand blocks outward; report only.
                let now = self.manager.stats(frame.pool);
                if now.live_count > frame.baseline.live_count {
                    warn!(
                        pool = %frame.pool,
                        count = now.live_count - frame.baseline.live_count,
                        bytes = now.live_bytes.saturating_sub(frame.baseline.live_bytes),
                        file = location.file(),
                        line = location.line(),
                        "scope exited with outstanding allocations"
                    );
                }
            }
            _ => {}
        }
    }
}

impl Drop for ThreadContext {
    fn drop(&mut self) {
        self.manager.registry().temporary_stack().retire(self.thread);
    }
}

/// Guard for one entered scope. Exits the scope when dropped.
#[must_use = "the scope exits as soon as the guard is dropped"]
pub struct AllocatorScope<'ctx> {
    ctx: &'ctx ThreadContext,
    pool: PoolId,
    serial: u64,
    baseline: StatsSnapshot,
    location: &'static Location<'static>,
}

impl AllocatorScope<'_> {
    pub fn pool(&self) -> PoolId {
        self.pool
    }

    fn now(&self) -> StatsSnapshot {
        self.ctx.manager.stats(self.pool)
    }

    /// Allocations made to this pool since the scope was entered.
    pub fn scope_allocation_count(&self) -> u64 {
        self.now().allocation_count - self.baseline.allocation_count
    }

    pub fn scope_bytes_allocated(&self) -> u64 {
        self.now().bytes_allocated - self.baseline.bytes_allocated
    }

    /// Cumulative count at the moment the scope was entered.
    pub fn previous_allocation_count(&self) -> u64 {
        self.baseline.allocation_count
    }

    pub fn previous_bytes_allocated(&self) -> u64 {
        self.baseline.bytes_allocated
    }

    /// Baseline plus scope delta: the pool's cumulative count right now.
    pub fn total_allocation_count(&self) -> u64 {
        self.previous_allocation_count() + self.scope_allocation_count()
    }

    pub fn total_bytes_allocated(&self) -> u64 {
        self.previous_bytes_allocated() + self.scope_bytes_allocated()
    }

    /// Change in outstanding blocks since entry, negative if more were released.
    pub fn scope_outstanding_count(&self) -> i64 {
        self.now().live_count as i64 - self.baseline.live_count as i64
    }

    pub fn scope_outstanding_bytes(&self) -> i64 {
        self.now().live_bytes as i64 - self.baseline.live_bytes as i64
    }

    /// Exits the scope now. Equivalent to dropping the guard.
    pub fn exit(self) {}
}

impl Drop for AllocatorScope<'_> {
    fn drop(&mut self) {
        self.ctx.exit_scope(self.serial, self.location);
    }
}
