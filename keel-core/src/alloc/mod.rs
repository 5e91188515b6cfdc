//! ## keel-core::alloc
//! **Allocation pools and their running statistics**
//!
//! ### Key Submodules:
//! - `heap/`: General purpose pool backed by the system allocator
//! - `permanent/`: Bump pool using `bumpalo`, never reclaimed individually
//! - `stack/`: Temporary LIFO arena rewound when its scope exits
//! - `registry/`: Fixed table of pools and their statistics
//! - `stats/`: Cumulative and outstanding counters per pool
//!
//! Every block handed out carries a [`header`] in front of the payload so
//! that a release can be routed and validated without naming the pool.

use std::fmt;
use std::ptr::NonNull;

use serde::Serialize;

pub(crate) mod header;
pub mod heap;
pub mod permanent;
pub mod registry;
pub mod stack;
pub mod stats;

pub use registry::PoolRegistry;
pub use stats::{PoolReport, StatsSnapshot};

/// Allocation granularity. Byte accounting uses sizes rounded up to this.
pub const ALIGNMENT: usize = 16;

/// Rounds `size` up to [`ALIGNMENT`], or `None` on overflow.
#[inline]
pub const fn round_up(size: usize) -> Option<usize> {
    match size.checked_add(ALIGNMENT - 1) {
        Some(padded) => Some(padded & !(ALIGNMENT - 1)),
        None => None,
    }
}

/// Identifies an allocation strategy.
///
/// New pools may be added; match with a wildcard arm outside this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
#[non_exhaustive]
pub enum PoolId {
    /// General purpose, release in any order. Default when no scope is active.
    Heap = 0,
    /// Bump allocated, never released individually.
    Permanent = 1,
    /// LIFO arena, drained by the end of its owning scope.
    TemporaryStack = 2,
}

impl PoolId {
    /// Number of usable identifiers.
    pub const COUNT: usize = 3;

    pub const ALL: [PoolId; PoolId::COUNT] =
        [PoolId::Heap, PoolId::Permanent, PoolId::TemporaryStack];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    pub(crate) const fn from_index(index: u8) -> Option<PoolId> {
        match index {
            0 => Some(PoolId::Heap),
            1 => Some(PoolId::Permanent),
            2 => Some(PoolId::TemporaryStack),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            PoolId::Heap => "heap",
            PoolId::Permanent => "permanent",
            PoolId::TemporaryStack => "temporary_stack",
        }
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a pool keeps its outstanding counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeTracking {
    /// Every release is accounted exactly.
    Precise,
    /// Accounting precision follows the configured diagnostic level.
    Coarse,
    /// Nothing is ever released; outstanding equals cumulative.
    Never,
}

/// A block handed out by a pool. `size` is the rounded payload size.
#[derive(Debug, Clone, Copy)]
pub struct Block {
    pub ptr: NonNull<u8>,
    pub size: usize,
}

/// Outcome of a successful release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Released {
    pub size: usize,
    /// False for blocks that bypassed bookkeeping when they were allocated.
    pub tracked: bool,
    /// False when a stack block was not the most recent live one.
    pub in_order: bool,
}

/// Why a pool refused a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseFault {
    /// Header magic or tag does not match the pool.
    Corrupt,
    /// Block was already released.
    DoubleRelease,
    /// Block belonged to a stack scope that has since been rewound.
    ScopeClosed,
    /// The pool never releases individual blocks.
    NotReleasable,
}

/// One allocation strategy.
pub trait Pool: Send + Sync {
    fn id(&self) -> PoolId;

    /// Returns `None` when the request cannot be satisfied.
    fn allocate(&self, size: usize) -> Option<Block>;

    /// Whether `ptr` lies in memory handed out by this pool.
    fn owns(&self, ptr: NonNull<u8>) -> bool;

    /// Returns a block to the pool.
    ///
    /// # Safety
    ///
    /// `owns(ptr)` must have returned true for `ptr`.
    unsafe fn release(&self, ptr: NonNull<u8>) -> Result<Released, ReleaseFault>;

    fn free_tracking(&self) -> FreeTracking;

    /// Fixed capacity in bytes, if bounded.
    fn capacity(&self) -> Option<usize> {
        None
    }

    /// Bytes currently occupied, headers included.
    fn used(&self) -> usize;
}
