use std::fmt;

use thiserror::Error;

use crate::alloc::PoolId;

/// Memory manager invariant violations.
///
/// All of these are programming errors. They are raised through
/// [`Diagnostics::signal`](crate::diagnostics::Diagnostics::signal) and only
/// surface as a value when the failure handler lets execution continue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("{pool} pool out of memory ({size} bytes requested)")]
    OutOfMemory { pool: PoolId, size: usize },

    #[error("invalid release: {reason}")]
    InvalidRelease { reason: InvalidRelease },

    #[error("{pool} block of {size} bytes released out of LIFO order")]
    OutOfOrderRelease { pool: PoolId, size: usize },

    #[error("{pool} block released after its scope closed")]
    ReleaseAfterScopeClosed { pool: PoolId },

    #[error("{pool} scope leaked {count} allocations ({bytes} bytes)")]
    ScopeLeak { pool: PoolId, count: u64, bytes: u64 },

    #[error("{pool} scope exited out of order (frame {frame} of {depth})")]
    ScopeExitOrder {
        pool: PoolId,
        frame: usize,
        depth: usize,
    },
}

impl MemoryError {
    /// Short machine-friendly name used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            MemoryError::OutOfMemory { .. } => "out_of_memory",
            MemoryError::InvalidRelease { .. } => "invalid_release",
            MemoryError::OutOfOrderRelease { .. } => "out_of_order_release",
            MemoryError::ReleaseAfterScopeClosed { .. } => "release_after_scope_closed",
            MemoryError::ScopeLeak { .. } => "scope_leak",
            MemoryError::ScopeExitOrder { .. } => "scope_exit_order",
        }
    }

    pub fn pool(&self) -> Option<PoolId> {
        match self {
            MemoryError::OutOfMemory { pool, .. }
            | MemoryError::OutOfOrderRelease { pool, .. }
            | MemoryError::ReleaseAfterScopeClosed { pool }
            | MemoryError::ScopeLeak { pool, .. }
            | MemoryError::ScopeExitOrder { pool, .. } => Some(*pool),
            MemoryError::InvalidRelease { reason } => reason.pool(),
        }
    }
}

/// Why a release was rejected as invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidRelease {
    /// The pointer is not inside any pool.
    NotOwned,
    /// The header in front of the pointer is not a valid block header.
    Corrupt(PoolId),
    /// The block was already released.
    DoubleRelease(PoolId),
    /// The pool never releases individual blocks.
    NotReleasable(PoolId),
}

impl InvalidRelease {
    pub fn pool(&self) -> Option<PoolId> {
        match self {
            InvalidRelease::NotOwned => None,
            InvalidRelease::Corrupt(pool)
            | InvalidRelease::DoubleRelease(pool)
            | InvalidRelease::NotReleasable(pool) => Some(*pool),
        }
    }
}

impl fmt::Display for InvalidRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidRelease::NotOwned => f.write_str("pointer not owned by any pool"),
            InvalidRelease::Corrupt(pool) => write!(f, "{} block header is corrupt", pool),
            InvalidRelease::DoubleRelease(pool) => write!(f, "{} block already released", pool),
            InvalidRelease::NotReleasable(pool) => {
                write!(f, "{} pool does not release individual blocks", pool)
            }
        }
    }
}

/// Process-wide runtime lifecycle errors.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime already initialized")]
    AlreadyInitialized,

    #[error("runtime not initialized")]
    NotInitialized,
}
