//! # keel-core
//!
//! Scoped multi-pool memory manager for resource-constrained targets.
//!
//! ### Expectations (Production):
//! - Bounded-time allocation and release, no blocking I/O
//! - Exact cumulative statistics per pool
//! - Misuse and leak checks compiled into debug tiers only
//!
//! ### Key Submodules:
//! - `alloc`: Pools (heap, permanent bump, temporary stack), registry and statistics
//! - `scope`: Per-thread allocator scope stack and scope guards
//! - `manager`: Accounting facade, allocation and release entry points
//! - `diagnostics`: Single failure channel with a skip countdown for tests
//! - `runtime`: Process-wide manager and per-thread access point
//!
//! ```no_run
//! use keel_config::MemoryConfig;
//! use keel_core::prelude::*;
//!
//! runtime::init(&MemoryConfig::default()).unwrap();
//! runtime::with_context(|ctx| {
//!     let scope = ctx.enter_scope(PoolId::TemporaryStack);
//!     let block = ctx.allocate(256).unwrap();
//!     unsafe { ctx.release(block).unwrap() };
//!     assert_eq!(scope.scope_allocation_count(), 1);
//! })
//! .unwrap();
//! runtime::shutdown().unwrap();
//! ```

pub mod alloc;
pub mod diagnostics;
pub mod error;
pub mod manager;
pub mod runtime;
pub mod scope;
pub mod selftest;

pub mod prelude {
    pub use crate::alloc::{PoolId, PoolReport, StatsSnapshot, ALIGNMENT};
    pub use crate::diagnostics::{FailureHandler, PanicHandler, RecordingHandler, TerminateHandler};
    pub use crate::error::*;
    pub use crate::manager::MemoryManager;
    pub use crate::runtime;
    pub use crate::scope::{AllocatorScope, ThreadContext};
}

pub use error::{MemoryError, RuntimeError};
pub use manager::MemoryManager;
