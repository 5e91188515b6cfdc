//! ## keel-core::alloc::stats
//! **Per-pool allocation statistics**
//!
//! Cumulative counters only ever grow. Outstanding counters go up on
//! allocation and down on release where the pool tracks frees.
//! Mutation is crate-private: only the accounting facade and the scope
//! stack update these.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::PoolId;

/// Running counters for one pool.
///
/// This struct uses atomic operations for thread-safe statistics tracking.
#[derive(Debug, Default)]
pub struct PoolStats {
    allocation_count: AtomicU64,
    bytes_allocated: AtomicU64,
    live_count: AtomicU64,
    live_bytes: AtomicU64,
}

/// Point-in-time copy of a pool's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub allocation_count: u64,
    pub bytes_allocated: u64,
    pub live_count: u64,
    pub live_bytes: u64,
}

impl PoolStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn record_allocation(&self, bytes: u64, live_count: bool, live_bytes: bool) {
        self.allocation_count.fetch_add(1, Ordering::Relaxed);
        self.bytes_allocated.fetch_add(bytes, Ordering::Relaxed);
        if live_count {
            self.live_count.fetch_add(1, Ordering::Relaxed);
        }
        if live_bytes {
            self.live_bytes.fetch_add(bytes, Ordering::Relaxed);
        }
    }

    /// Removes `count` blocks totalling `bytes` from the outstanding counters.
    #[inline]
    pub(crate) fn record_release(&self, count: u64, bytes: u64) {
        saturating_sub(&self.live_count, count);
        saturating_sub(&self.live_bytes, bytes);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            allocation_count: self.allocation_count.load(Ordering::Acquire),
            bytes_allocated: self.bytes_allocated.load(Ordering::Acquire),
            live_count: self.live_count.load(Ordering::Acquire),
            live_bytes: self.live_bytes.load(Ordering::Acquire),
        }
    }
}

fn saturating_sub(counter: &AtomicU64, amount: u64) {
    if amount == 0 {
        return;
    }
    let _ = counter.fetch_update(Ordering::AcqRel, Ordering::Relaxed, |value| {
        Some(value.saturating_sub(amount))
    });
}

/// Summary of one pool for logs, the CLI and metrics export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolReport {
    pub pool: PoolId,
    #[serde(flatten)]
    pub stats: StatsSnapshot,
    pub capacity: Option<usize>,
    pub used_bytes: usize,
}
