//! ## keel-core::alloc::registry
//! **Fixed table of pools indexed by [`PoolId`]**

use std::ptr::NonNull;

use keel_config::MemoryConfig;

use super::heap::HeapPool;
use super::permanent::PermanentPool;
use super::stack::TemporaryStack;
use super::stats::{PoolReport, PoolStats, StatsSnapshot};
use super::{Pool, PoolId};

pub struct PoolRegistry {
    heap: HeapPool,
    permanent: PermanentPool,
    stack: TemporaryStack,
    stats: [PoolStats; PoolId::COUNT],
}

impl PoolRegistry {
    pub fn new(config: &MemoryConfig) -> Self {
        Self {
            heap: HeapPool::new(),
            permanent: PermanentPool::new(config.permanent_capacity),
            stack: TemporaryStack::new(config.temporary_stack_capacity),
            stats: Default::default(),
        }
    }

    pub fn pool(&self, id: PoolId) -> &dyn Pool {
        match id {
            PoolId::Heap => &self.heap,
            PoolId::Permanent => &self.permanent,
            PoolId::TemporaryStack => &self.stack,
        }
    }

    pub fn heap(&self) -> &HeapPool {
        &self.heap
    }

    pub fn temporary_stack(&self) -> &TemporaryStack {
        &self.stack
    }

    pub(crate) fn stats(&self, id: PoolId) -> &PoolStats {
        &self.stats[id.index()]
    }

    pub fn snapshot(&self, id: PoolId) -> StatsSnapshot {
        self.stats(id).snapshot()
    }

    /// Resolves the pool whose memory contains `ptr`.
    pub fn owner_of(&self, ptr: NonNull<u8>) -> Option<PoolId> {
        // Cheapest checks first: address range, side table, chunk walk.
        [PoolId::TemporaryStack, PoolId::Heap, PoolId::Permanent]
            .into_iter()
            .find(|id| self.pool(*id).owns(ptr))
    }

    pub fn report(&self, id: PoolId) -> PoolReport {
        let pool = self.pool(id);
        PoolReport {
            pool: id,
            stats: self.snapshot(id),
            capacity: pool.capacity(),
            used_bytes: pool.used(),
        }
    }

    pub fn reports(&self) -> Vec<PoolReport> {
        PoolId::ALL.into_iter().map(|id| self.report(id)).collect()
    }
}
