//! ## keel-core::alloc::permanent
//! **Bump pool using `bumpalo`**
//!
//! Blocks live until the pool itself is dropped at teardown. The region is a
//! single `bumpalo` chunk with its allocation limit pinned to the requested
//! capacity, so exhaustion is reported instead of growing.

use std::alloc::Layout;
use std::ptr::NonNull;

use bumpalo::Bump;
use parking_lot::Mutex;

use super::header::{BlockHeader, BlockTag, HEADER_SIZE};
use super::{round_up, Block, FreeTracking, Pool, PoolId, ReleaseFault, Released, ALIGNMENT};

struct Region {
    bump: Bump,
    used: usize,
}

/// A fixed-capacity bump allocator based on `bumpalo::Bump`.
pub struct PermanentPool {
    region: Mutex<Region>,
    capacity: usize,
}

impl PermanentPool {
    /// Creates a pool able to hand out `capacity` bytes, headers included.
    pub fn new(capacity: usize) -> Self {
        let bump = Bump::with_capacity(capacity);
        bump.set_allocation_limit(Some(capacity));
        PermanentPool {
            region: Mutex::new(Region { bump, used: 0 }),
            capacity,
        }
    }
}

impl Pool for PermanentPool {
    fn id(&self) -> PoolId {
        PoolId::Permanent
    }

    fn allocate(&self, size: usize) -> Option<Block> {
        let size = round_up(size)?;
        let total = HEADER_SIZE.checked_add(size)?;
        let mut region = self.region.lock();
        if total > self.capacity - region.used {
            return None;
        }
        let layout = Layout::from_size_align(total, ALIGNMENT).ok()?;
        let block = region.bump.try_alloc_layout(layout).ok()?;
        region.used += total;
        // SAFETY: bumpalo returned `total` bytes aligned to ALIGNMENT.
        let ptr = unsafe { BlockHeader::init(block, BlockTag::Pool(PoolId::Permanent), size) };
        Some(Block { ptr, size })
    }

    fn owns(&self, ptr: NonNull<u8>) -> bool {
        let addr = ptr.as_ptr() as usize;
        let mut region = self.region.lock();
        region.bump.iter_allocated_chunks().any(|chunk| {
            let start = chunk.as_ptr() as usize;
            addr >= start && addr < start + chunk.len()
        })
    }

    unsafe fn release(&self, _ptr: NonNull<u8>) -> Result<Released, ReleaseFault> {
        Err(ReleaseFault::NotReleasable)
    }

    fn free_tracking(&self) -> FreeTracking {
        FreeTracking::Never
    }

    fn capacity(&self) -> Option<usize> {
        Some(self.capacity)
    }

    fn used(&self) -> usize {
        self.region.lock().used
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_allocate() {
        let pool = PermanentPool::new(4096);
        let a = pool.allocate(100).unwrap();
        let b = pool.allocate(200).unwrap();

        assert_eq!(a.size, 112);
        assert_eq!(b.size, 208);
        assert_eq!(pool.used(), 2 * HEADER_SIZE + 320);
        assert!(pool.owns(a.ptr));
        assert!(pool.owns(b.ptr));
        assert_eq!(a.ptr.as_ptr() as usize % ALIGNMENT, 0);
    }

    #[test]
    fn test_permanent_exhaustion() {
        let pool = PermanentPool::new(4096);
        assert!(pool.allocate(4096 - HEADER_SIZE).is_some());
        assert!(pool.allocate(1).is_none());
    }

    #[test]
    fn test_permanent_huge_request_fails() {
        let pool = PermanentPool::new(4096);
        pool.allocate(64).unwrap();
        assert!(pool.allocate(usize::MAX - 40).is_none());
        assert_eq!(pool.used(), HEADER_SIZE + 64);
    }

    #[test]
    fn test_permanent_never_releases() {
        let pool = PermanentPool::new(4096);
        let block = pool.allocate(16).unwrap();
        let result = unsafe { pool.release(block.ptr) };
        assert_eq!(result, Err(ReleaseFault::NotReleasable));
        assert!(pool.owns(block.ptr));
    }

    #[test]
    fn test_foreign_pointer_not_owned() {
        let pool = PermanentPool::new(4096);
        pool.allocate(16).unwrap();
        let local = 7u64;
        assert!(!pool.owns(NonNull::from(&local).cast()));
    }
}
