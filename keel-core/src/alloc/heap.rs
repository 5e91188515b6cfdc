//! ## keel-core::alloc::heap
//! **General purpose pool over the system allocator**
//!
//! Blocks may be released in any order. Live blocks are kept in a side
//! table so a release can be validated before the header is touched; the
//! same table holds untracked blocks handed out while the manager is
//! disabled.

use std::alloc::{self, Layout};
use std::collections::HashMap;
use std::ptr::NonNull;

use parking_lot::Mutex;

use super::header::{BlockHeader, BlockTag, HEADER_SIZE};
use super::{round_up, Block, FreeTracking, Pool, PoolId, ReleaseFault, Released, ALIGNMENT};

#[derive(Debug, Clone, Copy)]
struct LiveBlock {
    size: usize,
    tracked: bool,
}

/// Heap pool. Outstanding accounting precision follows the diagnostic level.
#[derive(Default)]
pub struct HeapPool {
    live: Mutex<HashMap<usize, LiveBlock>>,
}

impl HeapPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a block that bypasses all statistics.
    pub fn allocate_untracked(&self, size: usize) -> Option<Block> {
        self.allocate_tagged(size, BlockTag::Untracked)
    }

    /// Number of blocks currently handed out, untracked ones included.
    pub fn live_blocks(&self) -> usize {
        self.live.lock().len()
    }

    fn layout(size: usize) -> Option<Layout> {
        Layout::from_size_align(HEADER_SIZE.checked_add(size)?, ALIGNMENT).ok()
    }

    fn allocate_tagged(&self, size: usize, tag: BlockTag) -> Option<Block> {
        let size = round_up(size)?;
        let layout = Self::layout(size)?;
        // SAFETY: layout has a non-zero size (the header).
        let block = NonNull::new(unsafe { alloc::alloc(layout) })?;
        // SAFETY: fresh allocation of `layout`, aligned to ALIGNMENT.
        let ptr = unsafe { BlockHeader::init(block, tag, size) };
        self.live.lock().insert(
            ptr.as_ptr() as usize,
            LiveBlock {
                size,
                tracked: tag != BlockTag::Untracked,
            },
        );
        Some(Block { ptr, size })
    }
}

impl Pool for HeapPool {
    fn id(&self) -> PoolId {
        PoolId::Heap
    }

    fn allocate(&self, size: usize) -> Option<Block> {
        self.allocate_tagged(size, BlockTag::Pool(PoolId::Heap))
    }

    fn owns(&self, ptr: NonNull<u8>) -> bool {
        self.live.lock().contains_key(&(ptr.as_ptr() as usize))
    }

    unsafe fn release(&self, ptr: NonNull<u8>) -> Result<Released, ReleaseFault> {
        let entry = self
            .live
            .lock()
            .remove(&(ptr.as_ptr() as usize))
            .ok_or(ReleaseFault::DoubleRelease)?;

        // SAFETY: the side table proves the block is live and ours.
        let header = unsafe { BlockHeader::read(ptr) };
        if !header.is_valid() || header.size() != entry.size {
            // Leak rather than hand a corrupt layout to the system allocator.
            return Err(ReleaseFault::Corrupt);
        }

        // SAFETY: allocated in `allocate_tagged` with the same layout.
        unsafe {
            let layout = Layout::from_size_align_unchecked(HEADER_SIZE + entry.size, ALIGNMENT);
            alloc::dealloc(BlockHeader::start(ptr).as_ptr(), layout);
        }

        Ok(Released {
            size: entry.size,
            tracked: entry.tracked,
            in_order: true,
        })
    }

    fn free_tracking(&self) -> FreeTracking {
        FreeTracking::Coarse
    }

    fn used(&self) -> usize {
        self.live
            .lock()
            .values()
            .map(|block| HEADER_SIZE + block.size)
            .sum()
    }
}

impl Drop for HeapPool {
    fn drop(&mut self) {
        for (addr, block) in self.live.get_mut().drain() {
            // SAFETY: every entry is a live block allocated with this layout.
            unsafe {
                let payload = NonNull::new_unchecked(addr as *mut u8);
                let layout = Layout::from_size_align_unchecked(HEADER_SIZE + block.size, ALIGNMENT);
                alloc::dealloc(BlockHeader::start(payload).as_ptr(), layout);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_release_any_order() {
        let heap = HeapPool::new();
        let a = heap.allocate(100).unwrap();
        let b = heap.allocate(200).unwrap();
        assert_eq!(a.size, 112);
        assert_eq!(b.size, 208);
        assert_eq!(heap.live_blocks(), 2);

        unsafe {
            a.ptr.as_ptr().write_bytes(0x33, 100);
            assert_eq!(heap.release(a.ptr).unwrap().size, 112);
            assert!(heap.release(b.ptr).unwrap().in_order);
        }
        assert_eq!(heap.live_blocks(), 0);
        assert_eq!(heap.used(), 0);
    }

    #[test]
    fn untracked_blocks_report_untracked() {
        let heap = HeapPool::new();
        let block = heap.allocate_untracked(8).unwrap();
        assert!(heap.owns(block.ptr));
        let released = unsafe { heap.release(block.ptr).unwrap() };
        assert!(!released.tracked);
        assert!(!heap.owns(block.ptr));
    }

    #[test]
    fn second_release_is_refused() {
        let heap = HeapPool::new();
        let block = heap.allocate(8).unwrap();
        unsafe {
            heap.release(block.ptr).unwrap();
            assert_eq!(heap.release(block.ptr), Err(ReleaseFault::DoubleRelease));
        }
    }

    #[test]
    fn oversized_request_fails() {
        let heap = HeapPool::new();
        assert!(heap.allocate(usize::MAX - 4).is_none());
    }
}
