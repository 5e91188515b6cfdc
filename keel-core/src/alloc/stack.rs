//! ## keel-core::alloc::stack
//! **Temporary LIFO arenas, one region per thread**
//!
//! Each thread allocates from its own [`StackRegion`], created on first use
//! with the configured capacity. Blocks are carved at the region's stack
//! pointer and must be released in reverse order of allocation. Scopes bound
//! to this pool take a [`StackMark`] on entry and rewind to it on exit,
//! reclaiming anything still outstanding in that thread's region only.
//!
//! ```text
//! [start]--[hdr|blk1]--[hdr|blk2]--[top]----free----[end]
//! ```

use std::alloc::{self, Layout};
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, RwLock};

use super::header::{BlockHeader, BlockState, BlockTag, HEADER_SIZE};
use super::{round_up, Block, FreeTracking, Pool, PoolId, ReleaseFault, Released, ALIGNMENT};

/// Blocks that were allocated and not released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Outstanding {
    pub count: u64,
    pub bytes: u64,
}

#[derive(Debug)]
struct StackBlock {
    /// Offset of the header from the buffer start.
    offset: usize,
    size: usize,
    released: bool,
}

#[derive(Debug, Default)]
struct StackState {
    top: usize,
    blocks: Vec<StackBlock>,
}

/// One fixed LIFO buffer.
pub struct StackRegion {
    buffer: NonNull<u8>,
    capacity: usize,
    state: Mutex<StackState>,
}

// SAFETY: the buffer is owned exclusively by this region and every access to
// its bookkeeping goes through the mutex.
unsafe impl Send for StackRegion {}
unsafe impl Sync for StackRegion {}

impl StackRegion {
    /// Creates a zero-filled region of `capacity` bytes.
    ///
    /// # Panics
    ///
    /// If `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity must be greater than zero");
        let layout = Self::layout(capacity);
        // SAFETY: non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let buffer = NonNull::new(raw).unwrap_or_else(|| alloc::handle_alloc_error(layout));
        Self {
            buffer,
            capacity,
            state: Mutex::new(StackState::default()),
        }
    }

    fn layout(capacity: usize) -> Layout {
        Layout::from_size_align(capacity, ALIGNMENT).unwrap_or_else(|_| {
            panic!("invalid temporary stack capacity: {}", capacity)
        })
    }

    fn top(&self) -> usize {
        self.state.lock().top
    }

    /// Rewinds the stack pointer to `top`, invalidating every block above it.
    fn rewind(&self, top: usize) -> Outstanding {
        let mut state = self.state.lock();
        let mut rewound = Outstanding::default();
        while state.blocks.last().is_some_and(|block| block.offset >= top) {
            let Some(block) = state.blocks.pop() else { break };
            if !block.released {
                rewound.count += 1;
                rewound.bytes += block.size as u64;
                // SAFETY: the header lies inside the buffer and was written by `allocate`.
                unsafe { BlockHeader::set_state(self.payload_at(block.offset), BlockState::Rewound) };
            }
        }
        state.top = state.top.min(top);
        rewound
    }

    /// Unreleased blocks at or above `top`.
    fn outstanding_above(&self, top: usize) -> Outstanding {
        let state = self.state.lock();
        state
            .blocks
            .iter()
            .filter(|block| block.offset >= top && !block.released)
            .fold(Outstanding::default(), |acc, block| Outstanding {
                count: acc.count + 1,
                bytes: acc.bytes + block.size as u64,
            })
    }

    /// Number of blocks not yet reclaimed, out-of-order released ones included.
    pub fn depth(&self) -> usize {
        self.state.lock().blocks.len()
    }

    pub fn used(&self) -> usize {
        self.top()
    }

    fn payload_at(&self, offset: usize) -> NonNull<u8> {
        // SAFETY: offsets are always within the buffer.
        unsafe { NonNull::new_unchecked(self.buffer.as_ptr().add(offset + HEADER_SIZE)) }
    }

    fn offset_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        (ptr.as_ptr() as usize)
            .checked_sub(self.buffer.as_ptr() as usize)?
            .checked_sub(HEADER_SIZE)
    }

    pub fn allocate(&self, size: usize) -> Option<Block> {
        let size = round_up(size)?;
        let total = HEADER_SIZE.checked_add(size)?;
        let mut state = self.state.lock();
        let offset = state.top;
        if total > self.capacity - offset {
            return None;
        }
        // SAFETY: `offset + total` fits in the buffer and offsets stay aligned.
        let ptr = unsafe {
            let block = NonNull::new_unchecked(self.buffer.as_ptr().add(offset));
            BlockHeader::init(block, BlockTag::Pool(PoolId::TemporaryStack), size)
        };
        state.top = offset + total;
        state.blocks.push(StackBlock {
            offset,
            size,
            released: false,
        });
        Some(Block { ptr, size })
    }

    pub fn owns(&self, ptr: NonNull<u8>) -> bool {
        let start = self.buffer.as_ptr() as usize;
        let addr = ptr.as_ptr() as usize;
        addr >= start + HEADER_SIZE && addr < start + self.capacity
    }

    /// Returns a block to the region.
    ///
    /// # Safety
    ///
    /// `owns(ptr)` must have returned true for `ptr`.
    pub unsafe fn release(&self, ptr: NonNull<u8>) -> Result<Released, ReleaseFault> {
        let offset = self.offset_of(ptr).ok_or(ReleaseFault::Corrupt)?;
        let mut state = self.state.lock();

        // SAFETY: `owns` places the header inside the zero-filled buffer.
        let header = unsafe { BlockHeader::read(ptr) };
        if !header.is_valid() || header.tag() != Some(BlockTag::Pool(PoolId::TemporaryStack)) {
            return Err(ReleaseFault::Corrupt);
        }
        match header.state() {
            Some(BlockState::Live) => {}
            Some(BlockState::Released) => return Err(ReleaseFault::DoubleRelease),
            Some(BlockState::Rewound) => return Err(ReleaseFault::ScopeClosed),
            None => return Err(ReleaseFault::Corrupt),
        }

        let index = state
            .blocks
            .iter()
            .rposition(|block| block.offset == offset && !block.released)
            .ok_or(ReleaseFault::ScopeClosed)?;
        let size = state.blocks[index].size;
        let in_order = index + 1 == state.blocks.len();

        // SAFETY: same header as above.
        unsafe { BlockHeader::set_state(ptr, BlockState::Released) };
        state.blocks[index].released = true;

        // Pop the released run at the top; out-of-order blocks go once they surface.
        while let Some(block) = state.blocks.last() {
            if !block.released {
                break;
            }
            state.top = block.offset;
            state.blocks.pop();
        }

        Ok(Released {
            size,
            tracked: true,
            in_order,
        })
    }
}

impl Drop for StackRegion {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with the same layout.
        unsafe { alloc::dealloc(self.buffer.as_ptr(), Self::layout(self.capacity)) };
    }
}

/// Stack pointer position of one thread's region, captured when a scope is entered.
#[derive(Clone)]
pub struct StackMark {
    region: Arc<StackRegion>,
    top: usize,
}

impl std::fmt::Debug for StackMark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackMark")
            .field("region", &self.region.buffer)
            .field("top", &self.top)
            .finish()
    }
}

/// The temporary stack pool: a table of per-thread regions.
pub struct TemporaryStack {
    region_capacity: usize,
    regions: RwLock<HashMap<ThreadId, Arc<StackRegion>>>,
}

impl TemporaryStack {
    /// Creates the pool. Every thread's region gets `region_capacity` bytes.
    ///
    /// # Panics
    ///
    /// If `region_capacity` is zero.
    pub fn new(region_capacity: usize) -> Self {
        assert!(region_capacity > 0, "Capacity must be greater than zero");
        Self {
            region_capacity,
            regions: RwLock::new(HashMap::new()),
        }
    }

    /// The calling thread's region, created on first use.
    pub fn region(&self) -> Arc<StackRegion> {
        let id = thread::current().id();
        if let Some(region) = self.regions.read().get(&id) {
            return Arc::clone(region);
        }
        let mut regions = self.regions.write();
        Arc::clone(
            regions
                .entry(id)
                .or_insert_with(|| Arc::new(StackRegion::new(self.region_capacity))),
        )
    }

    fn region_of(&self, ptr: NonNull<u8>) -> Option<Arc<StackRegion>> {
        self.regions
            .read()
            .values()
            .find(|region| region.owns(ptr))
            .cloned()
    }

    /// Drops `thread`'s region if it holds no blocks and no scope refers to it.
    pub fn retire(&self, thread: ThreadId) {
        let mut regions = self.regions.write();
        let idle = regions
            .get(&thread)
            .is_some_and(|region| Arc::strong_count(region) == 1 && region.depth() == 0);
        if idle {
            regions.remove(&thread);
        }
    }

    pub fn mark(&self) -> StackMark {
        let region = self.region();
        let top = region.top();
        StackMark { region, top }
    }

    /// Rewinds the marked region, invalidating every block above the mark.
    pub fn rewind(&self, mark: &StackMark) -> Outstanding {
        mark.region.rewind(mark.top)
    }

    /// Blocks above the mark that have not been released.
    pub fn outstanding_since(&self, mark: &StackMark) -> Outstanding {
        mark.region.outstanding_above(mark.top)
    }

    /// Blocks not yet reclaimed in the calling thread's region.
    pub fn depth(&self) -> usize {
        self.regions
            .read()
            .get(&thread::current().id())
            .map_or(0, |region| region.depth())
    }

    /// Number of live regions.
    pub fn region_count(&self) -> usize {
        self.regions.read().len()
    }
}

impl Pool for TemporaryStack {
    fn id(&self) -> PoolId {
        PoolId::TemporaryStack
    }

    fn allocate(&self, size: usize) -> Option<Block> {
        self.region().allocate(size)
    }

    fn owns(&self, ptr: NonNull<u8>) -> bool {
        self.region_of(ptr).is_some()
    }

    unsafe fn release(&self, ptr: NonNull<u8>) -> Result<Released, ReleaseFault> {
        let region = self.region_of(ptr).ok_or(ReleaseFault::Corrupt)?;
        // SAFETY: `region_of` found the region containing `ptr`.
        unsafe { region.release(ptr) }
    }

    fn free_tracking(&self) -> FreeTracking {
        FreeTracking::Precise
    }

    /// Capacity of each thread's region.
    fn capacity(&self) -> Option<usize> {
        Some(self.region_capacity)
    }

    fn used(&self) -> usize {
        self.regions.read().values().map(|region| region.used()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifo_release_rewinds_top() {
        let stack = StackRegion::new(1024);
        let a = stack.allocate(100).unwrap();
        let b = stack.allocate(200).unwrap();
        assert_eq!(stack.used(), 2 * HEADER_SIZE + 112 + 208);

        unsafe {
            assert!(stack.release(b.ptr).unwrap().in_order);
            assert_eq!(stack.used(), HEADER_SIZE + 112);
            assert!(stack.release(a.ptr).unwrap().in_order);
        }
        assert_eq!(stack.used(), 0);
    }

    #[test]
    fn out_of_order_release_is_deferred() {
        let stack = StackRegion::new(1024);
        let a = stack.allocate(100).unwrap();
        let b = stack.allocate(200).unwrap();

        unsafe {
            let released = stack.release(a.ptr).unwrap();
            assert!(!released.in_order);
            assert_eq!(released.size, 112);
            assert_eq!(stack.depth(), 2);
            assert_eq!(
                stack.outstanding_above(0),
                Outstanding { count: 1, bytes: 208 }
            );

            assert!(stack.release(b.ptr).unwrap().in_order);
        }
        assert_eq!(stack.depth(), 0);
        assert_eq!(stack.used(), 0);
    }

    #[test]
    fn rewind_invalidates_blocks_above_mark() {
        let pool = TemporaryStack::new(1024);
        let below = pool.allocate(16).unwrap();
        let mark = pool.mark();
        let a = pool.allocate(100).unwrap();
        let b = pool.allocate(200).unwrap();
        unsafe { pool.release(b.ptr).unwrap() };
        assert_eq!(
            pool.outstanding_since(&mark),
            Outstanding { count: 1, bytes: 112 }
        );

        let rewound = pool.rewind(&mark);
        assert_eq!(rewound, Outstanding { count: 1, bytes: 112 });
        assert_eq!(pool.used(), HEADER_SIZE + 16);
        assert_eq!(pool.outstanding_since(&mark), Outstanding::default());

        unsafe {
            assert_eq!(pool.release(a.ptr), Err(ReleaseFault::ScopeClosed));
            assert!(pool.release(below.ptr).unwrap().in_order);
        }
    }

    #[test]
    fn threads_get_separate_regions() {
        let pool = Arc::new(TemporaryStack::new(1024));
        let mine = pool.allocate(64).unwrap();
        let mark = pool.mark();

        let other = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                let block = pool.allocate(64).unwrap();
                block.ptr.as_ptr() as usize
            })
            .join()
            .unwrap()
        };
        assert_eq!(pool.region_count(), 2);
        assert_eq!(pool.depth(), 1);

        // Rewinding this thread's mark leaves the other region alone.
        assert_eq!(pool.rewind(&mark), Outstanding::default());
        let other = NonNull::new(other as *mut u8).unwrap();
        assert!(pool.owns(other));
        unsafe {
            assert!(pool.release(other).unwrap().in_order);
            assert!(pool.release(mine.ptr).unwrap().in_order);
        }
        assert_eq!(pool.used(), 0);
    }

    #[test]
    fn idle_regions_are_retired() {
        let pool = TemporaryStack::new(1024);
        let id = thread::current().id();
        let block = pool.allocate(8).unwrap();
        pool.retire(id);
        assert_eq!(pool.region_count(), 1);

        unsafe { pool.release(block.ptr).unwrap() };
        let mark = pool.mark();
        pool.retire(id);
        assert_eq!(pool.region_count(), 1, "a scope still refers to the region");

        drop(mark);
        pool.retire(id);
        assert_eq!(pool.region_count(), 0);
    }

    #[test]
    fn double_release_detected() {
        let stack = StackRegion::new(1024);
        let a = stack.allocate(8).unwrap();
        unsafe {
            stack.release(a.ptr).unwrap();
            assert_eq!(stack.release(a.ptr), Err(ReleaseFault::DoubleRelease));
        }
    }

    #[test]
    fn interior_pointer_is_corrupt() {
        let stack = StackRegion::new(1024);
        let a = stack.allocate(64).unwrap();
        let interior = unsafe { NonNull::new_unchecked(a.ptr.as_ptr().add(32)) };
        assert!(stack.owns(interior));
        assert_eq!(unsafe { stack.release(interior) }, Err(ReleaseFault::Corrupt));
    }

    #[test]
    fn exhaustion_returns_none() {
        let stack = StackRegion::new(256);
        assert!(stack.allocate(256 - HEADER_SIZE).is_some());
        assert!(stack.allocate(0).is_none());
    }

    #[test]
    #[should_panic]
    fn zero_capacity_rejected() {
        TemporaryStack::new(0);
    }
}
