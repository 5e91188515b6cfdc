//! Tagged header written in front of every block.

use std::ptr::NonNull;

use super::{PoolId, ALIGNMENT};

pub(crate) const BLOCK_MAGIC: u32 = 0x4B45_454C;

const UNTRACKED_TAG: u8 = u8::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum BlockState {
    Live = 1,
    Released = 2,
    Rewound = 3,
}

impl BlockState {
    fn decode(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(BlockState::Live),
            2 => Some(BlockState::Released),
            3 => Some(BlockState::Rewound),
            _ => None,
        }
    }
}

/// Which bookkeeping produced a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockTag {
    Pool(PoolId),
    /// Allocated while the manager was disabled.
    Untracked,
}

impl BlockTag {
    fn encode(self) -> u8 {
        match self {
            BlockTag::Pool(id) => id as u8,
            BlockTag::Untracked => UNTRACKED_TAG,
        }
    }

    fn decode(raw: u8) -> Option<Self> {
        if raw == UNTRACKED_TAG {
            Some(BlockTag::Untracked)
        } else {
            PoolId::from_index(raw).map(BlockTag::Pool)
        }
    }
}

#[derive(Debug, Clone, Copy)]
#[repr(C, align(16))]
pub(crate) struct BlockHeader {
    magic: u32,
    tag: u8,
    state: u8,
    _reserved: u16,
    /// Rounded payload size.
    size: usize,
}

pub(crate) const HEADER_SIZE: usize = std::mem::size_of::<BlockHeader>();

const _: () = assert!(HEADER_SIZE % ALIGNMENT == 0);

impl BlockHeader {
    /// Writes a live header at `block` and returns the payload pointer.
    ///
    /// # Safety
    ///
    /// `block` must be aligned to [`ALIGNMENT`] and valid for writes of
    /// `HEADER_SIZE + size` bytes.
    pub(crate) unsafe fn init(block: NonNull<u8>, tag: BlockTag, size: usize) -> NonNull<u8> {
        let header = BlockHeader {
            magic: BLOCK_MAGIC,
            tag: tag.encode(),
            state: BlockState::Live as u8,
            _reserved: 0,
            size,
        };
        // SAFETY: caller guarantees alignment and room for the header.
        unsafe {
            block.cast::<BlockHeader>().as_ptr().write(header);
            NonNull::new_unchecked(block.as_ptr().add(HEADER_SIZE))
        }
    }

    /// Copies the header preceding `payload`.
    ///
    /// # Safety
    ///
    /// The `HEADER_SIZE` bytes before `payload` must be initialized memory
    /// owned by a pool.
    pub(crate) unsafe fn read(payload: NonNull<u8>) -> BlockHeader {
        // SAFETY: forwarded to the caller.
        unsafe { Self::start(payload).cast::<BlockHeader>().as_ptr().read_unaligned() }
    }

    /// # Safety
    ///
    /// Same as [`BlockHeader::read`], and the memory must be writable.
    pub(crate) unsafe fn set_state(payload: NonNull<u8>, state: BlockState) {
        // SAFETY: forwarded to the caller.
        unsafe {
            let header = Self::start(payload).cast::<BlockHeader>().as_ptr();
            (*header).state = state as u8;
        }
    }

    /// Start of the block (header) for a payload pointer.
    ///
    /// # Safety
    ///
    /// `payload` must be at least `HEADER_SIZE` bytes into its allocation.
    pub(crate) unsafe fn start(payload: NonNull<u8>) -> NonNull<u8> {
        // SAFETY: forwarded to the caller.
        unsafe { NonNull::new_unchecked(payload.as_ptr().sub(HEADER_SIZE)) }
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.magic == BLOCK_MAGIC
    }

    pub(crate) fn tag(&self) -> Option<BlockTag> {
        BlockTag::decode(self.tag)
    }

    pub(crate) fn state(&self) -> Option<BlockState> {
        BlockState::decode(self.state)
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C, align(16))]
    struct Scratch([u8; 64]);

    #[test]
    fn header_round_trips_through_payload() {
        let mut scratch = Scratch([0; 64]);
        let block = NonNull::new(scratch.0.as_mut_ptr()).unwrap();
        unsafe {
            let payload = BlockHeader::init(block, BlockTag::Pool(PoolId::TemporaryStack), 32);
            assert_eq!(payload.as_ptr() as usize - block.as_ptr() as usize, HEADER_SIZE);

            let header = BlockHeader::read(payload);
            assert!(header.is_valid());
            assert_eq!(header.tag(), Some(BlockTag::Pool(PoolId::TemporaryStack)));
            assert_eq!(header.state(), Some(BlockState::Live));
            assert_eq!(header.size(), 32);

            BlockHeader::set_state(payload, BlockState::Rewound);
            assert_eq!(BlockHeader::read(payload).state(), Some(BlockState::Rewound));
        }
    }

    #[test]
    fn zeroed_memory_is_not_a_header() {
        let scratch = Scratch([0; 64]);
        let payload = NonNull::new(scratch.0.as_ptr().wrapping_add(HEADER_SIZE) as *mut u8).unwrap();
        let header = unsafe { BlockHeader::read(payload) };
        assert!(!header.is_valid());
        assert_eq!(header.state(), None);
    }
}
