//! # Block Chain
//!
//! The heap's blocks form a doubly linked list threaded through a fixed arena.
//! Links are [`BlockId`]s rather than addresses, and they are symmetric:
//!
//! ```text
//!        base                                  tail
//!   None ◄─┤ B0 ├──next──► ┤ B1 ├──next──► ┤ B2 ├─► None
//!          │    │◄──prev── │    │◄──prev── │    │
//! ```
//!
//! Block windows are carved from the usable memory regions recorded at
//! `init`. Every region keeps its own cursor, so a region that is not at the
//! tail of the chain still feeds later growth:
//!
//! ```text
//!   region 0  ├ B0 ┤ B2 ┤ B3 ┤ ..... cursor ─► ┤ end
//!   region 1  ├ B1 ┤ cursor ─► ┤ end
//! ```
//!
//! The chain only grows. Blocks are never handed back to the memory map.

use crate::block::{Block, BlockId};
use crate::error::HeapError;
use kernel_info::memory::HEAP_BLOCK_SPAN;

/// The uncarved part of a usable memory region.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct Region {
    cursor: usize,
    end: usize,
}

impl Region {
    const EMPTY: Self = Self { cursor: 0, end: 0 };

    /// Whether another block window fits below `end`.
    fn has_room(&self) -> bool {
        self.cursor
            .checked_add(HEAP_BLOCK_SPAN)
            .is_some_and(|end| end <= self.end)
    }

    /// Carves the next block window, returning its start.
    fn take(&mut self) -> Option<usize> {
        if !self.has_room() {
            return None;
        }
        let start = self.cursor;
        self.cursor += HEAP_BLOCK_SPAN;
        Some(start)
    }
}

/// Arena of up to `BLOCKS` heap blocks linked into a chain.
///
/// At most `BLOCKS` regions are tracked: a region is only worth recording if
/// it can host a block, and the arena never holds more than `BLOCKS` of them.
pub struct BlockChain<const BLOCKS: usize> {
    blocks: [Block; BLOCKS],
    regions: [Region; BLOCKS],
    region_count: usize,
    base: Option<BlockId>,
    tail: Option<BlockId>,
    len: usize,
}

impl<const BLOCKS: usize> Default for BlockChain<BLOCKS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const BLOCKS: usize> BlockChain<BLOCKS> {
    /// An empty chain with no regions recorded.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            blocks: [const { Block::VACANT }; BLOCKS],
            regions: [Region::EMPTY; BLOCKS],
            region_count: 0,
            base: None,
            tail: None,
            len: 0,
        }
    }

    /// First block of the chain.
    #[inline]
    #[must_use]
    pub const fn base(&self) -> Option<BlockId> {
        self.base
    }

    /// Last block of the chain, the one growth links after.
    #[inline]
    #[must_use]
    pub const fn tail(&self) -> Option<BlockId> {
        self.tail
    }

    /// Number of linked blocks.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of memory regions blocks can be carved from.
    #[inline]
    #[must_use]
    pub const fn region_count(&self) -> usize {
        self.region_count
    }

    /// The block behind `id`, if it is linked.
    #[must_use]
    pub fn get(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id.0).filter(|block| block.is_live())
    }

    pub(crate) fn get_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.blocks.get_mut(id.0).filter(|block| block.is_live())
    }

    /// Successor of `id` in the chain.
    #[must_use]
    pub fn next(&self, id: BlockId) -> Option<BlockId> {
        self.get(id).and_then(Block::next)
    }

    /// Predecessor of `id` in the chain.
    #[must_use]
    pub fn prev(&self, id: BlockId) -> Option<BlockId> {
        self.get(id).and_then(Block::prev)
    }

    /// Block ids from base to tail.
    pub fn ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        core::iter::successors(self.base, move |&id| self.next(id))
    }

    /// Live blocks from base to tail.
    pub fn iter(&self) -> impl Iterator<Item = &Block> + '_ {
        self.ids().filter_map(move |id| self.get(id))
    }

    /// Records the usable range `[start, end)` for carving block windows.
    ///
    /// `start` must already be aligned. Returns the region's index, or `None`
    /// if the range cannot host a block or the region table is full.
    pub(crate) fn add_region(&mut self, start: usize, end: usize) -> Option<usize> {
        let region = Region { cursor: start, end };
        if !region.has_room() || self.region_count == BLOCKS {
            return None;
        }
        let index = self.region_count;
        self.regions[index] = region;
        self.region_count += 1;
        Some(index)
    }

    /// Links a block carved from the front of `region`.
    ///
    /// # Errors
    /// [`HeapError::OutOfMemory`] if the arena is full or the region has no
    /// room left.
    pub(crate) fn seed(&mut self, region: usize) -> Result<BlockId, HeapError> {
        if self.len == BLOCKS {
            return Err(HeapError::OutOfMemory);
        }
        let start = self.regions[..self.region_count]
            .get_mut(region)
            .and_then(Region::take)
            .ok_or(HeapError::OutOfMemory)?;
        Ok(self.link(start, region))
    }

    /// Links a new block after `current`.
    ///
    /// The window comes from `current`'s own region when it still has room,
    /// which places it directly after the most recent block of that region.
    /// Otherwise the first region with room, in memory map order, is used.
    ///
    /// # Errors
    /// - [`HeapError::AlreadyLinked`] if `current` already has a successor;
    ///   walk to it instead.
    /// - [`HeapError::OutOfMemory`] if `current` is not a live block, the
    ///   arena is full, or every region is used up.
    pub fn grow(&mut self, current: BlockId) -> Result<BlockId, HeapError> {
        let block = self.get(current).ok_or(HeapError::OutOfMemory)?;
        if block.next().is_some() {
            return Err(HeapError::AlreadyLinked);
        }
        if self.len == BLOCKS {
            return Err(HeapError::OutOfMemory);
        }

        let regions = &self.regions[..self.region_count];
        let preferred = block.region();
        let region = regions
            .get(preferred)
            .filter(|r| r.has_room())
            .map(|_| preferred)
            .or_else(|| regions.iter().position(Region::has_room))
            .ok_or(HeapError::OutOfMemory)?;

        let id = self.seed(region)?;
        log::debug!(
            "linked heap block {} at {:#x} (region {region})",
            id.0,
            self.blocks[id.0].start()
        );
        Ok(id)
    }

    /// Activates the next arena entry at `start` and links it after the tail.
    fn link(&mut self, start: usize, region: usize) -> BlockId {
        let id = BlockId(self.len);
        self.blocks[id.0].activate(start, region);
        self.blocks[id.0].prev = self.tail;
        if let Some(tail) = self.tail {
            self.blocks[tail.0].next = Some(id);
        }
        self.tail = Some(id);
        self.base.get_or_insert(id);
        self.len += 1;
        id
    }
}
