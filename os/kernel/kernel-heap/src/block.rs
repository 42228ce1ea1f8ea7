//! # Heap Blocks
//!
//! A block is the unit by which the heap grows. It owns a header table by
//! value and hands out memory from a fixed window of physical memory:
//!
//! ```text
//!   start                      cursor                         end
//!   ├────────┬──────┬──────────┼──────────────────────────────┤
//!   │ slot 0 │ 511  │ slot 1   │          untouched           │
//!   └────────┴──────┴──────────┴──────────────────────────────┘
//! ```
//!
//! Spans are carved from the window in reservation order by a bump cursor and
//! stay with their slot for the block's lifetime, so two slots never share a
//! byte.

use crate::header::{BlockHeader, HeaderTable};
use kernel_info::memory::{HEAP_BLOCK_SPAN, HEAP_MAX_HEADERS};

/// Handle of a block inside a [`BlockChain`](crate::chain::BlockChain).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub(crate) usize);

impl BlockId {
    /// Position of the block in the chain's arena.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// A fixed-capacity container of [`HEAP_MAX_HEADERS`] allocation headers.
#[derive(Debug, Clone)]
pub struct Block {
    headers: HeaderTable,
    pub(crate) prev: Option<BlockId>,
    pub(crate) next: Option<BlockId>,
    start: usize,
    cursor: usize,
    end: usize,
    /// Index of the memory region the window was carved from.
    region: usize,
    live: bool,
}

impl Block {
    /// An arena entry that does not hold a block.
    pub const VACANT: Self = Self {
        headers: [BlockHeader::BLANK; HEAP_MAX_HEADERS],
        prev: None,
        next: None,
        start: 0,
        cursor: 0,
        end: 0,
        region: 0,
        live: false,
    };

    /// Turns this arena entry into a live block with window
    /// `[start, start + HEAP_BLOCK_SPAN)`, every header free and tagged.
    pub(crate) fn activate(&mut self, start: usize, region: usize) {
        for header in &mut self.headers {
            *header = BlockHeader::FRESH;
        }
        self.prev = None;
        self.next = None;
        self.start = start;
        self.cursor = start;
        self.end = start + HEAP_BLOCK_SPAN;
        self.region = region;
        self.live = true;
    }

    /// Whether this arena entry holds a linked block.
    #[inline]
    #[must_use]
    pub const fn is_live(&self) -> bool {
        self.live
    }

    /// First byte of the window.
    #[inline]
    #[must_use]
    pub const fn start(&self) -> usize {
        self.start
    }

    /// One past the last byte of the window.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> usize {
        self.end
    }

    /// Index of the memory region this block's window lies in.
    #[inline]
    #[must_use]
    pub const fn region(&self) -> usize {
        self.region
    }

    /// Predecessor in the chain.
    #[inline]
    #[must_use]
    pub const fn prev(&self) -> Option<BlockId> {
        self.prev
    }

    /// Successor in the chain.
    #[inline]
    #[must_use]
    pub const fn next(&self) -> Option<BlockId> {
        self.next
    }

    /// The slot table.
    #[inline]
    #[must_use]
    pub const fn headers(&self) -> &HeaderTable {
        &self.headers
    }

    #[inline]
    pub(crate) const fn headers_mut(&mut self) -> &mut HeaderTable {
        &mut self.headers
    }

    /// Whether `address` lies inside this block's window.
    #[must_use]
    pub const fn contains(&self, address: usize) -> bool {
        self.live && address >= self.start && address < self.end
    }

    /// Bytes left between the cursor and the end of the window.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.end - self.cursor
    }

    /// Carves `len` bytes from the window, or `None` if they do not fit.
    pub(crate) fn bump(&mut self, len: usize) -> Option<usize> {
        if len > self.remaining() {
            return None;
        }
        let address = self.cursor;
        self.cursor += len;
        Some(address)
    }

    /// Whether the span `[address, address + capacity)` ends at the cursor,
    /// i.e. it is the most recent carve and may be extended in place.
    #[must_use]
    pub const fn is_last_span(&self, address: usize, capacity: usize) -> bool {
        address + capacity == self.cursor
    }

    /// Re-tags every header if header 0 lacks the sentinel.
    ///
    /// Returns the first used slot found while re-tagging; a used slot with a
    /// missing tag cannot be trusted.
    pub(crate) fn prime(&mut self) -> Result<(), usize> {
        if self.headers[0].is_intact() {
            return Ok(());
        }
        for (slot, header) in self.headers.iter_mut().enumerate() {
            if header.is_used() {
                return Err(slot);
            }
            header.stamp();
        }
        Ok(())
    }

    /// First header whose tag deviates from the sentinel.
    #[must_use]
    pub fn first_damaged(&self) -> Option<(usize, u32)> {
        self.headers
            .iter()
            .enumerate()
            .find(|(_, header)| !header.is_intact())
            .map(|(slot, header)| (slot, header.tag()))
    }

    /// Slot index of the live allocation starting at `address`.
    #[must_use]
    pub fn find_live(&self, address: usize) -> Option<usize> {
        if !self.contains(address) {
            return None;
        }
        self.headers
            .iter()
            .position(|header| header.is_used() && header.address() == address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_at(start: usize) -> Block {
        let mut block = Block::VACANT;
        block.activate(start, 0);
        block
    }

    #[test]
    fn bump_carves_disjoint_spans() {
        let mut block = block_at(0x10_0000);
        assert_eq!(block.bump(32), Some(0x10_0000));
        assert_eq!(block.bump(16), Some(0x10_0020));
        assert!(block.is_last_span(0x10_0020, 16));
        assert!(!block.is_last_span(0x10_0000, 32));
        assert_eq!(block.remaining(), HEAP_BLOCK_SPAN - 48);
    }

    #[test]
    fn bump_refuses_overflowing_window() {
        let mut block = block_at(0x10_0000);
        assert!(block.bump(HEAP_BLOCK_SPAN).is_some());
        assert_eq!(block.bump(16), None);
    }

    #[test]
    fn activation_tags_every_header() {
        let block = block_at(0x10_0000);
        assert!(block.is_live());
        assert_eq!(block.first_damaged(), None);
        assert!(block.headers().iter().all(|h| !h.is_used()));
    }

    #[test]
    fn prime_retags_blank_table() {
        let mut block = Block::VACANT;
        assert!(block.first_damaged().is_some());
        assert_eq!(block.prime(), Ok(()));
        assert_eq!(block.first_damaged(), None);
    }

    #[test]
    fn prime_rejects_used_slot_without_tag() {
        let mut block = Block::VACANT;
        block.headers_mut()[7].poison();
        assert_eq!(block.prime(), Err(7));
    }

    #[test]
    fn vacant_block_contains_nothing() {
        assert!(!Block::VACANT.contains(0));
    }
}
