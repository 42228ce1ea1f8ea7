//! # Allocator Engine
//!
//! [`Heap`] owns the block chain and serves `alloc`, `resize` and `free`.
//!
//! ## Allocation path
//!
//! ```text
//! alloc(size)
//!   │  prime base block tags (first call only)
//!   ▼
//! ┌──────────────────────────────┐   Unavailable   ┌─────────────────────┐
//! │ verify tags, probe the block │ ──────────────► │ expand: grow chain  │
//! │ 0, 511, 1, 510, 2, ...       │ ◄────────────── │ or walk to `next`   │
//! └──────────────────────────────┘                 └─────────────────────┘
//!   │ reserved                                       │ out of memory
//!   ▼                                                ▼
//! address                                        fatal hook (never returns)
//! ```
//!
//! # Invariants
//! - A slot is used if and only if its tracked size is non-zero, except for
//!   poisoned slots.
//! - Every header of every live block carries the sentinel tag.
//! - Spans of distinct slots never overlap, so live allocations never alias.

use crate::block::{Block, BlockId};
use crate::chain::BlockChain;
use crate::error::{FatalHook, HeapError, halt};
use crate::lock::AllocLock;
use crate::phys_mapper::PhysMapper;
use crate::stats::HeapStats;
use kernel_info::boot::{MemoryMap, MemoryRegion};
use kernel_info::memory::{
    HEAP_ALIGN, HEAP_BLOCK_SPAN, HEAP_MAX_BLOCKS, HEAP_MAX_HEADERS, HEAP_SLOT_SIZE_CEILING,
};

/// Round `len` up to the heap's reservation granularity.
#[inline]
const fn round_up(len: usize) -> Option<usize> {
    len.checked_next_multiple_of(HEAP_ALIGN)
}

/// The carvable range `(start, end)` of a usable region, if it can host a
/// block.
///
/// The start is aligned to [`HEAP_ALIGN`] and kept away from address zero so
/// that no allocation is ever mistaken for a null pointer.
fn block_window(region: &MemoryRegion) -> Option<(usize, usize)> {
    let base = usize::try_from(region.base).ok()?;
    let end = usize::try_from(region.end()).unwrap_or(usize::MAX);
    let start = base.max(1).checked_next_multiple_of(HEAP_ALIGN)?;
    let fits = start.checked_add(HEAP_BLOCK_SPAN).is_some_and(|e| e <= end);
    fits.then_some((start, end))
}

/// The kernel heap: a chain of fixed-capacity blocks over boot memory.
///
/// `BLOCKS` bounds how far the chain can grow. The heap does no locking of
/// its own beyond the reservation flag; wrap it in a
/// [`KernelHeap`](crate::KernelHeap) to share it.
pub struct Heap<M: PhysMapper, const BLOCKS: usize = HEAP_MAX_BLOCKS> {
    mapper: M,
    chain: BlockChain<BLOCKS>,
    lock: AllocLock,
    enabled: bool,
    /// Set after the first allocation has primed the base block.
    primed: bool,
    memory_size: u64,
    poisoned: usize,
    fatal: FatalHook,
}

impl<M: PhysMapper, const BLOCKS: usize> Heap<M, BLOCKS> {
    /// A disabled heap. Call [`init`](Self::init) before allocating.
    pub const fn new(mapper: M) -> Self {
        Self {
            mapper,
            chain: BlockChain::new(),
            lock: AllocLock::new(),
            enabled: false,
            primed: false,
            memory_size: 0,
            poisoned: 0,
            fatal: halt,
        }
    }

    /// Replaces the handler for out-of-memory and corruption.
    pub fn set_fatal_hook(&mut self, hook: FatalHook) {
        self.fatal = hook;
    }

    /// Whether [`init`](Self::init) has succeeded.
    #[inline]
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Start of the base block's window; `0` while disabled.
    #[must_use]
    pub fn pool_start(&self) -> usize {
        self.chain
            .base()
            .and_then(|id| self.chain.get(id))
            .map_or(0, Block::start)
    }

    /// Highest window end of any linked block; `0` while disabled.
    ///
    /// Moves up as the chain grows into higher memory.
    #[must_use]
    pub fn pool_end(&self) -> usize {
        self.chain.iter().map(Block::end).max().unwrap_or(0)
    }

    /// Usable bytes advertised by the memory map at `init`.
    #[must_use]
    pub const fn memory_size(&self) -> u64 {
        self.memory_size
    }

    /// The block chain, for inspection.
    #[must_use]
    pub const fn chain(&self) -> &BlockChain<BLOCKS> {
        &self.chain
    }

    /// The mapper used to reach heap memory.
    #[must_use]
    pub const fn mapper(&self) -> &M {
        &self.mapper
    }

    /// The most recent `(address, size)` reservation.
    #[must_use]
    pub fn last_reservation(&self) -> Option<(usize, usize)> {
        self.lock.last()
    }

    /// Counts live slots and bytes across the whole chain.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            memory_size: self.memory_size,
            blocks: self.chain.len(),
            poisoned_slots: self.poisoned,
            ..HeapStats::default()
        };
        for header in self.chain.iter().flat_map(|block| block.headers().iter()) {
            stats.bytes_reserved += header.capacity();
            if header.is_used() {
                stats.live_allocations += 1;
                stats.bytes_in_use += header.size();
            }
        }
        stats
    }

    /// Builds the block chain from the boot memory map and enables the heap.
    ///
    /// Every usable region that can host a block is recorded for growth. The
    /// first one seeds the base block, the second one the high block. With a
    /// single such region the chain starts with one block. Later regions, and
    /// the rest of the first two, feed growth.
    ///
    /// # Safety
    /// Every usable region in `map` must be mapped through this heap's
    /// [`PhysMapper`], writable, and owned exclusively by the heap from now on.
    ///
    /// # Errors
    /// - [`HeapError::AlreadyEnabled`] if called twice.
    /// - [`HeapError::NoUsableMemory`] if no usable region fits a block.
    pub unsafe fn init(&mut self, map: &MemoryMap<'_>) -> Result<(), HeapError> {
        if self.enabled {
            return Err(HeapError::AlreadyEnabled);
        }

        for (start, end) in map.usable().filter_map(block_window) {
            if self.chain.add_region(start, end).is_none() {
                log::debug!("region table full; ignoring usable memory at {start:#x}");
                break;
            }
        }

        self.chain
            .seed(0)
            .map_err(|_| HeapError::NoUsableMemory)?;
        if self.chain.region_count() > 1 && self.chain.seed(1).is_err() {
            log::debug!("no arena entry left for the high block");
        }

        self.memory_size = map.usable_bytes();
        self.enabled = true;
        self.primed = false;

        log::info!("Memory heap is enabled.");
        log::info!("Memory size: {:#x}", self.memory_size);
        log::info!("From: {:#x} To: {:#x}", self.pool_start(), self.pool_end());
        Ok(())
    }

    /// Allocates `size` bytes and returns the physical address.
    ///
    /// The size is rounded up to [`HEAP_ALIGN`]; the address is aligned to it.
    ///
    /// # Errors
    /// - [`HeapError::NotEnabled`] before `init`.
    /// - [`HeapError::InvalidSize`] for `0` or more than one block window.
    ///
    /// Exhaustion and header corruption are fatal and go to the fatal hook.
    pub fn alloc(&mut self, size: usize) -> Result<usize, HeapError> {
        if !self.enabled {
            return Err(HeapError::NotEnabled);
        }
        if size == 0 || round_up(size).is_none_or(|len| len > HEAP_BLOCK_SPAN) {
            return Err(HeapError::InvalidSize);
        }

        self.prime_base();

        let mut current = self.chain.base();
        loop {
            let Some(id) = current else {
                self.fatal(HeapError::OutOfMemory);
            };
            self.verify(id);
            match self.alloc_in_block(id, size) {
                Ok(address) => return Ok(address),
                Err(HeapError::Unavailable) => current = Some(self.expand(id)),
                Err(e) => return Err(e),
            }
        }
    }

    /// Searches one block for a slot that accepts `size` bytes.
    ///
    /// Probes the lowest and highest unexamined slots alternately
    /// (`0, 511, 1, 510, ...`) until the two ends meet.
    ///
    /// # Errors
    /// - [`HeapError::NotEnabled`] before `init`.
    /// - [`HeapError::NullBlock`] if `id` is not a live block.
    /// - [`HeapError::Unavailable`] if no slot accepts the request.
    pub fn alloc_in_block(&mut self, id: BlockId, size: usize) -> Result<usize, HeapError> {
        if !self.enabled {
            return Err(HeapError::NotEnabled);
        }
        if self.chain.get(id).is_none() {
            return Err(HeapError::NullBlock);
        }

        let mut left = 0;
        let mut right = HEAP_MAX_HEADERS;
        let mut index = left;
        while left < right {
            if let Some(address) = self.reserve(id, index, size) {
                return Ok(address);
            }
            if index == left {
                left += 1;
                index = right - 1;
            } else {
                right -= 1;
                index = left;
            }
        }

        Err(HeapError::Unavailable)
    }

    /// Tries to reserve `size` bytes in one slot of one block.
    ///
    /// Returns `None` if the reservation flag is held, the slot is live, the
    /// slot's span is too small, or the block window is exhausted.
    ///
    /// A slot whose tracked size exceeds [`HEAP_SLOT_SIZE_CEILING`] is
    /// poisoned before anything else is considered: it is marked used and
    /// counted once, and stays marked until its tracked size drops to zero.
    /// Large allocations and allocations grown past the ceiling by
    /// [`resize`](Self::resize) are poisoned the first time a probe reaches
    /// them; they stay valid for their owner.
    pub fn reserve(&mut self, id: BlockId, slot: usize, size: usize) -> Option<usize> {
        let guard = self.lock.try_reserve()?;
        let block = self.chain.get_mut(id)?;
        let header = *block.headers().get(slot)?;

        if header.size() > HEAP_SLOT_SIZE_CEILING {
            if !header.is_poisoned() {
                block.headers_mut()[slot].poison();
                self.poisoned += 1;
                log::warn!(
                    "poisoned slot {slot} of heap block {}: tracked size {:#x} exceeds the ceiling",
                    id.index(),
                    header.size()
                );
            }
            return None;
        }
        if header.is_used() {
            return None;
        }

        let len = round_up(size)?;
        let address = if header.fits(len) {
            header.address()
        } else if header.is_assigned() {
            return None;
        } else {
            let address = block.bump(len)?;
            block.headers_mut()[slot].assign(address, len);
            address
        };

        block.headers_mut()[slot].occupy(len);
        guard.record(address, len);
        log::trace!(
            "reserved slot {slot} of heap block {} at {address:#x} ({len:#x} bytes)",
            id.index()
        );
        Some(address)
    }

    /// Links a new block after `id`, carved from `id`'s region or, once that
    /// is used up, from the first region with room.
    ///
    /// # Errors
    /// [`HeapError::AlreadyLinked`] if `id` has a successor,
    /// [`HeapError::OutOfMemory`] if the arena is full or every region is
    /// used up.
    pub fn grow(&mut self, id: BlockId) -> Result<BlockId, HeapError> {
        self.chain.grow(id)
    }

    /// Grows the chain after an exhausted block, or walks to its successor.
    fn expand(&mut self, id: BlockId) -> BlockId {
        match self.grow(id) {
            Ok(next) => next,
            Err(HeapError::AlreadyLinked) => match self.chain.next(id) {
                Some(next) => next,
                None => self.fatal(HeapError::NullBlock),
            },
            Err(_) => self.fatal(HeapError::OutOfMemory),
        }
    }

    /// Grows a live allocation by `new_size` bytes.
    ///
    /// The tracked size is cumulative: every call adds `new_size` (rounded up
    /// to [`HEAP_ALIGN`]). Added bytes read as zero. The allocation stays in
    /// place if its span already covers the new size or is the last span of
    /// its block and the window has room; otherwise it moves and the old slot
    /// is released.
    ///
    /// # Errors
    /// - [`HeapError::NotEnabled`] before `init`.
    /// - [`HeapError::BadArgument`] for a null pointer or zero size.
    /// - [`HeapError::NotFound`] if `ptr` is not a live allocation.
    /// - [`HeapError::InvalidSize`] if the grown size exceeds a block window.
    pub fn resize(&mut self, ptr: usize, new_size: usize) -> Result<usize, HeapError> {
        if !self.enabled {
            return Err(HeapError::NotEnabled);
        }
        if ptr == 0 || new_size == 0 {
            return Err(HeapError::BadArgument);
        }

        let (id, slot) = self.find_live(ptr).ok_or(HeapError::NotFound)?;
        let extra = round_up(new_size).ok_or(HeapError::InvalidSize)?;
        let block = self.chain.get_mut(id).ok_or(HeapError::NullBlock)?;
        let header = block.headers()[slot];
        let old = header.size();
        let grown = old
            .checked_add(extra)
            .filter(|&len| len <= HEAP_BLOCK_SPAN)
            .ok_or(HeapError::InvalidSize)?;

        let in_place = if header.fits(grown) {
            true
        } else if block.is_last_span(header.address(), header.capacity()) {
            let missing = grown - header.capacity();
            let extended = block.bump(missing).is_some();
            if extended {
                block.headers_mut()[slot].extend(missing);
            }
            extended
        } else {
            false
        };

        if in_place {
            block.headers_mut()[slot].grow(extra);
            // SAFETY: [ptr + old, ptr + grown) lies inside the slot's span,
            // which init's contract makes mapped and exclusively ours.
            unsafe { self.mapper.zero(ptr + old, extra) };
            return Ok(ptr);
        }

        let moved = self.alloc(grown)?;
        // SAFETY: both spans belong to live slots of this heap and, being
        // distinct slots, do not overlap.
        unsafe {
            self.mapper.copy(ptr, moved, old);
            self.mapper.zero(moved + old, extra);
        }
        self.retire(id, slot);
        Ok(moved)
    }

    /// Releases the allocation starting at `ptr`, zeroing its tracked bytes.
    ///
    /// # Errors
    /// - [`HeapError::NotEnabled`] before `init`.
    /// - [`HeapError::BadArgument`] for a null pointer.
    /// - [`HeapError::NotFound`] if `ptr` is not a live allocation, including
    ///   a second free of the same pointer.
    pub fn free(&mut self, ptr: usize) -> Result<(), HeapError> {
        if !self.enabled {
            return Err(HeapError::NotEnabled);
        }
        if ptr == 0 {
            return Err(HeapError::BadArgument);
        }

        let (id, slot) = self.find_live(ptr).ok_or(HeapError::NotFound)?;
        self.retire(id, slot);
        Ok(())
    }

    /// Zeroes a live slot's bytes and subtracts them from its tracked size.
    fn retire(&mut self, id: BlockId, slot: usize) {
        let Some(block) = self.chain.get_mut(id) else {
            return;
        };
        let header = block.headers()[slot];
        let len = header.size();
        block.headers_mut()[slot].release(len);
        // SAFETY: the span is owned by this slot; the tracked size never
        // exceeds the span except for poisoned slots, hence the clamp.
        unsafe {
            self.mapper
                .zero(header.address(), len.min(header.capacity()));
        }
    }

    /// Block and slot of the live allocation starting at `ptr`.
    fn find_live(&self, ptr: usize) -> Option<(BlockId, usize)> {
        self.chain.ids().find_map(|id| {
            self.chain
                .get(id)
                .and_then(|block| block.find_live(ptr))
                .map(|slot| (id, slot))
        })
    }

    /// Re-tags the base block once, before the first allocation.
    fn prime_base(&mut self) {
        if self.primed {
            return;
        }
        self.primed = true;

        let Some(base) = self.chain.base() else {
            return;
        };
        let Some(block) = self.chain.get_mut(base) else {
            return;
        };
        if let Err(slot) = block.prime() {
            let tag = block.headers()[slot].tag();
            self.fatal(HeapError::Corruption {
                block: base.index(),
                slot,
                tag,
            });
        }
    }

    /// Halts on the first header of `id` that lost its sentinel.
    fn verify(&self, id: BlockId) {
        if let Some((slot, tag)) = self.chain.get(id).and_then(Block::first_damaged) {
            self.fatal(HeapError::Corruption {
                block: id.index(),
                slot,
                tag,
            });
        }
    }

    fn fatal(&self, error: HeapError) -> ! {
        (self.fatal)(&error)
    }
}
