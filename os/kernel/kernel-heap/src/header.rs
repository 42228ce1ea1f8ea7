//! # Block Header Index
//!
//! Every heap block carries a fixed table of [`HEAP_MAX_HEADERS`] headers. A
//! header describes one allocation slot:
//!
//! ```text
//! +---------+-------------------------------------+------+----------+
//! | address | meta: tag (32) | used | poisoned    | size | capacity |
//! +---------+-------------------------------------+------+----------+
//! ```
//!
//! - `address` and `capacity` are assigned once, by the block's bump cursor,
//!   and survive `free` so that the slot can be reused in place.
//! - `size` is the tracked byte count; it is zero exactly when the slot is free.
//! - `poisoned` marks a slot whose tracked size went over the ceiling. It is
//!   cleared when the owner releases the slot.
//! - The tag must always equal [`HEAP_HEADER_MAGIC`] once the block has been
//!   initialized. Anything else means the table was overwritten.

use bitfield_struct::bitfield;
use kernel_info::memory::{HEAP_HEADER_MAGIC, HEAP_MAX_HEADERS};

/// Packed tag and state word of a [`BlockHeader`].
#[bitfield(u64, order = Lsb)]
#[derive(PartialEq, Eq)]
pub struct HeaderMeta {
    /// Bits 0..32: corruption-check tag.
    #[bits(32)]
    pub tag: u32,

    /// Bit 32: the slot denotes a live (or poisoned) allocation.
    pub used: bool,

    /// Bit 33: the slot went over the size ceiling and was poisoned.
    pub poisoned: bool,

    /// Bits 34..64: reserved, zero.
    #[bits(30)]
    __: u32,
}

/// Metadata for one allocation slot.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    address: usize,
    meta: HeaderMeta,
    size: usize,
    capacity: usize,
}

impl BlockHeader {
    /// A header that has not been initialized yet (no tag).
    pub const BLANK: Self = Self {
        address: 0,
        meta: HeaderMeta::new(),
        size: 0,
        capacity: 0,
    };

    /// A free, never-assigned header carrying the sentinel tag.
    pub const FRESH: Self = Self {
        address: 0,
        meta: HeaderMeta::new().with_tag(HEAP_HEADER_MAGIC),
        size: 0,
        capacity: 0,
    };

    /// Start of the span owned by this slot; `0` until assigned.
    #[inline]
    #[must_use]
    pub const fn address(&self) -> usize {
        self.address
    }

    /// Tracked byte count of the allocation.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Length of the owned span. Never shrinks.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// The corruption-check tag as stored.
    #[inline]
    #[must_use]
    pub const fn tag(&self) -> u32 {
        self.meta.tag()
    }

    /// Whether the slot holds a live or poisoned allocation.
    #[inline]
    #[must_use]
    pub const fn is_used(&self) -> bool {
        self.meta.used()
    }

    /// Whether the slot was poisoned and has not been released since.
    #[inline]
    #[must_use]
    pub const fn is_poisoned(&self) -> bool {
        self.meta.poisoned()
    }

    /// Whether the tag still carries the sentinel.
    #[inline]
    #[must_use]
    pub const fn is_intact(&self) -> bool {
        self.meta.tag() == HEAP_HEADER_MAGIC
    }

    /// Whether the slot owns a span of its block's window.
    #[inline]
    #[must_use]
    pub const fn is_assigned(&self) -> bool {
        self.capacity != 0
    }

    /// Whether `len` bytes fit into the span this slot already owns.
    #[inline]
    #[must_use]
    pub const fn fits(&self, len: usize) -> bool {
        self.is_assigned() && len <= self.capacity
    }

    /// Writes the sentinel tag.
    #[inline]
    pub fn stamp(&mut self) {
        self.meta.set_tag(HEAP_HEADER_MAGIC);
    }

    /// Assigns a span of the block's window to this slot.
    #[inline]
    pub fn assign(&mut self, address: usize, capacity: usize) {
        self.address = address;
        self.capacity = capacity;
    }

    /// Grows the owned span in place (the slot must be the last bump span).
    #[inline]
    pub fn extend(&mut self, extra: usize) {
        self.capacity += extra;
    }

    /// Marks the slot live and adds `len` to the tracked size.
    #[inline]
    pub fn occupy(&mut self, len: usize) {
        self.size += len;
        self.meta.set_used(true);
        self.meta.set_tag(HEAP_HEADER_MAGIC);
    }

    /// Adds `len` to the tracked size of a live slot.
    #[inline]
    pub fn grow(&mut self, len: usize) {
        self.size += len;
    }

    /// Subtracts `len` from the tracked size; the slot becomes free, and
    /// loses any poison mark, at zero.
    #[inline]
    pub fn release(&mut self, len: usize) {
        self.size = self.size.saturating_sub(len);
        if self.size == 0 {
            self.meta.set_used(false);
            self.meta.set_poisoned(false);
        }
    }

    /// Marks the slot used and poisoned.
    #[inline]
    pub fn poison(&mut self) {
        self.meta.set_used(true);
        self.meta.set_poisoned(true);
    }

    #[cfg(test)]
    pub(crate) fn set_tag(&mut self, tag: u32) {
        self.meta.set_tag(tag);
    }

    #[cfg(test)]
    pub(crate) fn set_size(&mut self, size: usize) {
        self.size = size;
    }
}

/// The header table embedded in every block.
pub type HeaderTable = [BlockHeader; HEAP_MAX_HEADERS];
