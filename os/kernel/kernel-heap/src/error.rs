//! # Heap Errors and the Fatal Path

/// Errors produced by the kernel heap.
///
/// [`OutOfMemory`](HeapError::OutOfMemory) and
/// [`Corruption`](HeapError::Corruption) are fatal: the heap hands them to its
/// [`FatalHook`] and never returns them to a caller. [`Unavailable`](HeapError::Unavailable)
/// and [`AlreadyLinked`](HeapError::AlreadyLinked) are resolved inside the
/// allocator by growing or walking the block chain.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeapError {
    #[error("the kernel heap is not enabled")]
    NotEnabled,
    #[error("invalid allocation size")]
    InvalidSize,
    #[error("bad argument")]
    BadArgument,
    #[error("no free header slot in block")]
    Unavailable,
    #[error("out of memory")]
    OutOfMemory,
    #[error(
        "possible memory corruption detected in the kernel heap (block {block}, slot {slot}, tag {tag:#x})"
    )]
    Corruption { block: usize, slot: usize, tag: u32 },
    #[error("the kernel heap is already enabled")]
    AlreadyEnabled,
    #[error("block already has a successor")]
    AlreadyLinked,
    #[error("pointer was not allocated by the kernel heap")]
    NotFound,
    #[error("the memory map contains no usable region large enough for a heap block")]
    NoUsableMemory,
    #[error("invalid block reference")]
    NullBlock,
}

impl HeapError {
    /// Whether the error must halt the kernel instead of being returned.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::OutOfMemory | Self::Corruption { .. })
    }
}

/// Handler for unrecoverable heap conditions.
///
/// The kernel decides what halting means: spinning with interrupts off,
/// raising a trap, or (in a hosted test) panicking.
pub type FatalHook = fn(&HeapError) -> !;

/// Default [`FatalHook`]: logs the condition and panics.
///
/// A kernel's panic handler turns this into a halt.
pub fn halt(error: &HeapError) -> ! {
    log::error!("kernel heap: {error}; aborting");
    panic!("kernel heap: {error}");
}
