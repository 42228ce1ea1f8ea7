//! # Memory Layout

/// A simple Higher Half Direct Map (HHDM) base.
/// Anything you map at [`HHDM_BASE`] + `pa` lets the kernel
/// access physical memory via a fixed offset.
pub const HHDM_BASE: u64 = 0xffff_8880_0000_0000;

/// Number of allocation header slots in every heap block.
pub const HEAP_MAX_HEADERS: usize = 512;

/// Sentinel written into every heap header when its block is initialized.
///
/// A header carrying any other value has been overwritten from outside the
/// allocator.
pub const HEAP_HEADER_MAGIC: u32 = 0x00AA_5577;

/// Tracked slot sizes above this ceiling are treated as an accounting anomaly
/// and the slot is poisoned instead of being reused.
pub const HEAP_SLOT_SIZE_CEILING: usize = 4 * 1024;

/// Granularity of every heap reservation.
pub const HEAP_ALIGN: usize = 16;

/// Bytes of physical memory each heap block hands out from.
pub const HEAP_BLOCK_SPAN: usize = 64 * 1024;

/// Default number of blocks a kernel heap can chain together.
pub const HEAP_MAX_BLOCKS: usize = 32;

const _: () = {
    assert!(HEAP_ALIGN.is_power_of_two());
    assert!(HEAP_BLOCK_SPAN.is_multiple_of(4096));
    assert!(HEAP_BLOCK_SPAN >= HEAP_MAX_HEADERS * HEAP_ALIGN);
    assert!(HEAP_SLOT_SIZE_CEILING <= HEAP_BLOCK_SPAN);
    assert!(HEAP_MAX_BLOCKS > 0);
};
