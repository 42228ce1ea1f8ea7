//! # Physical Memory Access for the Heap
//!
//! The heap hands out physical addresses, but zeroing freed memory and moving
//! data during a resize requires dereferencing them. [`PhysMapper`] converts a
//! physical address into a pointer in the current virtual address space; the
//! strategy depends on where the heap runs:
//!
//! - [`HhdmPhysMapper`]: kernels with a higher-half direct map, `va = HHDM_BASE + pa`.
//! - [`OffsetPhysMapper`]: any fixed offset. Offset `0` is an identity map;
//!   hosted tests point the offset at an ordinary buffer.
//!
//! ## Example
//! ```rust
//! use kernel_heap::phys_mapper::{OffsetPhysMapper, PhysMapper};
//!
//! let mut backing = vec![0xAAu8; 64];
//! let mapper = OffsetPhysMapper::for_buffer(0x1000, backing.as_mut_ptr());
//! unsafe { mapper.zero(0x1008, 8) };
//! assert_eq!(&backing[8..16], &[0; 8]);
//! assert_eq!(backing[16], 0xAA);
//! ```

use core::ptr;
use kernel_info::memory::HHDM_BASE;

/// Converts physical heap addresses into dereferenceable pointers.
pub trait PhysMapper {
    /// Returns a pointer through which `pa` can be read and written.
    ///
    /// # Safety
    /// `pa` must be backed by memory that is mapped under this mapper's
    /// strategy for as long as the pointer is used.
    unsafe fn phys_to_ptr(&self, pa: usize) -> *mut u8;

    /// The physical address behind a pointer returned by
    /// [`phys_to_ptr`](Self::phys_to_ptr).
    fn ptr_to_phys(&self, ptr: *const u8) -> usize;

    /// Zero `len` bytes starting at `pa`.
    ///
    /// # Safety
    /// `[pa, pa + len)` must be mapped, writable and not shared with live
    /// references.
    unsafe fn zero(&self, pa: usize, len: usize) {
        if len == 0 {
            return;
        }
        unsafe { ptr::write_bytes(self.phys_to_ptr(pa), 0, len) }
    }

    /// Copy `len` bytes from `src` to `dst`.
    ///
    /// # Safety
    /// Both ranges must be mapped, `dst` writable, and the ranges must not
    /// overlap.
    unsafe fn copy(&self, src: usize, dst: usize, len: usize) {
        if len == 0 {
            return;
        }
        unsafe { ptr::copy_nonoverlapping(self.phys_to_ptr(src), self.phys_to_ptr(dst), len) }
    }
}

/// [`PhysMapper`] for kernels with a higher-half direct map (HHDM).
///
/// # Safety
/// - The HHDM mapping must be present and cover the heap's regions.
#[derive(Debug, Default, Copy, Clone)]
pub struct HhdmPhysMapper;

impl PhysMapper for HhdmPhysMapper {
    #[allow(clippy::cast_possible_truncation)]
    unsafe fn phys_to_ptr(&self, pa: usize) -> *mut u8 {
        (HHDM_BASE as usize).wrapping_add(pa) as *mut u8
    }

    #[allow(clippy::cast_possible_truncation)]
    fn ptr_to_phys(&self, ptr: *const u8) -> usize {
        (ptr as usize).wrapping_sub(HHDM_BASE as usize)
    }
}

/// [`PhysMapper`] that adds a fixed (wrapping) offset to every address.
#[derive(Debug, Default, Copy, Clone)]
pub struct OffsetPhysMapper {
    offset: usize,
}

impl OffsetPhysMapper {
    #[must_use]
    pub const fn new(offset: usize) -> Self {
        Self { offset }
    }

    /// Identity mapping: physical and virtual addresses coincide.
    #[must_use]
    pub const fn identity() -> Self {
        Self::new(0)
    }

    /// Maps physical `phys_base` onto `buffer`.
    ///
    /// Used to run the heap over ordinary memory, e.g. in hosted tests.
    #[must_use]
    pub fn for_buffer(phys_base: usize, buffer: *mut u8) -> Self {
        Self::new((buffer as usize).wrapping_sub(phys_base))
    }

    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }
}

impl PhysMapper for OffsetPhysMapper {
    unsafe fn phys_to_ptr(&self, pa: usize) -> *mut u8 {
        pa.wrapping_add(self.offset) as *mut u8
    }

    fn ptr_to_phys(&self, ptr: *const u8) -> usize {
        (ptr as usize).wrapping_sub(self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_mapper_translates_into_buffer() {
        let mut backing = [0u8; 32];
        let base = backing.as_mut_ptr();
        let mapper = OffsetPhysMapper::for_buffer(0x20_0000, base);
        let ptr = unsafe { mapper.phys_to_ptr(0x20_0004) };
        assert_eq!(ptr, base.wrapping_add(4));
        assert_eq!(mapper.ptr_to_phys(ptr), 0x20_0004);
    }

    #[test]
    fn copy_moves_bytes_between_physical_ranges() {
        let mut backing = [0u8; 32];
        backing[..4].copy_from_slice(&[1, 2, 3, 4]);
        let mapper = OffsetPhysMapper::for_buffer(0x1000, backing.as_mut_ptr());
        unsafe { mapper.copy(0x1000, 0x1010, 4) };
        assert_eq!(&backing[16..20], &[1, 2, 3, 4]);
    }

    #[test]
    fn identity_mapper_has_no_offset() {
        assert_eq!(OffsetPhysMapper::identity().offset(), 0);
    }

    #[test]
    fn hhdm_mapper_round_trips() {
        let ptr = unsafe { HhdmPhysMapper.phys_to_ptr(0x1000) };
        assert_eq!(ptr as usize, HHDM_BASE as usize + 0x1000);
        assert_eq!(HhdmPhysMapper.ptr_to_phys(ptr), 0x1000);
    }
}
