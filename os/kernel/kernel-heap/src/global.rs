//! # Global Kernel Heap
//!
//! [`KernelHeap`] puts a [`Heap`] behind a [`HeapLock`] so it can live in a
//! `static` and serve as the kernel's `#[global_allocator]`:
//!
//! ```rust,ignore
//! use kernel_heap::{KernelHeap, phys_mapper::HhdmPhysMapper};
//!
//! #[global_allocator]
//! static HEAP: KernelHeap<HhdmPhysMapper> = KernelHeap::new(HhdmPhysMapper);
//!
//! fn kernel_main(map: &kernel_info::boot::MemoryMap<'_>) {
//!     unsafe { HEAP.init(map) }.expect("kernel heap");
//! }
//! ```
//!
//! Every operation runs with the lock held and interrupts masked. Pointers
//! crossing the `GlobalAlloc` boundary are virtual; the heap itself deals in
//! physical addresses and converts through its [`PhysMapper`].
//!
//! ## Fatal conditions under `GlobalAlloc`
//!
//! Exhaustion and corruption reach the [`FatalHook`] from inside
//! `GlobalAlloc::alloc`, and a global allocator must not unwind. When the
//! heap is installed as `#[global_allocator]`, either build the kernel with
//! `panic = "abort"` (the usual setting for a bare-metal kernel profile) or
//! install a hook with [`KernelHeap::set_fatal_hook`] that halts the CPU
//! without panicking.

use crate::error::{FatalHook, HeapError};
use crate::heap::Heap;
use crate::lock::HeapLock;
use crate::phys_mapper::PhysMapper;
use crate::stats::HeapStats;
use core::alloc::{GlobalAlloc, Layout};
use core::ptr::null_mut;
use kernel_info::boot::MemoryMap;
use kernel_info::memory::{HEAP_ALIGN, HEAP_MAX_BLOCKS};

/// A [`Heap`] shared by the whole kernel.
///
/// The fatal hook must not unwind while this type serves as the global
/// allocator; see the module docs.
pub struct KernelHeap<M: PhysMapper, const BLOCKS: usize = HEAP_MAX_BLOCKS> {
    inner: HeapLock<Heap<M, BLOCKS>>,
}

impl<M: PhysMapper, const BLOCKS: usize> KernelHeap<M, BLOCKS> {
    /// A disabled heap reaching memory through `mapper`.
    pub const fn new(mapper: M) -> Self {
        Self {
            inner: HeapLock::new(Heap::new(mapper)),
        }
    }

    /// See [`Heap::init`].
    ///
    /// # Safety
    /// Same contract as [`Heap::init`].
    ///
    /// # Errors
    /// Same as [`Heap::init`].
    pub unsafe fn init(&self, map: &MemoryMap<'_>) -> Result<(), HeapError> {
        self.inner.with_lock(|heap| unsafe { heap.init(map) })
    }

    /// See [`Heap::set_fatal_hook`]. The hook must not unwind if this heap
    /// is the global allocator and the kernel is built with `panic = "unwind"`.
    pub fn set_fatal_hook(&self, hook: FatalHook) {
        self.inner.with_lock(|heap| heap.set_fatal_hook(hook));
    }

    /// See [`Heap::is_enabled`].
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.with_lock(|heap| heap.is_enabled())
    }

    /// See [`Heap::pool_start`].
    #[must_use]
    pub fn pool_start(&self) -> usize {
        self.inner.with_lock(|heap| heap.pool_start())
    }

    /// See [`Heap::pool_end`].
    #[must_use]
    pub fn pool_end(&self) -> usize {
        self.inner.with_lock(|heap| heap.pool_end())
    }

    /// See [`Heap::memory_size`].
    #[must_use]
    pub fn memory_size(&self) -> u64 {
        self.inner.with_lock(|heap| heap.memory_size())
    }

    /// See [`Heap::last_reservation`].
    #[must_use]
    pub fn last_reservation(&self) -> Option<(usize, usize)> {
        self.inner.with_lock(|heap| heap.last_reservation())
    }

    /// See [`Heap::stats`].
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        self.inner.with_lock(|heap| heap.stats())
    }

    /// See [`Heap::alloc`].
    ///
    /// # Errors
    /// Same as [`Heap::alloc`].
    pub fn alloc(&self, size: usize) -> Result<usize, HeapError> {
        self.inner.with_lock(|heap| heap.alloc(size))
    }

    /// See [`Heap::resize`].
    ///
    /// # Errors
    /// Same as [`Heap::resize`].
    pub fn resize(&self, ptr: usize, new_size: usize) -> Result<usize, HeapError> {
        self.inner.with_lock(|heap| heap.resize(ptr, new_size))
    }

    /// See [`Heap::free`].
    ///
    /// # Errors
    /// Same as [`Heap::free`].
    pub fn free(&self, ptr: usize) -> Result<(), HeapError> {
        self.inner.with_lock(|heap| heap.free(ptr))
    }
}

unsafe impl<M: PhysMapper, const BLOCKS: usize> GlobalAlloc for KernelHeap<M, BLOCKS> {
    /// Allocate at least `layout.size()` bytes aligned to at most 16.
    ///
    /// Exhaustion does not return null: it goes to the fatal hook, which must
    /// not unwind out of this function.
    ///
    /// # Safety
    /// The `GlobalAlloc` contract applies. Caller must handle a null return.
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > HEAP_ALIGN {
            return null_mut();
        }
        self.inner.with_lock(|heap| match heap.alloc(layout.size()) {
            Ok(pa) => unsafe { heap.mapper().phys_to_ptr(pa) },
            Err(_) => null_mut(),
        })
    }

    /// Release a block previously returned by `alloc`.
    ///
    /// # Safety
    /// The `GlobalAlloc` contract applies.
    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        if ptr.is_null() {
            return;
        }
        self.inner.with_lock(|heap| {
            let pa = heap.mapper().ptr_to_phys(ptr);
            if let Err(e) = heap.free(pa) {
                log::warn!("kernel heap: dealloc of {pa:#x} failed: {e}");
            }
        });
    }
}
