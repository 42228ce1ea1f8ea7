//! # Kernel Heap
//!
//! A `no_std` heap for the kernel's dynamic memory. It is brought up once from
//! the boot memory map and then serves variable-sized requests out of a chain
//! of fixed-capacity blocks.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │            KernelHeap (global, GlobalAlloc)         │
//! │    • HeapLock around the whole engine               │
//! │    • Interrupts masked while held                   │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │                  Heap (engine)                      │
//! │    • alloc / resize / free                          │
//! │    • Tag verification, poisoning, fatal hook        │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │          BlockChain ─► Block ─► BlockHeader         │
//! │    • 512 headers per block, bump-carved window      │
//! │    • Linear doubly linked chain, grows on demand    │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │                  PhysMapper                         │
//! │    • Physical address to pointer (HHDM or offset)   │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Components
//!
//! - [`header`]: the per-allocation record with its sentinel tag.
//! - [`block`]: one block of headers plus the window it carves from.
//! - [`chain`]: the arena that links blocks and grows the heap.
//! - [`lock`]: the reservation flag and the spin lock used by [`KernelHeap`].
//! - [`heap`]: the allocator engine.
//! - [`global`]: the shared, `GlobalAlloc`-capable wrapper.
//! - [`error`]: [`HeapError`] and the fatal path.
//!
//! ## Usage
//!
//! ```rust
//! use kernel_heap::{Heap, HeapError, phys_mapper::OffsetPhysMapper};
//! use kernel_info::boot::{MemoryMap, MemoryRegion};
//!
//! let mut backing = vec![0u8; 0x2_0000];
//! let mapper = OffsetPhysMapper::for_buffer(0x10_0000, backing.as_mut_ptr());
//! let regions = [MemoryRegion::usable(0x10_0000, 0x2_0000)];
//!
//! let mut heap = Heap::<_, 2>::new(mapper);
//! unsafe { heap.init(&MemoryMap::new(&regions)) }.unwrap();
//!
//! let ptr = heap.alloc(100).unwrap();
//! assert!(ptr >= heap.pool_start() && ptr < heap.pool_end());
//! heap.free(ptr).unwrap();
//! assert_eq!(heap.free(ptr), Err(HeapError::NotFound));
//! ```
//!
//! ## Failure Model
//!
//! Misuse is reported through `Result`. Exhaustion and header corruption are
//! not recoverable: they go to the installed [`FatalHook`], which never
//! returns. The default hook, [`halt`], logs and panics.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod block;
pub mod chain;
pub mod error;
pub mod global;
pub mod header;
pub mod heap;
pub mod lock;
pub mod phys_mapper;
pub mod stats;

pub use block::{Block, BlockId};
pub use chain::BlockChain;
pub use error::{FatalHook, HeapError, halt};
pub use global::KernelHeap;
pub use header::BlockHeader;
pub use heap::Heap;
pub use phys_mapper::PhysMapper;
pub use stats::HeapStats;
