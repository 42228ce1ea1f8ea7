//! # Kernel Boot and Memory Configuration
//!
//! Shared definitions that the bootloader, the kernel and the kernel heap must
//! agree on.
//!
//! ## Modules
//!
//! ### Boot Memory Map ([`boot`])
//! The bootloader reports physical memory as an ordered list of
//! [`MemoryRegion`](boot::MemoryRegion)s, each tagged with a
//! [`MemoryKind`](boot::MemoryKind). The kernel heap walks the usable entries
//! once during initialization:
//!
//! ```text
//! 0x0000_0000 ┌──────────────────────────┐
//!             │ Reserved (BIOS, VGA)     │
//! 0x0010_0000 ├──────────────────────────┤
//!             │ Usable  ◄── heap base    │
//!             ├──────────────────────────┤
//!             │ Reserved / ACPI          │
//!             ├──────────────────────────┤
//!             │ Usable  ◄── heap high    │
//!             └──────────────────────────┘
//! ```
//!
//! ### Memory Layout ([`memory`])
//! Compile-time constants: the higher-half direct map base and the geometry
//! of the kernel heap (header count, block span, alignment, sentinel).
//! Invalid combinations are rejected by `const` assertions.
//!
//! ## Usage
//!
//! ```rust
//! use kernel_info::boot::{MemoryKind, MemoryMap, MemoryRegion};
//!
//! let entries = [
//!     MemoryRegion::new(0x0, 0x9_f000, MemoryKind::Reserved),
//!     MemoryRegion::usable(0x10_0000, 0x10_0000),
//! ];
//! let map = MemoryMap::new(&entries);
//! assert_eq!(map.usable().count(), 1);
//! assert_eq!(map.usable_bytes(), 0x10_0000);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
