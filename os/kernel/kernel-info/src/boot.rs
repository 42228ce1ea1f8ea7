//! # Boot Memory Map

/// Classification of a physical memory region as reported by the bootloader.
///
/// Only [`MemoryKind::Usable`] regions may be handed to the kernel heap; every
/// other kind is owned by firmware, devices or the loaded kernel image.
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MemoryKind {
    /// Free RAM, available to the kernel.
    Usable = 0,
    /// Reserved by firmware or hardware; never touch.
    Reserved = 1,
    /// ACPI tables; reclaimable once they have been parsed.
    AcpiReclaimable = 2,
    /// ACPI non-volatile storage; must be preserved across sleep states.
    AcpiNvs = 3,
    /// Memory reported as defective.
    BadMemory = 4,
    /// Used by the bootloader; reclaimable after the handoff is complete.
    BootloaderReclaimable = 5,
    /// The kernel image and boot modules.
    KernelAndModules = 6,
    /// Linear framebuffer.
    Framebuffer = 7,
}

/// One entry of the boot memory map.
///
/// Keep this `#[repr(C)]`; the bootloader writes these entries directly.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MemoryRegion {
    /// Physical start address of the region.
    pub base: u64,
    /// Length of the region in **bytes**.
    pub length: u64,
    /// What the region may be used for.
    pub kind: MemoryKind,
}

impl MemoryRegion {
    #[must_use]
    pub const fn new(base: u64, length: u64, kind: MemoryKind) -> Self {
        Self { base, length, kind }
    }

    /// Shorthand for a [`MemoryKind::Usable`] region.
    #[must_use]
    pub const fn usable(base: u64, length: u64) -> Self {
        Self::new(base, length, MemoryKind::Usable)
    }

    #[must_use]
    pub const fn is_usable(&self) -> bool {
        matches!(self.kind, MemoryKind::Usable)
    }

    /// One past the last byte of the region, saturating at `u64::MAX`.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base.saturating_add(self.length)
    }
}

/// Ordered view over the boot memory map.
///
/// The map is borrowed, not copied: consumers walk it once during
/// initialization and keep only what they derive from it.
#[derive(Debug, Copy, Clone)]
pub struct MemoryMap<'a> {
    entries: &'a [MemoryRegion],
}

impl<'a> MemoryMap<'a> {
    /// Wraps the entries reported by the bootloader, in its order.
    #[must_use]
    pub const fn new(entries: &'a [MemoryRegion]) -> Self {
        Self { entries }
    }

    /// Number of entries of any kind.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Usable regions in bootloader order. Zero-length entries are skipped.
    pub fn usable(&self) -> impl Iterator<Item = &'a MemoryRegion> + 'a {
        self.entries
            .iter()
            .filter(|region| region.is_usable() && region.length > 0)
    }

    /// Sum of the lengths of all usable regions.
    #[must_use]
    pub fn usable_bytes(&self) -> u64 {
        self.usable()
            .fold(0u64, |total, region| total.saturating_add(region.length))
    }
}
