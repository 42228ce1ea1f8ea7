//! Heap statistics.

use core::fmt;

/// Snapshot of the heap's bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Usable bytes advertised by the memory map (diagnostic only).
    pub memory_size: u64,
    /// Blocks currently linked into the chain.
    pub blocks: usize,
    /// Slots holding a live allocation.
    pub live_allocations: usize,
    /// Sum of the tracked sizes of live slots.
    pub bytes_in_use: usize,
    /// Bytes of block windows assigned to slots, live or free.
    pub bytes_reserved: usize,
    /// Slots poisoned because their tracked size exceeded the ceiling.
    pub poisoned_slots: usize,
}

impl fmt::Display for HeapStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "kernel heap")?;
        writeln!(f, "~~~~~~~~~~~")?;
        writeln!(f, "Memory size:     0x{:x}", self.memory_size)?;
        writeln!(f, "Blocks:          {}", self.blocks)?;
        writeln!(f, "Live slots:      {}", self.live_allocations)?;
        writeln!(f, "Bytes in use:    0x{:x}", self.bytes_in_use)?;
        writeln!(f, "Bytes reserved:  0x{:x}", self.bytes_reserved)?;
        writeln!(f, "Poisoned slots:  {}", self.poisoned_slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_lists_every_counter() {
        let stats = HeapStats {
            memory_size: 0x10_0000,
            blocks: 2,
            live_allocations: 3,
            bytes_in_use: 0x30,
            bytes_reserved: 0x40,
            poisoned_slots: 0,
        };
        let text = stats.to_string();
        assert!(text.contains("Memory size:     0x100000"));
        assert!(text.contains("Blocks:          2"));
        assert!(text.contains("Live slots:      3"));
        assert!(text.contains("Bytes reserved:  0x40"));
    }
}
