use kernel_heap::phys_mapper::OffsetPhysMapper;
use kernel_heap::{Heap, HeapError};
use kernel_info::boot::{MemoryKind, MemoryMap, MemoryRegion};
use kernel_info::memory::{HEAP_ALIGN, HEAP_BLOCK_SPAN, HEAP_MAX_HEADERS, HEAP_SLOT_SIZE_CEILING};

const PHYS: usize = 0x10_0000;
const MIB: usize = 0x10_0000;
const SPAN: usize = HEAP_BLOCK_SPAN;

/// A heap over a host buffer that stands in for physical memory at `PHYS`.
struct Fixture<const BLOCKS: usize = 8> {
    memory: Vec<u8>,
    heap: Box<Heap<OffsetPhysMapper, BLOCKS>>,
}

impl Fixture {
    fn new(len: usize, regions: &[MemoryRegion]) -> Self {
        Self::build(len, regions)
    }

    /// One usable MiB at 1 MiB.
    fn one_mib() -> Self {
        Self::new(MIB, &[MemoryRegion::usable(PHYS as u64, MIB as u64)])
    }
}

impl<const BLOCKS: usize> Fixture<BLOCKS> {
    fn build(len: usize, regions: &[MemoryRegion]) -> Self {
        let mut memory = vec![0xEE; len];
        let mapper = OffsetPhysMapper::for_buffer(PHYS, memory.as_mut_ptr());
        let mut heap = Box::new(Heap::new(mapper));
        unsafe { heap.init(&MemoryMap::new(regions)) }.unwrap();
        Self { memory, heap }
    }

    fn bytes(&self, pa: usize, len: usize) -> &[u8] {
        &self.memory[pa - PHYS..][..len]
    }

    fn fill(&mut self, pa: usize, len: usize, byte: u8) {
        self.memory[pa - PHYS..][..len].fill(byte);
    }
}

#[test]
fn init_reports_pool_bounds() {
    let f = Fixture::one_mib();
    assert!(f.heap.is_enabled());
    assert_eq!(f.heap.pool_start(), 0x10_0000);
    assert_eq!(f.heap.pool_end(), 0x11_0000);
    assert_eq!(f.heap.memory_size(), MIB as u64);
    assert_eq!(f.heap.stats().blocks, 1);
}

#[test]
fn init_skips_regions_that_cannot_hold_a_block() {
    let regions = [
        MemoryRegion::new(PHYS as u64, SPAN as u64, MemoryKind::Reserved),
        MemoryRegion::usable((PHYS + SPAN) as u64, 0x1000),
        MemoryRegion::usable((PHYS + 2 * SPAN + 4) as u64, (SPAN + 12) as u64),
    ];
    let f = Fixture::new(4 * SPAN, &regions);
    assert_eq!(f.heap.pool_start(), PHYS + 2 * SPAN + HEAP_ALIGN);
    assert_eq!(f.heap.stats().blocks, 1);
}

#[test]
fn init_twice_is_rejected() {
    let mut f = Fixture::one_mib();
    let regions = [MemoryRegion::usable(PHYS as u64, MIB as u64)];
    let again = unsafe { f.heap.init(&MemoryMap::new(&regions)) };
    assert_eq!(again, Err(HeapError::AlreadyEnabled));
}

#[test]
fn init_without_usable_memory_fails() {
    let mut heap = Heap::<_, 2>::new(OffsetPhysMapper::identity());
    let regions = [
        MemoryRegion::new(0, 0x9_f000, MemoryKind::Reserved),
        MemoryRegion::usable(0x10_0000, 0x1000),
        MemoryRegion::new(0x20_0000, 0x100_0000, MemoryKind::AcpiNvs),
    ];
    let result = unsafe { heap.init(&MemoryMap::new(&regions)) };
    assert_eq!(result, Err(HeapError::NoUsableMemory));
    assert!(!heap.is_enabled());
}

#[test]
fn disabled_heap_refuses_every_operation() {
    let mut heap = Heap::<_, 2>::new(OffsetPhysMapper::identity());
    assert!(!heap.is_enabled());
    assert_eq!(heap.pool_start(), 0);
    assert_eq!(heap.pool_end(), 0);
    assert_eq!(heap.alloc(16), Err(HeapError::NotEnabled));
    assert_eq!(heap.resize(0x1000, 16), Err(HeapError::NotEnabled));
    assert_eq!(heap.free(0x1000), Err(HeapError::NotEnabled));
}

#[test]
fn alloc_returns_aligned_address_inside_pool() {
    let mut f = Fixture::one_mib();
    for size in [1, 15, 16, 17, 64, 100] {
        let ptr = f.heap.alloc(size).unwrap();
        assert_eq!(ptr % HEAP_ALIGN, 0);
        assert!(ptr >= f.heap.pool_start());
        assert!(ptr + size <= f.heap.pool_end());
    }
}

#[test]
fn alloc_rejects_invalid_sizes() {
    let mut f = Fixture::one_mib();
    assert_eq!(f.heap.alloc(0), Err(HeapError::InvalidSize));
    assert_eq!(f.heap.alloc(SPAN + 1), Err(HeapError::InvalidSize));
    assert_eq!(f.heap.alloc(usize::MAX), Err(HeapError::InvalidSize));
}

#[test]
fn free_zeroes_memory_and_slot_is_reused() {
    let mut f = Fixture::one_mib();
    let ptr = f.heap.alloc(64).unwrap();
    f.fill(ptr, 64, 0xAB);

    f.heap.free(ptr).unwrap();
    assert!(f.bytes(ptr, 64).iter().all(|&b| b == 0));

    assert_eq!(f.heap.alloc(48), Ok(ptr));
}

#[test]
fn free_rejects_bad_pointers() {
    let mut f = Fixture::one_mib();
    let ptr = f.heap.alloc(64).unwrap();

    assert_eq!(f.heap.free(0), Err(HeapError::BadArgument));
    assert_eq!(f.heap.free(ptr + 16), Err(HeapError::NotFound));
    assert_eq!(f.heap.free(0x4000_0000), Err(HeapError::NotFound));

    f.heap.free(ptr).unwrap();
    assert_eq!(f.heap.free(ptr), Err(HeapError::NotFound));
}

#[test]
fn live_allocations_never_overlap() {
    let mut f = Fixture::one_mib();
    let mut live: Vec<(usize, usize)> = Vec::new();

    for i in 0..600usize {
        let size = 1 + (i * 37) % 300;
        let ptr = f.heap.alloc(size).unwrap();
        live.push((ptr, size));
        if i % 3 == 2 {
            let (victim, _) = live.remove(i % live.len());
            f.heap.free(victim).unwrap();
        }
    }

    live.sort_unstable();
    for pair in live.windows(2) {
        let (a, a_len) = pair[0];
        let (b, _) = pair[1];
        assert!(a + a_len <= b, "{a:#x}+{a_len:#x} overlaps {b:#x}");
    }
    assert_eq!(f.heap.stats().live_allocations, live.len());
}

#[test]
fn exhausting_the_base_block_links_exactly_one_block() {
    let mut f = Fixture::one_mib();
    for _ in 0..HEAP_MAX_HEADERS {
        f.heap.alloc(16).unwrap();
    }
    assert_eq!(f.heap.stats().blocks, 1);

    let ptr = f.heap.alloc(16).unwrap();
    assert_eq!(f.heap.stats().blocks, 2);
    assert_eq!(ptr, PHYS + SPAN);
    assert_eq!(f.heap.pool_end(), PHYS + 2 * SPAN);
}

#[test]
fn second_region_becomes_the_high_block() {
    let regions = [
        MemoryRegion::usable(PHYS as u64, SPAN as u64),
        MemoryRegion::new((PHYS + SPAN) as u64, SPAN as u64, MemoryKind::Reserved),
        MemoryRegion::usable((PHYS + 2 * SPAN) as u64, (2 * SPAN) as u64),
    ];
    let mut f = Fixture::new(4 * SPAN, &regions);
    assert_eq!(f.heap.stats().blocks, 2);
    assert_eq!(f.heap.pool_end(), PHYS + 3 * SPAN);

    assert_eq!(f.heap.alloc(SPAN), Ok(PHYS));
    assert_eq!(f.heap.alloc(16), Ok(PHYS + 2 * SPAN));
    assert_eq!(f.heap.stats().blocks, 2);

    assert_eq!(f.heap.alloc(SPAN), Ok(PHYS + 3 * SPAN));
    assert_eq!(f.heap.stats().blocks, 3);
}

/// 1 MiB usable, a reserved gap, then one more usable block window.
fn large_base_small_high() -> [MemoryRegion; 3] {
    [
        MemoryRegion::usable(PHYS as u64, MIB as u64),
        MemoryRegion::new((PHYS + MIB) as u64, SPAN as u64, MemoryKind::Reserved),
        MemoryRegion::usable((PHYS + MIB + SPAN) as u64, SPAN as u64),
    ]
}

#[test]
fn base_region_keeps_feeding_growth_after_the_high_block() {
    let mut f = Fixture::<20>::build(MIB + 2 * SPAN, &large_base_small_high());
    assert_eq!(f.heap.memory_size(), (MIB + SPAN) as u64);

    assert_eq!(f.heap.alloc(SPAN), Ok(PHYS));
    assert_eq!(f.heap.alloc(SPAN), Ok(PHYS + MIB + SPAN));
    for i in 1..MIB / SPAN {
        assert_eq!(f.heap.alloc(SPAN), Ok(PHYS + i * SPAN));
    }

    assert_eq!(f.heap.stats().blocks, 1 + MIB / SPAN);
    assert_eq!(f.heap.pool_start(), PHYS);
    assert_eq!(f.heap.pool_end(), PHYS + MIB + 2 * SPAN);
}

#[test]
#[should_panic(expected = "out of memory")]
fn exhaustion_waits_for_every_region() {
    let mut f = Fixture::<20>::build(MIB + 2 * SPAN, &large_base_small_high());
    for _ in 0..=MIB / SPAN {
        f.heap.alloc(SPAN).unwrap();
    }
    let _ = f.heap.alloc(SPAN);
}

#[test]
fn regions_after_the_second_feed_growth_in_map_order() {
    let regions = [
        MemoryRegion::usable(PHYS as u64, SPAN as u64),
        MemoryRegion::new((PHYS + SPAN) as u64, SPAN as u64, MemoryKind::Reserved),
        MemoryRegion::usable((PHYS + 2 * SPAN) as u64, SPAN as u64),
        MemoryRegion::new((PHYS + 3 * SPAN) as u64, SPAN as u64, MemoryKind::AcpiReclaimable),
        MemoryRegion::usable((PHYS + 4 * SPAN) as u64, (2 * SPAN) as u64),
    ];
    let mut f = Fixture::new(6 * SPAN, &regions);
    assert_eq!(f.heap.stats().blocks, 2);
    assert_eq!(f.heap.chain().region_count(), 3);

    assert_eq!(f.heap.alloc(SPAN), Ok(PHYS));
    assert_eq!(f.heap.alloc(SPAN), Ok(PHYS + 2 * SPAN));
    assert_eq!(f.heap.alloc(SPAN), Ok(PHYS + 4 * SPAN));
    assert_eq!(f.heap.alloc(SPAN), Ok(PHYS + 5 * SPAN));

    assert_eq!(f.heap.stats().blocks, 4);
    assert_eq!(f.heap.pool_end(), PHYS + 6 * SPAN);
}

#[test]
fn growing_past_the_size_ceiling_poisons_the_slot_until_freed() {
    let mut f = Fixture::one_mib();
    let ptr = f.heap.alloc(HEAP_SLOT_SIZE_CEILING).unwrap();
    assert_eq!(f.heap.resize(ptr, 16), Ok(ptr));

    f.heap.alloc(16).unwrap();
    f.heap.alloc(16).unwrap();
    let stats = f.heap.stats();
    assert_eq!(stats.poisoned_slots, 1);
    assert_eq!(stats.live_allocations, 3);

    f.heap.free(ptr).unwrap();
    assert_eq!(f.heap.alloc(32), Ok(ptr));
    assert_eq!(f.heap.stats().poisoned_slots, 1);
}

#[test]
#[should_panic(expected = "out of memory")]
fn exhausting_every_region_is_fatal() {
    let mut f = Fixture::new(SPAN, &[MemoryRegion::usable(PHYS as u64, SPAN as u64)]);
    f.heap.alloc(SPAN).unwrap();
    let _ = f.heap.alloc(16);
}

fn quiet_halt(error: &HeapError) -> ! {
    panic!("halted: {error}");
}

#[test]
#[should_panic(expected = "halted: out of memory")]
fn installed_hook_sees_fatal_errors() {
    let mut f = Fixture::new(SPAN, &[MemoryRegion::usable(PHYS as u64, SPAN as u64)]);
    f.heap.set_fatal_hook(quiet_halt);
    f.heap.alloc(SPAN).unwrap();
    let _ = f.heap.alloc(16);
}

#[test]
fn resize_in_place_zeroes_added_bytes() {
    let mut f = Fixture::one_mib();
    let ptr = f.heap.alloc(32).unwrap();
    f.fill(ptr, 32, 0x11);

    assert_eq!(f.heap.resize(ptr, 16), Ok(ptr));
    assert!(f.bytes(ptr, 32).iter().all(|&b| b == 0x11));
    assert!(f.bytes(ptr + 32, 16).iter().all(|&b| b == 0));
    assert_eq!(f.heap.stats().bytes_in_use, 48);
}

#[test]
fn resize_relocation_preserves_contents() {
    let mut f = Fixture::one_mib();
    let ptr = f.heap.alloc(32).unwrap();
    let fence = f.heap.alloc(32).unwrap();
    let pattern: Vec<u8> = (1..=32).collect();
    f.memory[ptr - PHYS..][..32].copy_from_slice(&pattern);

    let moved = f.heap.resize(ptr, 64).unwrap();
    assert_ne!(moved, ptr);
    assert_ne!(moved, fence);
    assert_eq!(f.bytes(moved, 32), pattern.as_slice());
    assert!(f.bytes(moved + 32, 64).iter().all(|&b| b == 0));

    assert!(f.bytes(ptr, 32).iter().all(|&b| b == 0));
    assert_eq!(f.heap.free(ptr), Err(HeapError::NotFound));
    assert_eq!(f.heap.stats().live_allocations, 2);
}

#[test]
fn resize_rejects_bad_arguments() {
    let mut f = Fixture::one_mib();
    let ptr = f.heap.alloc(32).unwrap();
    assert_eq!(f.heap.resize(0, 16), Err(HeapError::BadArgument));
    assert_eq!(f.heap.resize(ptr, 0), Err(HeapError::BadArgument));
    assert_eq!(f.heap.resize(ptr + 16, 16), Err(HeapError::NotFound));
    assert_eq!(f.heap.resize(ptr, SPAN), Err(HeapError::InvalidSize));
}

#[test]
fn stats_track_live_and_reserved_bytes() {
    let mut f = Fixture::one_mib();
    let a = f.heap.alloc(10).unwrap();
    f.heap.alloc(40).unwrap();
    f.heap.free(a).unwrap();

    let stats = f.heap.stats();
    assert_eq!(stats.live_allocations, 1);
    assert_eq!(stats.bytes_in_use, 48);
    assert_eq!(stats.bytes_reserved, 64);
    assert_eq!(stats.poisoned_slots, 0);
    assert_eq!(f.heap.last_reservation().map(|(_, len)| len), Some(48));
}
