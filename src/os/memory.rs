//! UEFI memory-map scan, run once at boot to find RAM for the heap
//! (`config::KernelConfig::usable_memory_bytes`/`heap_size_bytes`).

use uefi::table::boot::MemoryType;
use uefi::table::{Boot, SystemTable};

#[derive(Copy, Clone)]
pub struct MemoryRegion {
    pub start: u64,
    pub size: u64,
}

const MAX_REGIONS: usize = 32;

static mut USABLE_REGIONS: [MemoryRegion; MAX_REGIONS] = [MemoryRegion { start: 0, size: 0 }; MAX_REGIONS];
static mut REGION_COUNT: usize = 0;

/// Scans the UEFI memory map and records every `CONVENTIONAL` (usable) RAM
/// region. Must run before `ExitBootServices`.
pub fn store_usable_memory_regions(system_table: &SystemTable<Boot>) {
    let bt = system_table.boot_services();

    const MAP_SIZE: usize = 4096 * 4;

    #[repr(C, align(8))]
    struct AlignedBuffer([u8; MAP_SIZE]);

    static mut MEMORY_MAP_BUFFER: AlignedBuffer = AlignedBuffer([0; MAP_SIZE]);

    let mem_map_size = bt.memory_map_size();
    let needed = mem_map_size.map_size + 8 * core::mem::size_of::<uefi::table::boot::MemoryDescriptor>();

    let buffer: &mut [u8] = unsafe { &mut MEMORY_MAP_BUFFER.0[..] };
    assert!(buffer.len() >= needed, "UEFI memory map buffer too small");

    let memory_map = bt.memory_map(buffer).expect("failed to retrieve UEFI memory map");

    unsafe {
        REGION_COUNT = 0;

        for desc in memory_map.entries() {
            if desc.ty != MemoryType::CONVENTIONAL {
                continue;
            }
            if REGION_COUNT >= MAX_REGIONS {
                break;
            }
            USABLE_REGIONS[REGION_COUNT] = MemoryRegion { start: desc.phys_start, size: desc.page_count * 4096 };
            REGION_COUNT += 1;
        }
    }
}

pub fn get_usable_memory_regions() -> &'static [MemoryRegion] {
    unsafe { &USABLE_REGIONS[..REGION_COUNT] }
}

/// Sum of every recorded region's size, for `KernelConfig::usable_memory_bytes`.
pub fn total_usable_bytes() -> u64 {
    get_usable_memory_regions().iter().map(|r| r.size).sum()
}

/// The largest single usable region, as a `(start, size)` pair — what the
/// heap allocator gets pointed at.
pub fn largest_region() -> Option<(u64, u64)> {
    get_usable_memory_regions().iter().map(|r| (r.start, r.size)).max_by_key(|&(_, size)| size)
}
