//! Kernel configuration.
//!
//! The original's equivalent is a `Kconfig`-generated header of compile-time
//! constants; there is no filesystem available before the block cache and
//! ext2 engine exist, so runtime configuration files are not an option this
//! early in boot. We keep the same shape: a handful of `const`s plus a
//! `KernelConfig` snapshot the UEFI entry point fills in from the memory
//! map and command line before handing control to the scheduler.

/// Timer ticks per second driving the scheduler's preemption clock.
pub const TIMER_TICKS_PER_SEC: u32 = 100;

/// Number of buckets in the inode hash table (§4.G).
pub const INODE_HASH_SIZE: usize = 512;

/// Maximum in-memory buffer pool size, in blocks (§4.F).
pub const BLOCK_CACHE_SIZE: usize = 1024;

/// Default maximum page count for a pipe ring (§4.I, §3 Pipe state).
pub const PIPE_DEFAULT_MAX_PAGES: usize = 16;

/// Page size in bytes used by the pipe ring and VM area bookkeeping.
pub const PAGE_SIZE: usize = 4096;

/// Highest signal number (1..=NSIG is the valid range, spec §3).
pub const NSIG: usize = 64;

/// Number of IDT vectors (32 CPU exceptions + 16 legacy PIC IRQ lines, plus
/// headroom for the syscall vector and software vectors).
pub const NUM_VECTORS: usize = 256;

/// Runtime configuration captured once at boot from the platform the kernel
/// is running under (UEFI memory map, disk geometry, etc).
#[derive(Debug, Clone, Copy)]
pub struct KernelConfig {
    /// Total usable RAM discovered from the UEFI memory map, in bytes.
    pub usable_memory_bytes: u64,
    /// Size, in bytes, handed to the global heap allocator.
    pub heap_size_bytes: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig {
            usable_memory_bytes: 0,
            heap_size_bytes: 8 * 1024 * 1024,
        }
    }
}
