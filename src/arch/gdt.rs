//! Global Descriptor Table: flat kernel/user code and data segments plus a
//! TSS, so interrupts taken from ring 3 land on a known kernel stack.

use core::mem::size_of;

const GDT_ENTRIES: usize = 7;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct GdtEntry {
    limit_low: u16,
    base_low: u16,
    base_mid: u8,
    access: u8,
    granularity: u8,
    base_high: u8,
}

impl GdtEntry {
    const fn null() -> Self {
        GdtEntry {
            limit_low: 0,
            base_low: 0,
            base_mid: 0,
            access: 0,
            granularity: 0,
            base_high: 0,
        }
    }

    const fn flat(access: u8, granularity: u8) -> Self {
        GdtEntry {
            limit_low: 0xffff,
            base_low: 0,
            base_mid: 0,
            access,
            granularity,
            base_high: 0,
        }
    }
}

#[repr(C, packed)]
struct TssDescriptorLow {
    limit_low: u16,
    base_low: u16,
    base_mid: u8,
    access: u8,
    granularity: u8,
    base_high: u8,
}

/// Segment selectors, indices into the GDT (spec §4.B: "return-to-user
/// epilogue" reloads these on the way back to ring 3).
pub mod selector {
    pub const KERNEL_CODE: u16 = 1 << 3;
    pub const KERNEL_DATA: u16 = 2 << 3;
    pub const USER_CODE: u16 = 3 << 3 | 3;
    pub const USER_DATA: u16 = 4 << 3 | 3;
    pub const TSS: u16 = 5 << 3;
}

#[repr(C, packed)]
pub struct Tss {
    reserved0: u32,
    pub rsp0: u64,
    rsp1: u64,
    rsp2: u64,
    reserved1: u64,
    ist: [u64; 7],
    reserved2: u64,
    reserved3: u16,
    iomap_base: u16,
}

impl Tss {
    const fn new() -> Self {
        Tss {
            reserved0: 0,
            rsp0: 0,
            rsp1: 0,
            rsp2: 0,
            reserved1: 0,
            ist: [0; 7],
            reserved2: 0,
            reserved3: 0,
            iomap_base: size_of::<Tss>() as u16,
        }
    }
}

static mut TSS: Tss = Tss::new();
static mut GDT: [GdtEntry; GDT_ENTRIES] = [GdtEntry::null(); GDT_ENTRIES];

#[repr(C, packed)]
struct DescriptorTablePointer {
    limit: u16,
    base: u64,
}

/// Set the kernel stack the CPU switches to on a ring3->ring0 interrupt.
/// Called by the scheduler whenever it switches `current` (spec §4.D: each
/// task owns its own kernel stack).
pub fn set_kernel_stack(rsp0: u64) {
    unsafe {
        TSS.rsp0 = rsp0;
    }
}

#[cfg(all(not(test), target_arch = "x86_64"))]
pub fn init() {
    use core::arch::asm;

    unsafe {
        GDT[0] = GdtEntry::null();
        GDT[1] = GdtEntry::flat(0x9a, 0xaf); // kernel code, long mode
        GDT[2] = GdtEntry::flat(0x92, 0xcf); // kernel data
        GDT[3] = GdtEntry::flat(0xfa, 0xaf); // user code
        GDT[4] = GdtEntry::flat(0xf2, 0xcf); // user data

        let tss_base = core::ptr::addr_of!(TSS) as u64;
        let tss_limit = (size_of::<Tss>() - 1) as u32;
        let low = &mut *(core::ptr::addr_of_mut!(GDT[5]) as *mut TssDescriptorLow);
        low.limit_low = tss_limit as u16;
        low.base_low = tss_base as u16;
        low.base_mid = (tss_base >> 16) as u8;
        low.access = 0x89; // present, 64-bit TSS available
        low.granularity = ((tss_limit >> 16) & 0x0f) as u8;
        low.base_high = (tss_base >> 24) as u8;
        // high 32 bits of the base occupy GDT[6] for a 64-bit TSS descriptor.
        let high = core::ptr::addr_of_mut!(GDT[6]) as *mut u32;
        *high = (tss_base >> 32) as u32;

        let pointer = DescriptorTablePointer {
            limit: (size_of::<[GdtEntry; GDT_ENTRIES]>() - 1) as u16,
            base: core::ptr::addr_of!(GDT) as u64,
        };
        asm!("lgdt [{}]", in(reg) &pointer, options(readonly, nostack, preserves_flags));
        asm!(
            "push {sel}",
            "lea {tmp}, [2f + rip]",
            "push {tmp}",
            "retfq",
            "2:",
            sel = in(reg) selector::KERNEL_CODE as u64,
            tmp = lateout(reg) _,
        );
        asm!("mov ax, {0:x}", "mov ds, ax", "mov es, ax", "mov ss, ax",
             in(reg) selector::KERNEL_DATA, out("ax") _);
        asm!("ltr {0:x}", in(reg) selector::TSS, options(nostack, preserves_flags));
    }
}

#[cfg(any(test, not(target_arch = "x86_64")))]
pub fn init() {}
