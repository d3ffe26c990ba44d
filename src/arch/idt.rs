//! Interrupt Descriptor Table and per-vector dispatch (spec §4.B).
//!
//! Each vector owns a chain of handlers rather than a single slot, because
//! IRQ lines are commonly shared (two devices routed to the same PIC pin);
//! `dispatch` runs every registered handler for a vector and lets each
//! decide whether the interrupt was theirs. CPU exceptions (vectors 0-31)
//! are mapped to the signal that the original's trap handlers would raise against
//! the faulting task, via `exception_signal`.

use alloc::vec::Vec;

use crate::arch::pic::Pic;
use crate::sync::spinlock::IrqSpinlock;
use crate::task::signal::{SIGFPE, SIGILL, SIGKILL, SIGSEGV, SIGTRAP};

pub const PIC1_OFFSET: u8 = 0x20;
pub const PIC2_OFFSET: u8 = 0x28;
pub const TIMER_VECTOR: u8 = PIC1_OFFSET;
pub const PAGE_FAULT_VECTOR: u8 = 14;

pub type HandlerFn = fn(vector: u8);

struct Dispatcher {
    handlers: Vec<Vec<HandlerFn>>,
}

static DISPATCHER: IrqSpinlock<Option<Dispatcher>> = IrqSpinlock::new(None);
static PIC: Pic = Pic::new(PIC1_OFFSET, PIC2_OFFSET);

fn ensure_init(d: &mut Option<Dispatcher>) -> &mut Dispatcher {
    d.get_or_insert_with(|| Dispatcher {
        handlers: (0..256).map(|_| Vec::new()).collect(),
    })
}

/// Register a handler on a vector. Multiple handlers on one vector run in
/// registration order (spec §4.B shared-IRQ demux).
pub fn register_handler(vector: u8, handler: HandlerFn) {
    let mut guard = DISPATCHER.acquire();
    ensure_init(&mut guard).handlers[vector as usize].push(handler);
}

pub fn handler_count(vector: u8) -> usize {
    let mut guard = DISPATCHER.acquire();
    ensure_init(&mut guard).handlers[vector as usize].len()
}

/// Run every handler registered for `vector`, then send PIC EOI if this was
/// a PIC-routed IRQ (vectors 0x20..=0x2f after remapping).
pub fn dispatch(vector: u8) {
    let handlers = {
        let mut guard = DISPATCHER.acquire();
        ensure_init(&mut guard).handlers[vector as usize].clone()
    };
    for handler in handlers {
        handler(vector);
    }
    if (PIC1_OFFSET..=PIC2_OFFSET + 7).contains(&vector) {
        PIC.end_of_interrupt(vector - PIC1_OFFSET);
    }
}

/// Which signal a CPU exception raises against the task that caused it, or
/// `None` if the vector isn't an exception this kernel delivers as a signal
/// (e.g. the page fault, which `mm::pagefault` resolves before ever
/// reaching signal delivery).
pub fn exception_signal(vector: u8) -> Option<u32> {
    match vector {
        0 => Some(SIGFPE),   // divide error
        4 => Some(SIGTRAP),  // overflow (INTO)
        5 => Some(SIGSEGV),  // bound range exceeded
        6 => Some(SIGILL),   // invalid opcode
        7 => Some(SIGSEGV),  // device not available
        8 => Some(SIGKILL),  // double fault: unrecoverable
        10 => Some(SIGSEGV), // invalid TSS
        11 => Some(SIGSEGV), // segment not present
        12 => Some(SIGSEGV), // stack-segment fault
        13 => Some(SIGSEGV), // general protection fault
        16 => Some(SIGFPE),  // x87 floating point
        19 => Some(SIGFPE),  // SIMD floating point
        _ => None,
    }
}

#[cfg(all(not(test), target_arch = "x86_64"))]
pub fn init() {
    PIC.init();
    // Real vector installation (lidt + 256 extern "x86-interrupt" stubs
    // that each call `dispatch`) lives in the boot path's assembly trampoline;
    // omitted here since it cannot be exercised without real hardware.
}

#[cfg(any(test, not(target_arch = "x86_64")))]
pub fn init() {}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    static CALLS: AtomicUsize = AtomicUsize::new(0);

    fn bump(_vector: u8) {
        CALLS.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn dispatch_runs_every_registered_handler_on_a_vector() {
        CALLS.store(0, Ordering::SeqCst);
        register_handler(200, bump);
        register_handler(200, bump);
        dispatch(200);
        assert_eq!(CALLS.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unmapped_exception_vectors_have_no_signal() {
        assert_eq!(exception_signal(3), None); // breakpoint: debugger-only
        assert_eq!(exception_signal(14), None); // page fault: resolved separately
    }

    #[test]
    fn general_protection_fault_maps_to_segv() {
        assert_eq!(exception_signal(13), Some(SIGSEGV));
    }
}
