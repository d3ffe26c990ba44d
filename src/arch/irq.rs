//! Raw interrupt-enable/disable primitives.
//!
//! On real x86_64 hardware these read/write `EFLAGS.IF` via `pushf`/`cli`/
//! `popf`. Under `cargo test` (std, hosted) there is no such flag, so we
//! model it with a single global: correct for the single-CPU, single-thread
//! cooperative model the rest of the crate assumes, and enough to exercise
//! the counted-spinlock nesting logic in `sync::spinlock` deterministically.

#[cfg(all(not(test), target_arch = "x86_64"))]
mod hw {
    use core::arch::asm;

    pub fn interrupts_enabled() -> bool {
        let flags: u64;
        unsafe {
            asm!("pushfq", "pop {}", out(reg) flags, options(nomem, preserves_flags));
        }
        flags & (1 << 9) != 0
    }

    pub fn disable_interrupts() {
        unsafe { asm!("cli", options(nomem, nostack)) };
    }

    pub fn enable_interrupts() {
        unsafe { asm!("sti", options(nomem, nostack)) };
    }
}

#[cfg(any(test, not(target_arch = "x86_64")))]
mod hosted {
    use core::sync::atomic::{AtomicBool, Ordering};

    static IF: AtomicBool = AtomicBool::new(true);

    pub fn interrupts_enabled() -> bool {
        IF.load(Ordering::SeqCst)
    }

    pub fn disable_interrupts() {
        IF.store(false, Ordering::SeqCst);
    }

    pub fn enable_interrupts() {
        IF.store(true, Ordering::SeqCst);
    }
}

#[cfg(all(not(test), target_arch = "x86_64"))]
pub use hw::{disable_interrupts, enable_interrupts, interrupts_enabled};

#[cfg(any(test, not(target_arch = "x86_64")))]
pub use hosted::{disable_interrupts, enable_interrupts, interrupts_enabled};
