//! Counted, IRQ-disabling spinlock (spec §4.A).
//!
//! `acquire` disables interrupts and bumps a nest counter; `release`
//! decrements it and only re-enables interrupts once the counter returns to
//! zero, restoring whatever the interrupt-enable state was at the
//! *outermost* acquire. This lock is explicitly allowed to cross a context
//! switch as long as the task switched into is the one that releases it —
//! that discipline lives in the scheduler (§4.D), not here.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::arch;

/// A spinlock that nests within a single task/interrupt context by disabling
/// interrupts, rather than spinning across CPUs (there is only one CPU).
pub struct IrqSpinlock<T> {
    nest: AtomicUsize,
    /// Interrupt-enable state captured at the outermost `acquire`, restored
    /// by the matching outermost `release`.
    saved_if: core::sync::atomic::AtomicBool,
    locked: core::sync::atomic::AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for IrqSpinlock<T> {}
unsafe impl<T: Send> Send for IrqSpinlock<T> {}

pub struct IrqSpinlockGuard<'a, T> {
    lock: &'a IrqSpinlock<T>,
}

impl<T> IrqSpinlock<T> {
    pub const fn new(data: T) -> Self {
        IrqSpinlock {
            nest: AtomicUsize::new(0),
            saved_if: core::sync::atomic::AtomicBool::new(false),
            locked: core::sync::atomic::AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    /// Acquire the lock, disabling interrupts. Re-entrant only across IRQ
    /// nesting on the same logical thread of control — this is not a
    /// recursive mutex for unrelated callers.
    pub fn acquire(&self) -> IrqSpinlockGuard<'_, T> {
        let was_enabled = arch::interrupts_enabled();
        arch::disable_interrupts();

        while self
            .locked
            .compare_exchange_weak(
                false,
                true,
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_err()
        {
            core::hint::spin_loop();
        }

        if self.nest.fetch_add(1, Ordering::AcqRel) == 0 {
            self.saved_if.store(was_enabled, Ordering::Relaxed);
        }

        IrqSpinlockGuard { lock: self }
    }

    /// # Safety
    /// The caller must guarantee the lock is actually held by the current
    /// context and will be released exactly once more (used by the
    /// scheduler's lock hand-off, see `sched::yield_now`).
    pub unsafe fn force_release(&self) {
        self.release_inner();
    }

    fn release_inner(&self) {
        let remaining = self.nest.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining == 0 {
            let restore = self.saved_if.load(Ordering::Relaxed);
            self.locked.store(false, Ordering::Release);
            if restore {
                arch::enable_interrupts();
            }
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl<T> Drop for IrqSpinlockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release_inner();
    }
}

impl<T> core::ops::Deref for IrqSpinlockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> core::ops::DerefMut for IrqSpinlockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_acquire_release_restores_interrupts() {
        arch::enable_interrupts();
        let lock = IrqSpinlock::new(0u32);
        {
            let mut g = lock.acquire();
            *g += 1;
            assert!(!arch::interrupts_enabled());
        }
        assert!(arch::interrupts_enabled());
    }

    #[test]
    fn nested_acquire_only_restores_at_outermost() {
        arch::enable_interrupts();
        let lock = IrqSpinlock::new(0u32);
        let outer = lock.acquire();
        assert!(!arch::interrupts_enabled());
        unsafe {
            // Simulate nested re-entrance the way IRQ entry would.
            lock.nest.fetch_add(1, Ordering::AcqRel);
        }
        assert!(!arch::interrupts_enabled());
        unsafe { lock.force_release() };
        // Still nested once (from `outer`), so interrupts remain off.
        assert!(!arch::interrupts_enabled());
        drop(outer);
        assert!(arch::interrupts_enabled());
    }

    #[test]
    fn mutates_through_guard() {
        let lock = IrqSpinlock::new(alloc::vec::Vec::<i32>::new());
        lock.acquire().push(1);
        lock.acquire().push(2);
        assert_eq!(*lock.acquire(), alloc::vec![1, 2]);
    }
}
