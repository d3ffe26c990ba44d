//! Page-fault handling (spec §4.E).
//!
//! Runs inside the task that faulted. `in_page_fault` prevents re-entrance.
//! A fault is first offered to the address space's VM areas (demand
//! mapping); if that cannot resolve it and the fault happened while the
//! task was mid `copy_from_user`/`copy_to_user` (`RW_USER` set), the trap
//! frame's instruction pointer is rewritten to the recovery point so the
//! kernel sees `-EFAULT` instead of crashing. Otherwise: kernel-mode faults
//! are fatal, user-mode faults kill the task and report to its tty.

use crate::error::Errno;
use crate::mm::address_space::{AddressSpace, VmFlags};
use crate::task::context::TrapFrame;
use crate::task::{SchedFlags, Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutcome {
    /// The area handled it (or already maps the page); resume normally.
    Resolved,
    /// Recovered via the `RW_USER` + recovery-PC protocol: `-EFAULT` is
    /// delivered to the kernel copy routine instead of crashing.
    RecoveredToKernelFault,
    /// User-mode fault with no recovery available: kill the task.
    KillUser,
    /// Kernel-mode fault with no recovery available: this is fatal.
    KernelPanic,
}

pub struct PageFaultRequest {
    pub fault_addr: usize,
    pub is_write: bool,
    pub from_user_mode: bool,
}

/// Decide (and partially apply) the outcome of a page fault. Returns the
/// outcome so callers (the interrupt dispatcher) can act on it — e.g. only
/// `FaultOutcome::KillUser` requires writing the diagnostic message and
/// setting `SchedFlags::KILLED` (spec §7 user-visible failures).
pub fn handle(
    task: &mut Task,
    space: &AddressSpace,
    frame: &mut TrapFrame,
    req: &PageFaultRequest,
) -> FaultOutcome {
    if task.flags.contains(SchedFlags::IN_PAGE_FAULT) {
        // Re-entrant fault inside the fault handler itself: always fatal,
        // there is nothing sane left to do.
        return FaultOutcome::KernelPanic;
    }

    task.flags.insert(SchedFlags::IN_PAGE_FAULT);
    let outcome = handle_inner(task, space, frame, req);
    task.flags.remove(SchedFlags::IN_PAGE_FAULT);
    outcome
}

fn handle_inner(
    task: &mut Task,
    space: &AddressSpace,
    frame: &mut TrapFrame,
    req: &PageFaultRequest,
) -> FaultOutcome {
    if let Some(area) = space.find_area(req.fault_addr) {
        let need = if req.is_write {
            VmFlags::WRITE
        } else {
            VmFlags::READ
        };
        if area.flags.contains(need) {
            return FaultOutcome::Resolved;
        }
    }

    if task.flags.contains(SchedFlags::RW_USER) {
        frame.user_rip = task.rw_user_recovery_pc;
        frame.return_value = Errno::Fault.to_retval();
        return FaultOutcome::RecoveredToKernelFault;
    }

    if req.from_user_mode {
        task.flags.insert(SchedFlags::KILLED);
        FaultOutcome::KillUser
    } else {
        FaultOutcome::KernelPanic
    }
}
