//! Task model (spec §4.C, §3 Task).

pub mod context;
pub mod signal;

use alloc::boxed::Box;
use alloc::vec::Vec;
use bitflags::bitflags;

use crate::config::NSIG;
use crate::mm::address_space::AddressSpace;
use context::Context;
use signal::SigAction;

pub type TaskId = u64;
pub type Pid = u64;

/// One of `{NONE, RUNNING, RUNNABLE, SLEEPING, INTR_SLEEPING, ZOMBIE, DEAD}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    None,
    Running,
    Runnable,
    Sleeping,
    InterruptibleSleeping,
    Zombie,
    Dead,
}

bitflags! {
    /// Scheduler-only flags (spec §3): distinct from `TaskState`, these
    /// modify how the scheduler treats a task without changing its state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SchedFlags: u32 {
        const RUNNING_ON_CPU = 1 << 0;
        const PREEMPTED      = 1 << 1;
        const KILLED         = 1 << 2;
        const KERNEL         = 1 << 3;
        /// The task is in the middle of a user-pointer access; a page
        /// fault should be redirected to `rw_user_recovery_eip` (spec §4.E).
        const RW_USER        = 1 << 4;
        /// Re-entrance guard for the page-fault handler (spec §4.E).
        const IN_PAGE_FAULT  = 1 << 5;
    }
}

/// What a task is parked waiting for (used for `/proc` reporting and
/// `kill(pid)`/`kill(-pgid)` targeting, spec §4.D).
#[derive(Debug, Clone, Copy)]
pub enum WaitTarget {
    Pid(Pid),
    IoDevice(u32),
    Timer,
}

/// A Process Control Block: every piece of kernel-managed state for one
/// schedulable execution unit (spec §3 Task).
pub struct Task {
    pub id: TaskId,
    pub pid: Pid,
    pub pgid: Pid,
    pub session: Pid,

    pub state: TaskState,
    pub flags: SchedFlags,

    pub address_space: Option<Box<AddressSpace>>,

    pub sig_pending: u64,
    pub sig_blocked: u64,
    pub sig_actions: [SigAction; NSIG],

    pub context: Context,

    pub parent: Option<TaskId>,
    pub children: Vec<TaskId>,

    /// The single wait-queue this task may be parked on at a time (spec §3:
    /// "Wait node used to park on at most one wait-queue at a time").
    pub waiting_on: Option<WaitTarget>,
    /// Tick at which a timed sleep should end; `None` for an untimed sleep.
    pub wake_up_tick: Option<u64>,

    pub exit_code: Option<i32>,

    pub kernel_stack: usize,

    /// Recovery EIP/RIP for a faulting `copy_from_user`/`copy_to_user`
    /// (spec §4.E), valid only while `SchedFlags::RW_USER` is set.
    pub rw_user_recovery_pc: usize,
}

impl Task {
    pub fn new(id: TaskId, pid: Pid, kernel: bool) -> Self {
        Task {
            id,
            pid,
            pgid: pid,
            session: pid,
            state: TaskState::None,
            flags: if kernel {
                SchedFlags::KERNEL
            } else {
                SchedFlags::empty()
            },
            address_space: None,
            sig_pending: 0,
            sig_blocked: 0,
            sig_actions: [SigAction::default(); NSIG],
            context: Context::default(),
            parent: None,
            children: Vec::new(),
            waiting_on: None,
            wake_up_tick: None,
            exit_code: None,
            kernel_stack: 0,
            rw_user_recovery_pc: 0,
        }
    }

    pub fn is_sleeping(&self) -> bool {
        matches!(
            self.state,
            TaskState::Sleeping | TaskState::InterruptibleSleeping
        )
    }

    /// Set a bit in `sig_pending`. The caller is responsible for waking the
    /// target if it is `InterruptibleSleeping` (spec §4.C) — that requires
    /// the scheduler's task table, which this module does not own.
    pub fn queue_signal(&mut self, sig: u32) {
        debug_assert!((sig as usize) < NSIG);
        self.sig_pending |= 1u64 << sig;
    }

    pub fn is_signal_pending_and_unblocked(&self) -> Option<u32> {
        let deliverable = self.sig_pending & !self.sig_blocked;
        if deliverable == 0 {
            return None;
        }
        Some(deliverable.trailing_zeros())
    }
}
