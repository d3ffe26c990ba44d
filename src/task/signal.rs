//! Signals and return-to-user delivery (spec §4.C).
//!
//! Delivery happens only at the kernel-to-user boundary. This module holds
//! the pure decision logic (what a pending-and-unblocked signal resolves
//! to, how a restart sentinel rewrites the trap frame); the actual "write a
//! trampoline and saved context onto the user stack" step is parameterized
//! over a `UserStack` so it does not need a concrete virtual-memory
//! implementation to be exercised.

use crate::config::NSIG;
use crate::error::RestartSentinel;
use crate::task::context::TrapFrame;

pub const SIGHUP: u32 = 1;
pub const SIGINT: u32 = 2;
pub const SIGQUIT: u32 = 3;
pub const SIGILL: u32 = 4;
pub const SIGTRAP: u32 = 5;
pub const SIGABRT: u32 = 6;
pub const SIGFPE: u32 = 8;
pub const SIGKILL: u32 = 9;
pub const SIGSEGV: u32 = 11;
pub const SIGPIPE: u32 = 13;
pub const SIGALRM: u32 = 14;
pub const SIGTERM: u32 = 15;
pub const SIGCHLD: u32 = 17;
pub const SIGCONT: u32 = 18;
pub const SIGSTOP: u32 = 19;
pub const SIGTSTP: u32 = 20;
pub const SIGWINCH: u32 = 28;

/// `SIG_UNBLOCKABLE` (spec §6): SIGKILL and SIGSTOP can never be blocked or
/// caught.
pub const SIG_UNBLOCKABLE: u64 = (1 << SIGKILL) | (1 << SIGSTOP);

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SigActionFlags: u32 {
        const RESTART = 1 << 0;
        const ONESHOT = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Default,
    Ignore,
    Handler(usize),
}

#[derive(Debug, Clone, Copy)]
pub struct SigAction {
    pub disposition: Disposition,
    /// Additional signals blocked for the duration of the handler.
    pub mask: u64,
    pub flags: SigActionFlags,
}

impl Default for SigAction {
    fn default() -> Self {
        SigAction {
            disposition: Disposition::Default,
            mask: 0,
            flags: SigActionFlags::empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultAction {
    Ignore,
    Stop,
    Terminate,
}

/// The default disposition for a signal with no explicit handler (spec
/// §4.C: "ignore for {CHLD, CONT, WINCH}, stop for {STOP, TSTP}, otherwise
/// exit").
pub fn default_action(sig: u32) -> DefaultAction {
    match sig {
        SIGCHLD | SIGCONT | SIGWINCH => DefaultAction::Ignore,
        SIGSTOP | SIGTSTP => DefaultAction::Stop,
        _ => DefaultAction::Terminate,
    }
}

/// What the return-to-user path should do with one pending-and-unblocked
/// signal, before touching any task/user-memory state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Action was IGN (or default-ignore); clear the pending bit.
    Ignored { reap_children: bool },
    /// Action was DFL and resolves to stop or terminate.
    Default(DefaultAction),
    /// A handler will run; caller must build the trampoline frame.
    RunHandler {
        handler: usize,
        new_mask: u64,
    },
}

/// Decide what happens for `sig` given `action`, without mutating any
/// state. Pure function so the dispatch table is easy to test exhaustively.
pub fn resolve(sig: u32, action: &SigAction, current_mask: u64) -> DeliveryOutcome {
    match action.disposition {
        Disposition::Ignore => DeliveryOutcome::Ignored {
            reap_children: sig == SIGCHLD,
        },
        Disposition::Default => match default_action(sig) {
            DefaultAction::Ignore => DeliveryOutcome::Ignored {
                reap_children: sig == SIGCHLD,
            },
            other => DeliveryOutcome::Default(other),
        },
        Disposition::Handler(handler) => DeliveryOutcome::RunHandler {
            handler,
            new_mask: current_mask | action.mask | (1 << sig),
        },
    }
}

/// Find the lowest-numbered pending-and-unblocked signal, per spec §4.C
/// ("for each pending-and-unblocked signal in ascending order").
pub fn next_deliverable(sig_pending: u64, sig_blocked: u64) -> Option<u32> {
    let deliverable = sig_pending & !(sig_blocked & !SIG_UNBLOCKABLE);
    if deliverable == 0 {
        None
    } else {
        Some(deliverable.trailing_zeros())
    }
}

/// Sentinel return values a restartable syscall may leave in the trap
/// frame's return-value slot (spec §4.C / §6).
pub const RESTARTSYS: isize = -512;
pub const RESTARTNOINTR: isize = -513;
pub const RESTARTNOHAND: isize = -514;
pub const EINTR: isize = -4;

pub fn classify_restart(retval: isize) -> Option<RestartSentinel> {
    match retval {
        RESTARTSYS => Some(RestartSentinel::RestartSys),
        RESTARTNOINTR => Some(RestartSentinel::RestartNoIntr),
        RESTARTNOHAND => Some(RestartSentinel::RestartNoHand),
        _ => None,
    }
}

/// Apply the restart-sentinel protocol to a trap frame about to return to
/// user mode (spec §4.C). `ran_handler` is true iff a signal handler is
/// about to run (or just ran) for this return; `trap_instruction_len` is
/// the length, in bytes, of the trap instruction that entered the kernel
/// (subtracted from the saved `user_rip` to re-issue the syscall).
pub fn apply_restart_protocol(
    frame: &mut TrapFrame,
    sentinel: RestartSentinel,
    ran_handler: bool,
    handler_has_restart_flag: bool,
    trap_instruction_len: usize,
) {
    let should_restart = match sentinel {
        RestartSentinel::RestartNoIntr => true,
        RestartSentinel::RestartSys => !ran_handler || handler_has_restart_flag,
        RestartSentinel::RestartNoHand => !ran_handler,
    };

    if should_restart {
        frame.user_rip = frame.user_rip.saturating_sub(trap_instruction_len);
        // syscall_number is left as-is by the caller (it was saved before
        // the original syscall dispatch overwrote the return-value slot).
    } else {
        frame.return_value = EINTR;
    }
}
