//! Saved CPU context for a task not currently executing, plus the trap
//! frame used when returning to user mode (spec §3 Task: Context).

/// General-purpose register context saved on a task's kernel stack across a
/// context switch. The exact field layout matters only to the assembly
/// switch stub (`arch::idt::context_switch`, not modeled here in detail);
/// what the rest of the kernel cares about is that it exists and can be
/// swapped wholesale.
#[derive(Debug, Clone, Copy)]
pub struct Context {
    pub rsp: usize,
    pub rip: usize,
    pub rflags: u64,
}

impl Default for Context {
    fn default() -> Self {
        Context {
            rsp: 0,
            rip: 0,
            rflags: 0,
        }
    }
}

/// Register frame captured by the common interrupt entry point on a trap
/// from user mode, used by signal delivery (§4.C) and page-fault recovery
/// (§4.E) to redirect where execution resumes.
#[derive(Debug, Clone, Copy)]
pub struct TrapFrame {
    pub user_rip: usize,
    pub user_rsp: usize,
    pub user_rflags: u64,
    pub vector: u32,
    pub error_code: u64,
    /// Syscall ABI: the syscall number in flight, and its return-value
    /// register, both of which the restart-sentinel path (§4.C) mutates.
    pub syscall_number: Option<u32>,
    pub return_value: isize,
}

impl TrapFrame {
    pub fn new_for_user_entry(entry_rip: usize, user_rsp: usize) -> Self {
        TrapFrame {
            user_rip: entry_rip,
            user_rsp,
            user_rflags: 0x202, // IF set, reserved bit 1 set
            vector: 0,
            error_code: 0,
            syscall_number: None,
            return_value: 0,
        }
    }
}
