//! Crate-wide error codes.
//!
//! Unix kernels generally encode syscall failures as small
//! negative integers that user-space maps to `errno`. We keep that contract
//! at the syscall boundary (`Errno::to_retval`) while giving kernel-internal
//! code a real enum to match on.

use core::fmt;

/// Kinds from spec §7: transient, invariant violation, not-found, conflict,
/// resource exhaustion, I/O, protocol, fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Errno {
    /// Resource temporarily unavailable (non-blocking op would block).
    Again,
    /// Interrupted system call; re-issue or return to caller per SA_RESTART.
    Intr,
    /// Bad address (user pointer validation failed).
    Fault,
    /// Invalid argument.
    Inval,
    /// No such file or directory.
    NoEnt,
    /// No such process.
    Srch,
    /// File exists.
    Exist,
    /// Device or resource busy.
    Busy,
    /// Out of memory.
    NoMem,
    /// File table overflow.
    NFile,
    /// I/O error.
    Io,
    /// Connection refused.
    ConnRefused,
    /// Connection reset by peer.
    ConnReset,
    /// Broken pipe.
    Pipe,
    /// No space left on device.
    NoSpc,
    /// Is a directory.
    IsDir,
    /// Not a directory.
    NotDir,
    /// Directory not empty.
    NotEmpty,
    /// Operation not permitted.
    Perm,
    /// No such device or address.
    NxIo,
    /// Address already in use.
    AddrInUse,
}

impl Errno {
    /// The negative small-integer value a syscall trampoline returns.
    pub const fn to_retval(self) -> isize {
        -(self.to_raw() as isize)
    }

    const fn to_raw(self) -> i32 {
        use Errno::*;
        match self {
            Perm => 1,
            NoEnt => 2,
            Srch => 3,
            Intr => 4,
            Io => 5,
            NxIo => 6,
            Again => 11,
            NoMem => 12,
            Fault => 14,
            Busy => 16,
            Exist => 17,
            NotDir => 20,
            IsDir => 21,
            Inval => 22,
            NFile => 23,
            NoSpc => 28,
            Pipe => 32,
            NotEmpty => 39,
            AddrInUse => 98,
            ConnReset => 104,
            ConnRefused => 111,
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?} (errno {})", self.to_raw())
    }
}

/// Result alias used throughout the kernel for fallible operations that
/// surface to a syscall boundary.
pub type KResult<T> = Result<T, Errno>;

/// Restart sentinels understood by the return-to-user path (§4.C). These are
/// distinct from `Errno` because they never escape to user-space directly —
/// signal delivery rewrites them into either a re-issued syscall or `EINTR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartSentinel {
    /// Restart unless the handler has `SA_RESTART` clear, in which case
    /// return `EINTR`.
    RestartSys,
    /// Always restart, even without `SA_RESTART`.
    RestartNoIntr,
    /// Restart only if no handler at all ran (i.e. default/ignore action).
    RestartNoHand,
}
