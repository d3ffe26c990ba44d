//! User-pointer validation with fault-restart (spec §4.E, design note in
//! spec §9).
//!
//! Two mechanisms are modeled, matching the spec's "either...or" note:
//!
//! - `with_user_access` brackets a raw user-memory touch with the
//!   `RW_USER` flag and a recovery PC, for code that must do the access
//!   through the fault handler (e.g. an inline `mov`/`rep movsb` against
//!   user memory). The fault handler (`pagefault::handle`) is what actually
//!   turns a trap into `-EFAULT` here.
//! - `copy_from_user`/`copy_to_user` are the explicit, bounds-checked
//!   alternative the design note calls out as an equally valid contract:
//!   they consult the task's `AddressSpace` directly and never need a
//!   fault at all for a legitimately-mapped range. This crate's syscall
//!   layer uses these, since there is no hardware MMU backing the `Vec`/
//!   frame-number model in `address_space` to actually fault against.

use crate::error::{Errno, KResult};
use crate::mm::address_space::{AddressSpace, VmFlags};
use crate::task::{SchedFlags, Task};

/// Mark `task` as touching user memory for the duration of `f`, recording
/// `recovery_pc` so a concurrent page fault can redirect there instead of
/// crashing. Clears the flag again once `f` returns, successfully or not.
pub fn with_user_access<R>(task: &mut Task, recovery_pc: usize, f: impl FnOnce(&Task) -> R) -> R {
    task.flags.insert(SchedFlags::RW_USER);
    task.rw_user_recovery_pc = recovery_pc;
    let result = f(task);
    task.flags.remove(SchedFlags::RW_USER);
    result
}

fn validate_range(space: &AddressSpace, addr: usize, len: usize, need: VmFlags) -> KResult<()> {
    if len == 0 {
        return Ok(());
    }
    let end = addr.checked_add(len).ok_or(Errno::Fault)?;
    let mut cursor = addr;
    while cursor < end {
        let area = space.find_area(cursor).ok_or(Errno::Fault)?;
        if !area.flags.contains(need) {
            return Err(Errno::Fault);
        }
        cursor = area.end().min(end);
    }
    Ok(())
}

/// Bounds-checked copy from user memory into `dst`. `src_user_base` is a
/// pseudo-address in the task's `AddressSpace`; `read_byte` performs the
/// actual fetch once the range has been validated (kept abstract since
/// this crate models user pages logically, not as real mapped memory).
pub fn copy_from_user(
    space: &AddressSpace,
    src_user_base: usize,
    dst: &mut [u8],
    read_byte: impl Fn(usize) -> u8,
) -> KResult<()> {
    validate_range(space, src_user_base, dst.len(), VmFlags::READ | VmFlags::USER)?;
    for (i, slot) in dst.iter_mut().enumerate() {
        *slot = read_byte(src_user_base + i);
    }
    Ok(())
}

/// Bounds-checked copy into user memory.
pub fn copy_to_user(
    space: &AddressSpace,
    dst_user_base: usize,
    src: &[u8],
    mut write_byte: impl FnMut(usize, u8),
) -> KResult<()> {
    validate_range(space, dst_user_base, src.len(), VmFlags::WRITE | VmFlags::USER)?;
    for (i, byte) in src.iter().enumerate() {
        write_byte(dst_user_base + i, *byte);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::address_space::VmArea;

    fn space_with_rw_area() -> AddressSpace {
        let mut s = AddressSpace::new();
        s.add_area(VmArea {
            start: 0x1000,
            len: 0x1000,
            flags: VmFlags::READ | VmFlags::WRITE | VmFlags::USER,
        });
        s
    }

    #[test]
    fn copy_from_user_succeeds_within_mapped_range() {
        let space = space_with_rw_area();
        let mut buf = [0u8; 4];
        copy_from_user(&space, 0x1000, &mut buf, |addr| (addr & 0xff) as u8).unwrap();
        assert_eq!(buf, [0x00, 0x01, 0x02, 0x03]);
    }

    #[test]
    fn copy_from_user_faults_outside_mapped_range() {
        let space = space_with_rw_area();
        let mut buf = [0u8; 4];
        let err = copy_from_user(&space, 0x5000, &mut buf, |_| 0).unwrap_err();
        assert_eq!(err, Errno::Fault);
    }

    #[test]
    fn copy_from_user_faults_on_partial_overrun() {
        let space = space_with_rw_area();
        let mut buf = [0u8; 8];
        // 0x1ffc..0x2004 overruns the end of the mapped 0x1000..0x2000 area.
        let err = copy_from_user(&space, 0x1ffc, &mut buf, |_| 0).unwrap_err();
        assert_eq!(err, Errno::Fault);
    }

    #[test]
    fn with_user_access_toggles_flag_and_records_recovery_pc() {
        let mut task = Task::new(1, 1, false);
        let touched = with_user_access(&mut task, 0xdead, |t| {
            assert!(t.flags.contains(SchedFlags::RW_USER));
            assert_eq!(t.rw_user_recovery_pc, 0xdead);
            42
        });
        assert_eq!(touched, 42);
        assert!(!task.flags.contains(SchedFlags::RW_USER));
    }
}
