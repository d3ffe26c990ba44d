//! Per-task address space (spec §3 Address space).
//!
//! Invariant: the kernel half of every page directory is identical and
//! globally mapped; only the user half is per-process. Fork clones user
//! page tables entry-by-entry, preserving flags; freeing an address space
//! walks and releases only user-half frames.

use alloc::vec::Vec;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VmFlags: u32 {
        const READ    = 1 << 0;
        const WRITE   = 1 << 1;
        const EXEC    = 1 << 2;
        const USER    = 1 << 3;
        const SHARED  = 1 << 4;
    }
}

/// One mapped region of a task's user address space: `[start, start+len)`.
#[derive(Debug, Clone, Copy)]
pub struct VmArea {
    pub start: usize,
    pub len: usize,
    pub flags: VmFlags,
}

impl VmArea {
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.start && addr < self.start + self.len
    }

    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

/// A single page-table-entry-equivalent in the toy user-half page table:
/// virtual page number to physical frame number, plus flags. A real x86_64
/// implementation walks four paging levels; what matters for the fork and
/// free invariants this module is tested against is that entries are
/// per-process, carry flags, and are enumerable.
#[derive(Debug, Clone, Copy)]
pub struct PageTableEntry {
    pub vpn: usize,
    pub frame: usize,
    pub flags: VmFlags,
}

/// The user half of a page directory: only this part is copied on fork or
/// released on teardown. The kernel half is shared globally and never
/// touched here (spec §3 invariant).
#[derive(Debug, Default)]
pub struct UserPageTable {
    entries: Vec<PageTableEntry>,
}

impl UserPageTable {
    pub fn map(&mut self, vpn: usize, frame: usize, flags: VmFlags) {
        self.entries.retain(|e| e.vpn != vpn);
        self.entries.push(PageTableEntry { vpn, frame, flags });
    }

    pub fn translate(&self, vpn: usize) -> Option<PageTableEntry> {
        self.entries.iter().copied().find(|e| e.vpn == vpn)
    }

    /// Clone every entry verbatim, flags included (spec: "A fork clones
    /// user page tables entry-by-entry (with flags preserved)"). No
    /// copy-on-write: the frames become shared between parent and child
    /// until one of them actually replaces its mapping.
    pub fn clone_user_half(&self) -> UserPageTable {
        UserPageTable {
            entries: self.entries.clone(),
        }
    }

    /// Frame numbers owned by the user half, for the caller to return to
    /// the physical allocator. Only ever called on teardown of the user
    /// half — the kernel half's frames are never enumerated here.
    pub fn user_frames(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries.iter().map(|e| e.frame)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct AddressSpace {
    pub page_table: UserPageTable,
    pub areas: Vec<VmArea>,
}

impl AddressSpace {
    pub fn new() -> Self {
        AddressSpace {
            page_table: UserPageTable::default(),
            areas: Vec::new(),
        }
    }

    pub fn add_area(&mut self, area: VmArea) {
        self.areas.push(area);
    }

    pub fn find_area(&self, addr: usize) -> Option<&VmArea> {
        self.areas.iter().find(|a| a.contains(addr))
    }

    /// fork(): copy the user half of the page table and the VM area list
    /// (spec §3: "A fork clones parent address space").
    pub fn fork(&self) -> AddressSpace {
        AddressSpace {
            page_table: self.page_table.clone_user_half(),
            areas: self.areas.clone(),
        }
    }

    /// Release every frame owned by the user half. Called once, when the
    /// last reference to this address space (a zombie task being reaped,
    /// or an exec() discarding the old image) goes away.
    pub fn teardown(&mut self) -> Vec<usize> {
        let frames: Vec<usize> = self.page_table.user_frames().collect();
        self.page_table = UserPageTable::default();
        self.areas.clear();
        frames
    }
}

impl Default for AddressSpace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fork_copies_entries_with_flags_preserved() {
        let mut parent = AddressSpace::new();
        parent
            .page_table
            .map(0x1000, 0x9000, VmFlags::READ | VmFlags::WRITE | VmFlags::USER);
        parent.add_area(VmArea {
            start: 0x1000,
            len: 0x1000,
            flags: VmFlags::READ | VmFlags::USER,
        });

        let child = parent.fork();
        assert_eq!(child.page_table.len(), 1);
        let entry = child.page_table.translate(0x1000).unwrap();
        assert_eq!(entry.frame, 0x9000);
        assert_eq!(entry.flags, VmFlags::READ | VmFlags::WRITE | VmFlags::USER);
        assert_eq!(child.areas.len(), 1);
    }

    #[test]
    fn fork_is_independent_of_parent_afterward() {
        let mut parent = AddressSpace::new();
        parent.page_table.map(0x1000, 0x9000, VmFlags::READ);
        let mut child = parent.fork();
        child.page_table.map(0x2000, 0xa000, VmFlags::READ);

        assert_eq!(parent.page_table.len(), 1);
        assert_eq!(child.page_table.len(), 2);
    }

    #[test]
    fn teardown_returns_only_user_frames_and_clears_areas() {
        let mut space = AddressSpace::new();
        space.page_table.map(0x1000, 0x9000, VmFlags::READ);
        space.page_table.map(0x2000, 0xa000, VmFlags::READ);
        space.add_area(VmArea {
            start: 0x1000,
            len: 0x2000,
            flags: VmFlags::READ,
        });

        let frames = space.teardown();
        assert_eq!(frames.len(), 2);
        assert!(frames.contains(&0x9000));
        assert!(frames.contains(&0xa000));
        assert!(space.areas.is_empty());
        assert!(space.page_table.is_empty());
    }

    #[test]
    fn find_area_locates_containing_region() {
        let mut space = AddressSpace::new();
        space.add_area(VmArea {
            start: 0x4000,
            len: 0x1000,
            flags: VmFlags::READ,
        });
        assert!(space.find_area(0x4500).is_some());
        assert!(space.find_area(0x5500).is_none());
    }
}
