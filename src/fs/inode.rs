//! Inode lifecycle state machine (spec §4.G) — the hardest part of the FS
//! layer, per the source the table is grounded on:
//! `examples/original_source/src/fs/inode_table.c`.
//!
//! Simplification versus the original: the original keeps one process-wide hash
//! keyed by `(sb, ino)` shared across every mounted super-block. Since the
//! super-block is always part of that key anyway, this keeps one
//! `InodeTable` per super-block instead — same two-phase lookup, same
//! `FREEING` interlock and single shared freeing wait-queue, just scoped to
//! one super-block's `ino` space rather than type-erasing every mounted
//! `SuperOps` behind one global map. Recorded in DESIGN.md.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::error::{Errno, KResult};
use crate::sync::mutex::Parker;
use crate::sync::spinlock::IrqSpinlock;
use crate::sync::waitqueue::{TaskId, WaitQueue};

bitflags::bitflags! {
    /// The five-flag inode state machine (spec §3, §4.G glossary "BSS inode
    /// state"). `VALID` is sticky: once set it is never cleared again.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InodeFlags: u32 {
        const VALID   = 1 << 0;
        const DIRTY   = 1 << 1;
        const SYNC    = 1 << 2;
        const FREEING = 1 << 3;
        const BAD     = 1 << 4;
    }
}

/// Filesystem-agnostic inode content. ext2 (§4.H) extends this with its own
/// block-pointer array via `InodeData::ext2_blocks`; kept flat here rather
/// than behind a trait object since this crate has exactly one filesystem.
#[derive(Debug, Clone, Default)]
pub struct InodeData {
    pub mode: u32,
    pub nlinks: u32,
    pub size: u64,
    pub uid: u32,
    pub gid: u32,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
    /// 12 direct + single/double/triple indirect pointers, or (if
    /// `blocks == 0`) an inline symlink target (spec §4.H symlinks).
    pub block_ptrs: [u32; 15],
    /// 512-byte block count, spec's `i.blocks`.
    pub blocks: u64,
}

/// What the super-block does to fill, flush, and deallocate an inode's
/// on-disk representation (the original's `sb->ops->inode_{read,write,delete}`).
pub trait SuperOps {
    fn read_inode(&self, ino: u64, data: &mut InodeData) -> KResult<()>;
    fn write_inode(&self, ino: u64, data: &InodeData) -> KResult<()>;
    fn delete_inode(&self, ino: u64, data: &InodeData) -> KResult<()>;
}

pub struct Inode {
    pub ino: u64,
    flags: IrqSpinlock<InodeFlags>,
    flags_queue: WaitQueue,
    refcount: AtomicUsize,
    nlinks: AtomicU32,
    pub data: IrqSpinlock<InodeData>,
}

impl Inode {
    fn new(ino: u64, data: InodeData) -> Self {
        let nlinks = data.nlinks;
        Inode {
            ino,
            flags: IrqSpinlock::new(InodeFlags::empty()),
            flags_queue: WaitQueue::new(),
            refcount: AtomicUsize::new(1),
            nlinks: AtomicU32::new(nlinks),
            data: IrqSpinlock::new(data),
        }
    }

    pub fn flags(&self) -> InodeFlags {
        *self.flags.acquire()
    }

    pub fn is_valid(&self) -> bool {
        self.flags().contains(InodeFlags::VALID)
    }

    pub fn nlinks(&self) -> u32 {
        self.nlinks.load(Ordering::SeqCst)
    }

    pub fn set_nlinks(&self, n: u32) {
        self.nlinks.store(n, Ordering::SeqCst);
        self.data.acquire().nlinks = n;
    }

    pub fn refcount(&self) -> usize {
        self.refcount.load(Ordering::SeqCst)
    }

    pub fn mark_dirty(&self) {
        self.flags.acquire().insert(InodeFlags::DIRTY);
    }

    fn mark_valid(&self) {
        self.flags.acquire().insert(InodeFlags::VALID);
        self.flags_queue.wake_all(|_| {});
    }

    /// Returns true if this was the last reference (caller must then run
    /// `__inode_kill` bookkeeping under the hash lock).
    fn mark_bad_and_check_last_ref(&self) -> bool {
        let mut flags = self.flags.acquire();
        if self.refcount.fetch_sub(1, Ordering::SeqCst) == 1 {
            true
        } else {
            flags.insert(InodeFlags::BAD);
            self.flags_queue.wake_all(|_| {});
            false
        }
    }
}

/// Outcome of the two-phase lookup (spec §4.G "Lookup"): distinguishes the
/// caller who must fill the inode from one who must wait for an existing
/// fill in progress.
enum Lookup {
    Created(Arc<Inode>),
    Found(Arc<Inode>),
}

pub struct InodeTable {
    hash: IrqSpinlock<BTreeMap<u64, Arc<Inode>>>,
    freeing_queue: WaitQueue,
}

impl InodeTable {
    pub fn new() -> Self {
        InodeTable {
            hash: IrqSpinlock::new(BTreeMap::new()),
            freeing_queue: WaitQueue::new(),
        }
    }

    pub fn resident_count(&self) -> usize {
        self.hash.acquire().len()
    }

    fn get_invalid(&self, ino: u64, me: TaskId, parker: &dyn Parker) -> Lookup {
        loop {
            let mut hash = self.hash.acquire();
            if let Some(existing) = hash.get(&ino).cloned() {
                let freeing = existing.flags.acquire().contains(InodeFlags::FREEING);
                if freeing {
                    drop(hash);
                    self.freeing_queue.register(me);
                    parker.park_and_yield(me, false);
                    self.freeing_queue.unregister(me);
                    continue;
                }
                existing.refcount.fetch_add(1, Ordering::SeqCst);
                return Lookup::Found(existing);
            }
            let fresh = Arc::new(Inode::new(ino, InodeData::default()));
            hash.insert(ino, fresh.clone());
            return Lookup::Created(fresh);
        }
    }

    /// `inode_wait_for_valid_or_bad`: park until `VALID` or `BAD` is set,
    /// then either return the inode (`VALID`) or drop the reference and
    /// evict it from the hash if we were the last holder (`BAD`).
    fn wait_for_valid_or_bad(
        &self,
        inode: Arc<Inode>,
        me: TaskId,
        parker: &dyn Parker,
    ) -> Option<Arc<Inode>> {
        loop {
            let settled = {
                let flags = inode.flags.acquire();
                flags.contains(InodeFlags::VALID) || flags.contains(InodeFlags::BAD)
            };
            if settled {
                break;
            }
            self.freeing_queue.register(me); // any queue works; we only park
            parker.park_and_yield(me, false);
            self.freeing_queue.unregister(me);
        }

        let bad = inode.flags.acquire().contains(InodeFlags::BAD);
        if bad {
            if inode.refcount.fetch_sub(1, Ordering::SeqCst) == 1 {
                self.hash.acquire().remove(&inode.ino);
            }
            None
        } else {
            Some(inode)
        }
    }

    /// `inode_get` (spec §4.G "Fill"): resolve `ino`, reading it from disk
    /// via `ops` exactly once if it wasn't already resident.
    pub fn get(
        &self,
        ino: u64,
        ops: &dyn SuperOps,
        me: TaskId,
        parker: &dyn Parker,
    ) -> KResult<Arc<Inode>> {
        match self.get_invalid(ino, me, parker) {
            Lookup::Created(inode) => {
                let mut data = inode.data.acquire();
                match ops.read_inode(ino, &mut data) {
                    Ok(()) => {
                        inode.nlinks.store(data.nlinks, Ordering::SeqCst);
                        drop(data);
                        inode.mark_valid();
                        Ok(inode)
                    }
                    Err(e) => {
                        drop(data);
                        if inode.mark_bad_and_check_last_ref() {
                            self.hash.acquire().remove(&ino);
                        }
                        Err(e)
                    }
                }
            }
            Lookup::Found(inode) => {
                if inode.is_valid() {
                    Ok(inode)
                } else {
                    self.wait_for_valid_or_bad(inode, me, parker)
                        .ok_or(Errno::Io)
                }
            }
        }
    }

    /// `inode_write_to_disk` (spec §4.G "Writeback").
    pub fn write_to_disk(&self, inode: &Arc<Inode>, ops: &dyn SuperOps) -> KResult<()> {
        {
            let mut flags = inode.flags.acquire();
            if !flags.contains(InodeFlags::DIRTY) {
                return Ok(());
            }
            if flags.contains(InodeFlags::SYNC) {
                return Ok(());
            }
            flags.insert(InodeFlags::SYNC);
        }

        let data = inode.data.acquire();
        let result = ops.write_inode(inode.ino, &data);
        drop(data);

        let mut flags = inode.flags.acquire();
        flags.remove(InodeFlags::SYNC);
        flags.remove(InodeFlags::DIRTY);
        drop(flags);
        inode.flags_queue.wake_all(|_| {});
        result
    }

    /// `inode_put` (spec §4.G "Eviction"/"Dirty parking").
    pub fn put(&self, inode: Arc<Inode>, ops: &dyn SuperOps) {
        let hash = self.hash.acquire();
        let mut flags = inode.flags.acquire();
        let last_ref = inode.refcount.fetch_sub(1, Ordering::SeqCst) == 1;

        if last_ref && inode.nlinks() == 0 && !flags.contains(InodeFlags::FREEING) {
            flags.insert(InodeFlags::FREEING);
            drop(flags);
            drop(hash);
            let data = inode.data.acquire().clone();
            let _ = ops.delete_inode(inode.ino, &data);
            self.hash.acquire().remove(&inode.ino);
            self.freeing_queue.wake_all(|_| {});
            return;
        }
        drop(flags);
        drop(hash);
    }

    /// `inode_sync` (spec §4.G "Sync-all"): writeback every dirty, resident,
    /// non-`FREEING` inode. `wait` is accepted for interface fidelity but
    /// `write_to_disk` above never actually parks on `SYNC` in this
    /// single-pass model, so it is unused beyond documenting intent.
    pub fn sync_all(&self, ops: &dyn SuperOps, _wait: bool) -> usize {
        let snapshot: alloc::vec::Vec<Arc<Inode>> = {
            let hash = self.hash.acquire();
            hash.values()
                .filter(|i| {
                    let f = i.flags.acquire();
                    f.contains(InodeFlags::VALID)
                        && f.contains(InodeFlags::DIRTY)
                        && !f.contains(InodeFlags::FREEING)
                })
                .cloned()
                .collect()
        };
        let mut synced = 0;
        for inode in &snapshot {
            if self.write_to_disk(inode, ops).is_ok() {
                synced += 1;
            }
        }
        synced
    }

    /// OOM trim (spec §4.G): drop every resident inode with zero references
    /// that is fully `VALID` and not in any transient state.
    pub fn trim(&self) -> usize {
        let mut hash = self.hash.acquire();
        let before = hash.len();
        hash.retain(|_, inode| {
            let f = inode.flags.acquire();
            let transient = f.intersects(InodeFlags::SYNC | InodeFlags::FREEING);
            !(inode.refcount() == 0 && f.contains(InodeFlags::VALID) && !transient)
        });
        before - hash.len()
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::collections::BTreeSet;
    use core::cell::RefCell;

    struct StubParker {
        current: TaskId,
        parked: RefCell<BTreeSet<TaskId>>,
    }

    impl Parker for StubParker {
        fn current(&self) -> TaskId {
            self.current
        }
        fn park_and_yield(&self, id: TaskId, _interruptible: bool) {
            self.parked.borrow_mut().insert(id);
        }
        fn wake(&self, id: TaskId) -> bool {
            self.parked.borrow_mut().remove(&id)
        }
    }

    fn parker() -> StubParker {
        StubParker {
            current: 1,
            parked: RefCell::new(BTreeSet::new()),
        }
    }

    struct FakeSb {
        reads: core::cell::Cell<u32>,
        fail: bool,
    }

    impl SuperOps for FakeSb {
        fn read_inode(&self, ino: u64, data: &mut InodeData) -> KResult<()> {
            self.reads.set(self.reads.get() + 1);
            if self.fail {
                return Err(Errno::Io);
            }
            data.size = 100 + ino;
            data.nlinks = 1;
            Ok(())
        }
        fn write_inode(&self, _ino: u64, _data: &InodeData) -> KResult<()> {
            Ok(())
        }
        fn delete_inode(&self, _ino: u64, _data: &InodeData) -> KResult<()> {
            Ok(())
        }
    }

    #[test]
    fn fresh_inode_is_read_exactly_once_on_first_get() {
        let table = InodeTable::new();
        let sb = FakeSb {
            reads: core::cell::Cell::new(0),
            fail: false,
        };
        let p = parker();
        let inode = table.get(42, &sb, 1, &p).unwrap();
        assert!(inode.is_valid());
        assert_eq!(inode.data.acquire().size, 142);
        assert_eq!(sb.reads.get(), 1);

        // Second get against the same ino must not trigger another read.
        let inode2 = table.get(42, &sb, 1, &p).unwrap();
        assert!(Arc::ptr_eq(&inode, &inode2));
        assert_eq!(sb.reads.get(), 1);
    }

    #[test]
    fn failed_read_marks_bad_and_propagates_error() {
        let table = InodeTable::new();
        let sb = FakeSb {
            reads: core::cell::Cell::new(0),
            fail: true,
        };
        let p = parker();
        assert!(matches!(table.get(1, &sb, 1, &p), Err(Errno::Io)));
        // The failed inode was evicted; a retry allocates fresh and re-reads.
        assert_eq!(table.resident_count(), 0);
    }

    #[test]
    fn put_with_zero_nlinks_evicts_on_last_reference() {
        let table = InodeTable::new();
        let sb = FakeSb {
            reads: core::cell::Cell::new(0),
            fail: false,
        };
        let p = parker();
        let inode = table.get(7, &sb, 1, &p).unwrap();
        inode.set_nlinks(0);
        assert_eq!(table.resident_count(), 1);
        table.put(inode, &sb);
        assert_eq!(table.resident_count(), 0);
    }

    #[test]
    fn put_with_remaining_links_keeps_inode_resident() {
        let table = InodeTable::new();
        let sb = FakeSb {
            reads: core::cell::Cell::new(0),
            fail: false,
        };
        let p = parker();
        let inode = table.get(7, &sb, 1, &p).unwrap();
        table.put(inode, &sb);
        assert_eq!(table.resident_count(), 1, "nlinks=1, stays cached");
    }

    #[test]
    fn sync_all_writes_back_dirty_inodes_only() {
        let table = InodeTable::new();
        let sb = FakeSb {
            reads: core::cell::Cell::new(0),
            fail: false,
        };
        let p = parker();
        let a = table.get(1, &sb, 1, &p).unwrap();
        let _b = table.get(2, &sb, 1, &p).unwrap();
        a.mark_dirty();
        let synced = table.sync_all(&sb, true);
        assert_eq!(synced, 1);
        assert!(!a.flags().contains(InodeFlags::DIRTY));
    }
}
