//! Fixed-size buffer pool keyed by `(device, sector)` (spec §4.F).
//!
//! Two concurrent callers for the same `(dev, sector)` must serialize
//! through the same buffer: `slot_for` makes that the data structure's job
//! by returning a shared handle (`alloc::sync::Arc`) to one cache entry
//! rather than handing out a copy. The caller locks the slot's mutex itself
//! and keeps the `Arc` alive for as long as the guard — ordinary borrow
//! checking, no unsafe lifetime games needed.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use crate::config::BLOCK_CACHE_SIZE;
use crate::error::KResult;
use crate::sync::mutex::{Mutex, MutexGuard, Parker};
use crate::sync::spinlock::IrqSpinlock;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BufferFlags: u32 {
        const VALID = 1 << 0;
        const DIRTY = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BufferKey {
    pub device: u32,
    pub sector: u64,
}

pub struct Buffer {
    pub key: BufferKey,
    pub flags: BufferFlags,
    pub data: Vec<u8>,
}

impl Buffer {
    /// `block_mark_dirty`.
    pub fn mark_dirty(&mut self) {
        self.flags.insert(BufferFlags::DIRTY);
    }

    /// `block_mark_synced`.
    pub fn mark_synced(&mut self) {
        self.flags.remove(BufferFlags::DIRTY);
    }

    pub fn write_back(&mut self, source: &dyn BlockSource) -> KResult<()> {
        source.write_sector(self.key.device, self.key.sector, &self.data)?;
        self.flags.remove(BufferFlags::DIRTY);
        Ok(())
    }
}

/// Reads and writes the backing device; implemented by
/// `drivers::block_device::BlockDevice` adapters.
pub trait BlockSource {
    fn read_sector(&self, device: u32, sector: u64, size: usize) -> KResult<Vec<u8>>;
    fn write_sector(&self, device: u32, sector: u64, data: &[u8]) -> KResult<()>;
}

/// One cache slot: a sleepable mutex around buffer content, matching spec
/// §5 ("sleepable mutexes guard... per-block-cache entry during I/O").
pub struct Slot {
    pub inner: Mutex<Buffer>,
}

impl Slot {
    pub fn lock<'a>(&'a self, parker: &dyn Parker) -> MutexGuard<'a, Buffer> {
        self.inner.lock(parker)
    }
}

pub struct BlockCache {
    slots: IrqSpinlock<BTreeMap<BufferKey, Arc<Slot>>>,
    capacity: usize,
    sector_size: usize,
}

impl BlockCache {
    pub fn new(sector_size: usize) -> Self {
        BlockCache {
            slots: IrqSpinlock::new(BTreeMap::new()),
            capacity: BLOCK_CACHE_SIZE,
            sector_size,
        }
    }

    /// `block_getlock` (spec §4.F): the shared slot for `(device, sector)`,
    /// created empty (`!VALID`) if this is the first reference.
    pub fn slot_for(&self, device: u32, sector: u64) -> Arc<Slot> {
        let key = BufferKey { device, sector };
        let mut slots = self.slots.acquire();
        if let Some(existing) = slots.get(&key) {
            return existing.clone();
        }
        let fresh = Arc::new(Slot {
            inner: Mutex::new(Buffer {
                key,
                flags: BufferFlags::empty(),
                data: vec![0u8; self.sector_size],
            }),
        });
        slots.insert(key, fresh.clone());
        fresh
    }

    /// `bread` (spec §4.F): lock the slot and, if not already VALID, read
    /// its content from `source` before returning the guard.
    pub fn read<'a>(
        &self,
        slot: &'a Slot,
        device: u32,
        sector: u64,
        source: &dyn BlockSource,
        parker: &dyn Parker,
    ) -> KResult<MutexGuard<'a, Buffer>> {
        let mut guard = slot.lock(parker);
        if !guard.flags.contains(BufferFlags::VALID) {
            guard.data = source.read_sector(device, sector, self.sector_size)?;
            guard.flags.insert(BufferFlags::VALID);
        }
        Ok(guard)
    }

    pub fn len(&self) -> usize {
        self.slots.acquire().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Evict every slot with no outstanding reference beyond our own map
    /// entry and not currently locked — a coarse stand-in for the inode
    /// table's OOM-trim policy (§4.G), applied here to buffers instead.
    pub fn trim_unreferenced(&self) -> usize {
        let mut slots = self.slots.acquire();
        let before = slots.len();
        slots.retain(|_, slot| Arc::strong_count(slot) > 1 || slot.inner.is_locked());
        before - slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::collections::BTreeSet;
    use core::cell::RefCell;

    struct StubParker {
        current: u64,
        parked: RefCell<BTreeSet<u64>>,
    }

    impl Parker for StubParker {
        fn current(&self) -> u64 {
            self.current
        }
        fn park_and_yield(&self, id: u64, _interruptible: bool) {
            self.parked.borrow_mut().insert(id);
        }
        fn wake(&self, id: u64) -> bool {
            self.parked.borrow_mut().remove(&id)
        }
    }

    struct MemDevice {
        sectors: IrqSpinlock<BTreeMap<(u32, u64), Vec<u8>>>,
    }

    impl BlockSource for MemDevice {
        fn read_sector(&self, device: u32, sector: u64, size: usize) -> KResult<Vec<u8>> {
            Ok(self
                .sectors
                .acquire()
                .get(&(device, sector))
                .cloned()
                .unwrap_or_else(|| vec![0u8; size]))
        }
        fn write_sector(&self, device: u32, sector: u64, data: &[u8]) -> KResult<()> {
            self.sectors
                .acquire()
                .insert((device, sector), data.to_vec());
            Ok(())
        }
    }

    fn parker() -> StubParker {
        StubParker {
            current: 1,
            parked: RefCell::new(BTreeSet::new()),
        }
    }

    #[test]
    fn read_then_reread_hits_same_slot_without_second_device_read() {
        let cache = BlockCache::new(512);
        let dev = MemDevice {
            sectors: IrqSpinlock::new(BTreeMap::new()),
        };
        dev.write_sector(0, 5, &[7u8; 512]).unwrap();
        let p = parker();
        let slot = cache.slot_for(0, 5);

        {
            let mut b = cache.read(&slot, 0, 5, &dev, &p).unwrap();
            assert!(b.flags.contains(BufferFlags::VALID));
            assert_eq!(b.data[0], 7);
            b.data[0] = 9;
            b.mark_dirty();
        }
        let b2 = cache.read(&slot, 0, 5, &dev, &p).unwrap();
        // Still cached in-memory with our mutation, not re-read from disk.
        assert_eq!(b2.data[0], 9);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn distinct_sectors_get_distinct_slots() {
        let cache = BlockCache::new(512);
        let dev = MemDevice {
            sectors: IrqSpinlock::new(BTreeMap::new()),
        };
        let p = parker();
        let a = cache.slot_for(0, 1);
        let b = cache.slot_for(0, 2);
        let _ = cache.read(&a, 0, 1, &dev, &p).unwrap();
        let _ = cache.read(&b, 0, 2, &dev, &p).unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn concurrent_lookups_for_same_key_share_one_slot() {
        let cache = BlockCache::new(512);
        let a = cache.slot_for(3, 9);
        let b = cache.slot_for(3, 9);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn write_back_clears_dirty_and_persists() {
        let cache = BlockCache::new(512);
        let dev = MemDevice {
            sectors: IrqSpinlock::new(BTreeMap::new()),
        };
        let p = parker();
        let slot = cache.slot_for(0, 3);
        {
            let mut b = cache.read(&slot, 0, 3, &dev, &p).unwrap();
            b.data[0] = 42;
            b.mark_dirty();
            b.write_back(&dev).unwrap();
            assert!(!b.flags.contains(BufferFlags::DIRTY));
        }
        assert_eq!(dev.read_sector(0, 3, 512).unwrap()[0], 42);
    }
}
