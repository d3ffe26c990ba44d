//! Symlink target storage, grounded on
//! `examples/original_source/src/fs/ext2/symlink.c`'s `ext2_readlink`/
//! `ext2_follow_link`.
//!
//! ext2's classic optimization: when a target path fits in the 60 bytes an
//! inode otherwise spends on `block_ptrs` (`data.blocks == 0` marks this
//! case, same as the original's check), it's stored inline and no data
//! block is ever allocated for it. Longer targets fall back to an ordinary
//! single data block, read the same way file content would be.

use alloc::string::String;
use alloc::vec::Vec;

use super::bmap;
use super::Ext2Fs;
use crate::error::{Errno, KResult};
use crate::fs::inode::InodeData;
use crate::sync::mutex::Parker;

/// `block_ptrs` is `[u32; 15]`, i.e. 60 bytes — the inline fast-symlink
/// budget.
pub const MAX_INLINE_LEN: usize = 60;

fn block_ptrs_as_bytes(ptrs: &[u32; 15]) -> [u8; 60] {
    let mut out = [0u8; 60];
    for (i, p) in ptrs.iter().enumerate() {
        out[i * 4..i * 4 + 4].copy_from_slice(&p.to_le_bytes());
    }
    out
}

fn bytes_as_block_ptrs(bytes: &[u8; 60]) -> [u32; 15] {
    let mut out = [0u32; 15];
    for (i, chunk) in bytes.chunks_exact(4).enumerate() {
        out[i] = u32::from_le_bytes(chunk.try_into().unwrap());
    }
    out
}

/// Write `target` into `data`, inline if it fits, otherwise into a freshly
/// allocated data block.
pub fn set_target(
    fs: &Ext2Fs<'_>,
    data: &mut InodeData,
    target: &str,
    parker: &dyn Parker,
) -> KResult<()> {
    if target.len() > MAX_INLINE_LEN && target.len() as u64 > fs.block_size() as u64 {
        return Err(Errno::Inval);
    }

    if target.len() <= MAX_INLINE_LEN {
        let mut raw = [0u8; 60];
        raw[..target.len()].copy_from_slice(target.as_bytes());
        data.block_ptrs = bytes_as_block_ptrs(&raw);
        data.size = target.len() as u64;
        data.blocks = 0;
        return Ok(());
    }

    let physical = bmap::bmap_alloc(fs, data, 0, parker)?;
    let slot = fs.cache.slot_for(fs.device, physical as u64);
    let mut buf = fs.cache.read(&slot, fs.device, physical as u64, fs.source, parker)?;
    buf.data[..target.len()].copy_from_slice(target.as_bytes());
    buf.mark_dirty();
    buf.write_back(fs.source)?;
    data.size = target.len() as u64;
    Ok(())
}

/// `ext2_readlink`: recover the stored target, from the inline bytes when
/// `blocks == 0`, otherwise from the symlink's sole data block.
pub fn read_target(fs: &Ext2Fs<'_>, data: &InodeData, parker: &dyn Parker) -> KResult<String> {
    let len = data.size as usize;

    if data.blocks == 0 {
        let raw = block_ptrs_as_bytes(&data.block_ptrs);
        if len > raw.len() {
            return Err(Errno::Inval);
        }
        return Ok(String::from_utf8_lossy(&raw[..len]).into_owned());
    }

    let physical = bmap::bmap(fs, data, 0, parker)?.ok_or(Errno::Inval)?;
    let slot = fs.cache.slot_for(fs.device, physical as u64);
    let buf = fs.cache.read(&slot, fs.device, physical as u64, fs.source, parker)?;
    let bytes: Vec<u8> = buf.data[..len.min(buf.data.len())].to_vec();
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::collections::BTreeMap;
    use alloc::vec;
    use core::cell::RefCell;

    use crate::fs::block_cache::BlockSource;
    use crate::sync::waitqueue::TaskId;

    struct StubParker;
    impl Parker for StubParker {
        fn current(&self) -> TaskId {
            1
        }
        fn park_and_yield(&self, _id: TaskId, _interruptible: bool) {}
        fn wake(&self, _id: TaskId) -> bool {
            false
        }
    }

    struct MemDevice {
        blocks: RefCell<BTreeMap<u64, Vec<u8>>>,
        block_size: usize,
    }
    impl BlockSource for MemDevice {
        fn read_sector(&self, _device: u32, sector: u64, size: usize) -> KResult<Vec<u8>> {
            Ok(self.blocks.borrow().get(&sector).cloned().unwrap_or_else(|| vec![0u8; size]))
        }
        fn write_sector(&self, _device: u32, sector: u64, data: &[u8]) -> KResult<()> {
            self.blocks.borrow_mut().insert(sector, data.to_vec());
            Ok(())
        }
    }

    fn fresh_fs(dev: &MemDevice) -> Ext2Fs<'_> {
        Ext2Fs::format(0, dev, dev.block_size, 4096, 64, &StubParker).unwrap()
    }

    #[test]
    fn short_target_is_stored_inline_without_allocating_a_block() {
        let dev = MemDevice { blocks: RefCell::new(BTreeMap::new()), block_size: 1024 };
        let fs = fresh_fs(&dev);
        let mut data = InodeData::default();
        set_target(&fs, &mut data, "/bin/sh", &StubParker).unwrap();
        assert_eq!(data.blocks, 0);
        assert_eq!(read_target(&fs, &data, &StubParker).unwrap(), "/bin/sh");
    }

    #[test]
    fn long_target_spills_into_a_data_block() {
        let dev = MemDevice { blocks: RefCell::new(BTreeMap::new()), block_size: 1024 };
        let fs = fresh_fs(&dev);
        let mut data = InodeData::default();
        let long_target: String = "a".repeat(100);
        set_target(&fs, &mut data, &long_target, &StubParker).unwrap();
        assert_ne!(data.blocks, 0);
        assert_eq!(read_target(&fs, &data, &StubParker).unwrap(), long_target);
    }

    #[test]
    fn boundary_length_exactly_sixty_bytes_stays_inline() {
        let dev = MemDevice { blocks: RefCell::new(BTreeMap::new()), block_size: 1024 };
        let fs = fresh_fs(&dev);
        let mut data = InodeData::default();
        let target: String = "b".repeat(MAX_INLINE_LEN);
        set_target(&fs, &mut data, &target, &StubParker).unwrap();
        assert_eq!(data.blocks, 0);
        assert_eq!(read_target(&fs, &data, &StubParker).unwrap(), target);
    }
}
