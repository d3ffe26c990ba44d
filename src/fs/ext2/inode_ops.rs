//! `SuperOps` wiring plus the inode-level operations (`create`, `mkdir`,
//! `unlink`, `rmdir`) that sit on top of `dir.rs`'s entry primitives.
//!
//! Grounded on `examples/original_source/src/fs/ext2/ialloc.c`'s
//! `ext2_inode_new` (bitmap allocation, locating the on-disk record) and
//! `file.c`'s `ext2_inode_ops_file` (`truncate`/`bmap` wiring — already
//! covered by `truncate.rs`/`bmap.rs` directly).
//!
//! Open question resolved here: `examples/original_source/src/fs/ext2/dir.c`
//! leaves `ext2_dir_mkdir` an empty stub — it was never finished upstream. This
//! implements it the conventional way: allocate a fresh inode, write `.`
//! and `..` into its (also freshly allocated) first data block, link the
//! new directory into its parent, and bump the parent's `nlinks` since the
//! child's `..` now points back at it.

use super::dir;
use super::Ext2Fs;
use crate::error::{Errno, KResult};
use crate::fs::inode::{InodeData, SuperOps};
use crate::sync::mutex::Parker;

pub const S_IFREG: u32 = 0o100000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFLNK: u32 = 0o120000;

pub const FT_REG_FILE: u8 = 1;
pub const FT_DIR: u8 = 2;
pub const FT_SYMLINK: u8 = 7;

fn inode_location(fs: &Ext2Fs<'_>, ino: u64) -> KResult<(u32, usize, usize)> {
    let sb = fs.sb.acquire();
    let zero_based = ino - 1;
    let group_idx = (zero_based / sb.inodes_per_group as u64) as usize;
    let idx_in_group = (zero_based % sb.inodes_per_group as u64) as usize;
    let group = sb.groups.get(group_idx).ok_or(Errno::Inval)?;

    let byte_offset = idx_in_group * sb.inode_size;
    let block = group.inode_table + (byte_offset / sb.block_size) as u32;
    let offset_in_block = byte_offset % sb.block_size;
    Ok((block, offset_in_block, sb.inode_size))
}

fn serialize(data: &InodeData, out: &mut [u8]) {
    out[0..4].copy_from_slice(&data.mode.to_le_bytes());
    out[4..8].copy_from_slice(&data.nlinks.to_le_bytes());
    out[8..16].copy_from_slice(&data.size.to_le_bytes());
    out[16..20].copy_from_slice(&data.uid.to_le_bytes());
    out[20..24].copy_from_slice(&data.gid.to_le_bytes());
    out[24..32].copy_from_slice(&data.atime.to_le_bytes());
    out[32..40].copy_from_slice(&data.mtime.to_le_bytes());
    out[40..48].copy_from_slice(&data.ctime.to_le_bytes());
    for (i, ptr) in data.block_ptrs.iter().enumerate() {
        let off = 48 + i * 4;
        out[off..off + 4].copy_from_slice(&ptr.to_le_bytes());
    }
    out[108..116].copy_from_slice(&data.blocks.to_le_bytes());
}

fn deserialize(raw: &[u8]) -> InodeData {
    let mut block_ptrs = [0u32; 15];
    for (i, ptr) in block_ptrs.iter_mut().enumerate() {
        let off = 48 + i * 4;
        *ptr = u32::from_le_bytes(raw[off..off + 4].try_into().unwrap());
    }
    InodeData {
        mode: u32::from_le_bytes(raw[0..4].try_into().unwrap()),
        nlinks: u32::from_le_bytes(raw[4..8].try_into().unwrap()),
        size: u64::from_le_bytes(raw[8..16].try_into().unwrap()),
        uid: u32::from_le_bytes(raw[16..20].try_into().unwrap()),
        gid: u32::from_le_bytes(raw[20..24].try_into().unwrap()),
        atime: u64::from_le_bytes(raw[24..32].try_into().unwrap()),
        mtime: u64::from_le_bytes(raw[32..40].try_into().unwrap()),
        ctime: u64::from_le_bytes(raw[40..48].try_into().unwrap()),
        block_ptrs,
        blocks: u64::from_le_bytes(raw[108..116].try_into().unwrap()),
    }
}

/// The `SuperOps` seam `fs::inode::InodeTable` fills inodes through. Bundles
/// a `Parker` because `SuperOps`'s methods don't take one, but every disk
/// access below the block cache may need to park a sleeping task.
pub struct Ext2SuperOps<'a> {
    pub fs: &'a Ext2Fs<'a>,
    pub parker: &'a dyn Parker,
}

impl<'a> SuperOps for Ext2SuperOps<'a> {
    fn read_inode(&self, ino: u64, data: &mut InodeData) -> KResult<()> {
        let (block, offset, inode_size) = inode_location(self.fs, ino)?;
        let slot = self.fs.cache.slot_for(self.fs.device, block as u64);
        let buf = self.fs.cache.read(&slot, self.fs.device, block as u64, self.fs.source, self.parker)?;
        *data = deserialize(&buf.data[offset..offset + inode_size]);
        Ok(())
    }

    fn write_inode(&self, ino: u64, data: &InodeData) -> KResult<()> {
        let (block, offset, inode_size) = inode_location(self.fs, ino)?;
        let slot = self.fs.cache.slot_for(self.fs.device, block as u64);
        let mut buf = self.fs.cache.read(&slot, self.fs.device, block as u64, self.fs.source, self.parker)?;
        serialize(data, &mut buf.data[offset..offset + inode_size]);
        buf.mark_dirty();
        buf.write_back(self.fs.source)
    }

    fn delete_inode(&self, ino: u64, data: &InodeData) -> KResult<()> {
        let mut cleared = data.clone();
        super::truncate::truncate(self.fs, &mut cleared, 0, self.parker)?;
        self.fs.release_inode(ino, self.parker)
    }
}

/// `ext2_inode_new`: reserve a fresh inode number and an initialized
/// on-disk record for it.
pub fn inode_new(fs: &Ext2Fs<'_>, mode: u32, parker: &dyn Parker) -> KResult<(u64, InodeData)> {
    let ino = fs.alloc_inode(parker)?;
    let data = InodeData {
        mode,
        nlinks: 1,
        ..InodeData::default()
    };
    let ops = Ext2SuperOps { fs, parker };
    ops.write_inode(ino, &data)?;
    Ok((ino, data))
}

/// Create a regular file entry in `parent_data` / on-disk parent directory.
pub fn create(
    fs: &Ext2Fs<'_>,
    parent_ino: u64,
    parent_data: &mut InodeData,
    name: &str,
    mode: u32,
    parker: &dyn Parker,
) -> KResult<u64> {
    if dir::entry_exists(fs, parent_data, name, parker)? {
        return Err(Errno::Exist);
    }
    let (ino, _) = inode_new(fs, S_IFREG | (mode & 0o7777), parker)?;
    dir::add(fs, parent_data, name, ino, FT_REG_FILE, parker)?;
    let ops = Ext2SuperOps { fs, parker };
    ops.write_inode(parent_ino, parent_data)?;
    Ok(ino)
}

/// `ext2_dir_mkdir`, left unimplemented upstream: allocate a directory
/// inode, seed it with `.`/`..`, link it into `parent_data`, and bump the
/// parent's link count for the new `..` pointing back at it.
pub fn mkdir(
    fs: &Ext2Fs<'_>,
    parent_ino: u64,
    parent_data: &mut InodeData,
    name: &str,
    mode: u32,
    parker: &dyn Parker,
) -> KResult<u64> {
    if dir::entry_exists(fs, parent_data, name, parker)? {
        return Err(Errno::Exist);
    }

    let (ino, mut dir_data) = inode_new(fs, S_IFDIR | (mode & 0o7777), parker)?;
    dir_data.nlinks = 2;
    dir::add(fs, &mut dir_data, ".", ino, FT_DIR, parker)?;
    dir::add(fs, &mut dir_data, "..", parent_ino, FT_DIR, parker)?;

    let ops = Ext2SuperOps { fs, parker };
    ops.write_inode(ino, &dir_data)?;

    dir::add(fs, parent_data, name, ino, FT_DIR, parker)?;
    parent_data.nlinks += 1;
    ops.write_inode(parent_ino, parent_data)?;

    Ok(ino)
}

/// Remove a non-directory entry and drop its link count to zero so
/// `fs::inode::InodeTable::put` reclaims it on last close.
pub fn unlink(
    fs: &Ext2Fs<'_>,
    parent_ino: u64,
    parent_data: &mut InodeData,
    name: &str,
    target_data: &mut InodeData,
    parker: &dyn Parker,
) -> KResult<()> {
    dir::remove(fs, parent_data, name, parker)?;
    let ops = Ext2SuperOps { fs, parker };
    ops.write_inode(parent_ino, parent_data)?;

    target_data.nlinks = target_data.nlinks.saturating_sub(1);
    Ok(())
}

/// Remove an empty directory entry (caller has already verified it holds
/// only `.`/`..`) and unwind the parent's extra link.
pub fn rmdir(
    fs: &Ext2Fs<'_>,
    parent_ino: u64,
    parent_data: &mut InodeData,
    name: &str,
    dir_data: &InodeData,
    parker: &dyn Parker,
) -> KResult<()> {
    let entries = dir::list(fs, dir_data, parker)?;
    if entries.iter().any(|e| e.name != "." && e.name != "..") {
        return Err(Errno::NotEmpty);
    }

    dir::remove(fs, parent_data, name, parker)?;
    parent_data.nlinks = parent_data.nlinks.saturating_sub(1);
    let ops = Ext2SuperOps { fs, parker };
    ops.write_inode(parent_ino, parent_data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::collections::BTreeMap;
    use alloc::vec;
    use alloc::vec::Vec;
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

    fn root_data() -> InodeData {
        InodeData { mode: S_IFDIR | 0o755, nlinks: 2, ..InodeData::default() }
    }

    #[test]
    fn inode_new_round_trips_through_super_ops() {
        let dev = MemDevice { blocks: RefCell::new(BTreeMap::new()), block_size: 1024 };
        let fs = fresh_fs(&dev);
        let (ino, data) = inode_new(&fs, S_IFREG | 0o644, &StubParker).unwrap();
        assert_eq!(data.mode, S_IFREG | 0o644);

        let ops = Ext2SuperOps { fs: &fs, parker: &StubParker };
        let mut read_back = InodeData::default();
        ops.read_inode(ino, &mut read_back).unwrap();
        assert_eq!(read_back.mode, S_IFREG | 0o644);
        assert_eq!(read_back.nlinks, 1);
    }

    #[test]
    fn mkdir_links_dot_dot_and_bumps_parent_nlinks() {
        let dev = MemDevice { blocks: RefCell::new(BTreeMap::new()), block_size: 1024 };
        let fs = fresh_fs(&dev);
        let mut parent = root_data();
        let child_ino = mkdir(&fs, 2, &mut parent, "sub", 0o755, &StubParker).unwrap();
        assert_eq!(parent.nlinks, 3);

        let ops = Ext2SuperOps { fs: &fs, parker: &StubParker };
        let mut child = InodeData::default();
        ops.read_inode(child_ino, &mut child).unwrap();
        assert_eq!(child.nlinks, 2);

        assert_eq!(dir::lookup(&fs, &child, ".", &StubParker).unwrap(), child_ino);
        assert_eq!(dir::lookup(&fs, &child, "..", &StubParker).unwrap(), 2);
        assert_eq!(dir::lookup(&fs, &parent, "sub", &StubParker).unwrap(), child_ino);
    }

    #[test]
    fn mkdir_of_existing_name_fails_with_exist() {
        let dev = MemDevice { blocks: RefCell::new(BTreeMap::new()), block_size: 1024 };
        let fs = fresh_fs(&dev);
        let mut parent = root_data();
        mkdir(&fs, 2, &mut parent, "sub", 0o755, &StubParker).unwrap();
        assert_eq!(mkdir(&fs, 2, &mut parent, "sub", 0o755, &StubParker), Err(Errno::Exist));
    }

    #[test]
    fn rmdir_rejects_non_empty_directory() {
        let dev = MemDevice { blocks: RefCell::new(BTreeMap::new()), block_size: 1024 };
        let fs = fresh_fs(&dev);
        let mut parent = root_data();
        let child_ino = mkdir(&fs, 2, &mut parent, "sub", 0o755, &StubParker).unwrap();

        let ops = Ext2SuperOps { fs: &fs, parker: &StubParker };
        let mut child = InodeData::default();
        ops.read_inode(child_ino, &mut child).unwrap();
        create(&fs, child_ino, &mut child, "file.txt", 0o644, &StubParker).unwrap();

        assert_eq!(rmdir(&fs, 2, &mut parent, "sub", &child, &StubParker), Err(Errno::NotEmpty));
    }

    #[test]
    fn unlink_drops_target_nlinks_to_zero() {
        let dev = MemDevice { blocks: RefCell::new(BTreeMap::new()), block_size: 1024 };
        let fs = fresh_fs(&dev);
        let mut parent = root_data();
        let file_ino = create(&fs, 2, &mut parent, "file.txt", 0o644, &StubParker).unwrap();

        let ops = Ext2SuperOps { fs: &fs, parker: &StubParker };
        let mut file_data = InodeData::default();
        ops.read_inode(file_ino, &mut file_data).unwrap();

        unlink(&fs, 2, &mut parent, "file.txt", &mut file_data, &StubParker).unwrap();
        assert_eq!(file_data.nlinks, 0);
        assert_eq!(dir::lookup(&fs, &parent, "file.txt", &StubParker), Err(Errno::NoEnt));
    }
}
