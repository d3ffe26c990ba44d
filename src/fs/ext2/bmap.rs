//! Logical-to-physical block mapping, ported from
//! `examples/original_source/src/fs/ext2/bmap.c`'s `ext2_bmap`/
//! `ext2_bmap_alloc` and its `ext2_map_{indirect,dindirect,tindirect}`
//! helpers — same direct/single/double/triple indirection walk, addressed
//! through the flat 15-entry `block_ptrs` array (see module doc on
//! `fs::ext2`).

use super::{Ext2Fs, DIRECT_PTRS, DOUBLE_INDIRECT, SINGLE_INDIRECT, TRIPLE_INDIRECT};
use crate::error::KResult;
use crate::fs::inode::InodeData;
use crate::sync::mutex::Parker;

/// Resolve `logical_block` (0-based, in units of the fs block size) to a
/// physical block number, or `None` if unmapped (a hole).
pub fn bmap(
    fs: &Ext2Fs<'_>,
    data: &InodeData,
    logical_block: u64,
    parker: &dyn Parker,
) -> KResult<Option<u32>> {
    let ptrs = fs.ptrs_per_block() as u64;
    let mut n = logical_block;

    if n < DIRECT_PTRS as u64 {
        let p = data.block_ptrs[n as usize];
        return Ok(if p == 0 { None } else { Some(p) });
    }
    n -= DIRECT_PTRS as u64;

    if n < ptrs {
        let single = data.block_ptrs[SINGLE_INDIRECT];
        if single == 0 {
            return Ok(None);
        }
        let p = fs.read_u32_at(single, n as usize, parker)?;
        return Ok(if p == 0 { None } else { Some(p) });
    }
    n -= ptrs;

    if n < ptrs * ptrs {
        let double = data.block_ptrs[DOUBLE_INDIRECT];
        if double == 0 {
            return Ok(None);
        }
        let single_idx = n / ptrs;
        let direct_idx = n % ptrs;
        let single = fs.read_u32_at(double, single_idx as usize, parker)?;
        if single == 0 {
            return Ok(None);
        }
        let p = fs.read_u32_at(single, direct_idx as usize, parker)?;
        return Ok(if p == 0 { None } else { Some(p) });
    }
    n -= ptrs * ptrs;

    if n < ptrs * ptrs * ptrs {
        let triple = data.block_ptrs[TRIPLE_INDIRECT];
        if triple == 0 {
            return Ok(None);
        }
        let double_idx = n / ptrs / ptrs;
        let single_idx = (n / ptrs) % ptrs;
        let direct_idx = n % ptrs;
        let double = fs.read_u32_at(triple, double_idx as usize, parker)?;
        if double == 0 {
            return Ok(None);
        }
        let single = fs.read_u32_at(double, single_idx as usize, parker)?;
        if single == 0 {
            return Ok(None);
        }
        let p = fs.read_u32_at(single, direct_idx as usize, parker)?;
        return Ok(if p == 0 { None } else { Some(p) });
    }

    Ok(None)
}

/// Resolve `logical_block`, allocating and wiring up every level (indirect
/// blocks included) needed to map it if it was a hole.
pub fn bmap_alloc(
    fs: &Ext2Fs<'_>,
    data: &mut InodeData,
    logical_block: u64,
    parker: &dyn Parker,
) -> KResult<u32> {
    if let Some(existing) = bmap(fs, data, logical_block, parker)? {
        return Ok(existing);
    }

    let physical = fs.alloc_block_zeroed(parker)?;
    let ptrs = fs.ptrs_per_block() as u64;
    let mut n = logical_block;

    if n < DIRECT_PTRS as u64 {
        data.block_ptrs[n as usize] = physical;
    } else {
        n -= DIRECT_PTRS as u64;
        if n < ptrs {
            map_single(fs, data, SINGLE_INDIRECT, n, physical, parker)?;
        } else {
            n -= ptrs;
            if n < ptrs * ptrs {
                map_double(fs, data, n, ptrs, physical, parker)?;
            } else {
                n -= ptrs * ptrs;
                if n < ptrs * ptrs * ptrs {
                    map_triple(fs, data, n, ptrs, physical, parker)?;
                } else {
                    fs.release_block(physical, parker)?;
                    return Err(crate::error::Errno::NoSpc); // file too large
                }
            }
        }
    }

    data.blocks += (fs.block_size() / 512) as u64;
    Ok(physical)
}

fn ensure_indirect_block(
    fs: &Ext2Fs<'_>,
    slot: &mut u32,
    parker: &dyn Parker,
) -> KResult<u32> {
    if *slot == 0 {
        *slot = fs.alloc_block_zeroed(parker)?;
    }
    Ok(*slot)
}

fn map_single(
    fs: &Ext2Fs<'_>,
    data: &mut InodeData,
    ptr_idx: usize,
    direct_idx: u64,
    physical: u32,
    parker: &dyn Parker,
) -> KResult<()> {
    let block = ensure_indirect_block(fs, &mut data.block_ptrs[ptr_idx], parker)?;
    fs.write_u32_at(block, direct_idx as usize, physical, parker)
}

fn map_double(
    fs: &Ext2Fs<'_>,
    data: &mut InodeData,
    n: u64,
    ptrs: u64,
    physical: u32,
    parker: &dyn Parker,
) -> KResult<()> {
    let single_idx = (n / ptrs) as usize;
    let direct_idx = (n % ptrs) as usize;

    let double_block = ensure_indirect_block(fs, &mut data.block_ptrs[DOUBLE_INDIRECT], parker)?;
    let mut single_block = fs.read_u32_at(double_block, single_idx, parker)?;
    if single_block == 0 {
        single_block = fs.alloc_block_zeroed(parker)?;
        fs.write_u32_at(double_block, single_idx, single_block, parker)?;
    }
    fs.write_u32_at(single_block, direct_idx, physical, parker)
}

fn map_triple(
    fs: &Ext2Fs<'_>,
    data: &mut InodeData,
    n: u64,
    ptrs: u64,
    physical: u32,
    parker: &dyn Parker,
) -> KResult<()> {
    let double_idx = (n / ptrs / ptrs) as usize;
    let single_idx = ((n / ptrs) % ptrs) as usize;
    let direct_idx = (n % ptrs) as usize;

    let triple_block = ensure_indirect_block(fs, &mut data.block_ptrs[TRIPLE_INDIRECT], parker)?;
    let mut double_block = fs.read_u32_at(triple_block, double_idx, parker)?;
    if double_block == 0 {
        double_block = fs.alloc_block_zeroed(parker)?;
        fs.write_u32_at(triple_block, double_idx, double_block, parker)?;
    }
    let mut single_block = fs.read_u32_at(double_block, single_idx, parker)?;
    if single_block == 0 {
        single_block = fs.alloc_block_zeroed(parker)?;
        fs.write_u32_at(double_block, single_idx, single_block, parker)?;
    }
    fs.write_u32_at(single_block, direct_idx, physical, parker)
}

/// Clear the pointer to `logical_block`'s mapping without releasing any
/// indirect blocks it passes through (`truncate` releases those separately
/// once every pointer within them is clear).
pub fn bmap_clear(
    fs: &Ext2Fs<'_>,
    data: &mut InodeData,
    logical_block: u64,
    parker: &dyn Parker,
) -> KResult<()> {
    let ptrs = fs.ptrs_per_block() as u64;
    let mut n = logical_block;

    if n < DIRECT_PTRS as u64 {
        data.block_ptrs[n as usize] = 0;
        return Ok(());
    }
    n -= DIRECT_PTRS as u64;

    if n < ptrs {
        let single = data.block_ptrs[SINGLE_INDIRECT];
        if single != 0 {
            fs.write_u32_at(single, n as usize, 0, parker)?;
        }
        return Ok(());
    }
    n -= ptrs;

    if n < ptrs * ptrs {
        let double = data.block_ptrs[DOUBLE_INDIRECT];
        if double != 0 {
            let single_idx = (n / ptrs) as usize;
            let direct_idx = (n % ptrs) as usize;
            let single = fs.read_u32_at(double, single_idx, parker)?;
            if single != 0 {
                fs.write_u32_at(single, direct_idx, 0, parker)?;
            }
        }
        return Ok(());
    }
    n -= ptrs * ptrs;

    let triple = data.block_ptrs[TRIPLE_INDIRECT];
    if triple != 0 {
        let double_idx = (n / ptrs / ptrs) as usize;
        let single_idx = ((n / ptrs) % ptrs) as usize;
        let direct_idx = (n % ptrs) as usize;
        let double = fs.read_u32_at(triple, double_idx, parker)?;
        if double != 0 {
            let single = fs.read_u32_at(double, single_idx, parker)?;
            if single != 0 {
                fs.write_u32_at(single, direct_idx, 0, parker)?;
            }
        }
    }
    Ok(())
}
