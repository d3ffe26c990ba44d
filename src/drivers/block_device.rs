//! The seam between `fs::block_cache::BlockSource` and a real disk driver
//! (spec §4.J: "other device drivers hang off the same... block-device
//! abstraction"). A `BlockDevice` is the narrow synchronous read/write
//! contract a driver like `drivers::ata::AtaDrive` implements; `block_cache`
//! talks to it only through `BlockSource`, never knowing which driver is
//! underneath.

use alloc::vec::Vec;

use crate::error::KResult;

pub trait BlockDevice {
    fn sector_size(&self) -> usize;
    fn sector_count(&self) -> u64;
    fn read_sector(&self, sector: u64) -> KResult<Vec<u8>>;
    fn write_sector(&self, sector: u64, data: &[u8]) -> KResult<()>;
}
