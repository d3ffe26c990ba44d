//! Filesystem layer: the block cache, the inode lifecycle state machine,
//! the ext2 on-disk engine built on top of them, the pipe/FIFO ring, and
//! the `/proc` surface (spec §4.F, §4.G, §4.H, §4.I, §6).

pub mod block_cache;
pub mod ext2;
pub mod inode;
pub mod pipe;
pub mod procfs;
