pub mod bitmap;

use crate::bio::{bread, brelse};
use crate::string::memmove;

/// block size equals the buffer payload and the page size.
pub const BSIZE: usize = 4096;

pub const FSMAGIC: u32 = 0x7465726e; // "tern"

/// On-disk layout, recorded in the superblock at block 1. Each bitmap
/// covers the blocks immediately after it (bit i of the bitmap at
/// block B stands for block B + 1 + i):
///   [ boot | superblock | inode bitmap | inodes | data bitmap | data ]
#[repr(C)]
#[derive(Copy, Clone)]
pub struct SuperBlock {
    pub magic: u32,
    pub size: u32,    // total blocks on the device
    pub nblocks: u32, // data blocks
    pub ninodes: u32,
    pub data_bitmap_start: u32,
    pub inode_bitmap_start: u32,
    pub inode_start: u32,
    pub data_start: u32,
}

pub static mut SB: SuperBlock = SuperBlock {
    magic: 0,
    size: 0,
    nblocks: 0,
    ninodes: 0,
    data_bitmap_start: 0,
    inode_bitmap_start: 0,
    inode_start: 0,
    data_start: 0,
};

fn readsb(dev: u32) {
    let bp = bread(dev, 1);
    memmove(
        unsafe { &mut SB } as *mut SuperBlock as *mut u8,
        bp.data.as_ptr(),
        core::mem::size_of::<SuperBlock>(),
    );
    brelse(bp);
}

// Read the superblock. Must run in process context: the first disk
// read sleeps. An unformatted disk gets a default geometry so the
// bitmap syscalls still work on a blank image.
pub fn fsinit(dev: u32) {
    readsb(dev);
    let sb = unsafe { &mut SB };
    if sb.magic != FSMAGIC {
        log::warn!("fs: no filesystem magic, using default layout");
        sb.magic = FSMAGIC;
        sb.size = 2048;
        sb.inode_bitmap_start = 2;
        sb.inode_start = 3;
        sb.data_bitmap_start = 35;
        sb.data_start = 36;
        sb.ninodes = 32;
        sb.nblocks = sb.size - sb.data_start;
    }
    log::info!(
        "fs: {} blocks, data bitmap at {}, inode bitmap at {}",
        sb.size,
        sb.data_bitmap_start,
        sb.inode_bitmap_start
    );
}
