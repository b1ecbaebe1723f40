// On-disk bitmap allocators for data blocks and inodes.
//
// Each bitmap is a single block of the device; bit i of the bitmap at
// block B stands for block (or inode) number B + 1 + i. Allocation is
// first-clear-bit, so freed numbers are re-handed out in ascending
// order. All access goes through the buffer cache; nothing is synced
// explicitly, the cache's write-back-on-eviction covers persistence.

use crate::bio::{bread, brelse};
use crate::fs::{BSIZE, SB};
use crate::param::ROOTDEV;
use crate::string::memset;

// search the bitmap for a clear bit, set it, and return the number it
// stands for. Running out of bits is fatal.
fn bitmap_search_and_set(bitmap_block: u32) -> u32 {
    let bp = bread(ROOTDEV, bitmap_block);
    for i in 0..BSIZE * 8 {
        let m = 1u8 << (i % 8);
        if bp.data[i / 8] & m == 0 {
            bp.data[i / 8] |= m;
            brelse(bp);
            return bitmap_block + 1 + i as u32;
        }
    }
    panic!("bitmap_search_and_set: no free block");
}

// clear the bit standing for num in the bitmap at bitmap_block.
// clearing an already-clear bit means a double free.
fn bitmap_unset(bitmap_block: u32, num: u32) {
    let bp = bread(ROOTDEV, bitmap_block);
    let i = (num - (bitmap_block + 1)) as usize;
    let m = 1u8 << (i % 8);
    if bp.data[i / 8] & m == 0 {
        panic!("bitmap_unset: freeing free bit");
    }
    bp.data[i / 8] &= !m;
    brelse(bp);
}

/// Allocate a zeroed data block; returns its block number.
pub fn alloc_block() -> u32 {
    let num = bitmap_search_and_set(unsafe { SB.data_bitmap_start });
    let bp = bread(ROOTDEV, num);
    memset(bp.data.as_mut_ptr(), 0, BSIZE);
    brelse(bp);
    num
}

/// Free a data block.
pub fn free_block(num: u32) {
    bitmap_unset(unsafe { SB.data_bitmap_start }, num);
}

/// Allocate an inode number and zero its backing block.
pub fn alloc_inode() -> u32 {
    let num = bitmap_search_and_set(unsafe { SB.inode_bitmap_start });
    let bp = bread(ROOTDEV, num);
    memset(bp.data.as_mut_ptr(), 0, BSIZE);
    brelse(bp);
    num
}

/// Free an inode number.
pub fn free_inode(num: u32) {
    bitmap_unset(unsafe { SB.inode_bitmap_start }, num);
}

// Print the allocated bit numbers of a bitmap block.
// for debug
pub fn bitmap_print(bitmap_block: u32) {
    use crate::printf;

    let bp = bread(ROOTDEV, bitmap_block);
    printf!("bitmap {}:", bitmap_block);
    for i in 0..BSIZE * 8 {
        let m = 1u8 << (i % 8);
        if bp.data[i / 8] & m != 0 {
            printf!(" {}", i);
        }
    }
    printf!("\n");
    brelse(bp);
}
