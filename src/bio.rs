// Buffer cache.
//
// The buffer cache holds cached copies of disk block contents in a
// fixed pool of buffers threaded onto one circular list ordered by
// recency. Caching disk blocks in memory reduces the number of disk
// reads and also provides a synchronization point for blocks used by
// multiple processes.
//
// Interface:
// * To get a buffer for a particular disk block, call bread.
// * After changing buffer data, call bwrite to force it to disk.
// * When done with the buffer, call brelse.
// * Do not use the buffer after calling brelse.
//
// A buffer that is recycled for a new block first writes its old
// contents back to disk, so a block's on-disk image is synchronized
// no later than its buffer's reuse (lazy write-back).
//
// The cache-wide spinlock protects the list links, refcnt, dev and
// blockno of every buffer; the per-buffer sleeplock protects the
// payload. The cache lock is never held while acquiring a sleeplock's
// wait, and sleeplocks are acquired only after the cache lock is
// released.

use crate::buf::{Buf, BLOCKNO_NONE};
use crate::param::NBUF;
use crate::spinlock::Spinlock;
use crate::virtio::virtio_disk::virtio_disk_rw;

// the list sentinel lives at index NBUF; buffers are 0..NBUF.
// next[HEAD] is the most recently used buffer, prev[HEAD] the least.
const HEAD: usize = NBUF;

struct BCache {
    lock: Spinlock,
    buf: [Buf; NBUF],
    prev: [usize; NBUF + 1],
    next: [usize; NBUF + 1],
}

static mut BCACHE: BCache = BCache {
    lock: Spinlock::new("bcache"),
    buf: [const { Buf::new() }; NBUF],
    prev: [0; NBUF + 1],
    next: [0; NBUF + 1],
};

fn cache() -> &'static mut BCache {
    unsafe { &mut BCACHE }
}

// unlink buffer i from the ring. cache lock held.
fn detach(bc: &mut BCache, i: usize) {
    let (p, n) = (bc.prev[i], bc.next[i]);
    bc.next[p] = n;
    bc.prev[n] = p;
}

// link buffer i just after the sentinel (most-recently-used end).
fn attach_mru(bc: &mut BCache, i: usize) {
    let n = bc.next[HEAD];
    bc.next[i] = n;
    bc.prev[i] = HEAD;
    bc.prev[n] = i;
    bc.next[HEAD] = i;
}

// link buffer i just before the sentinel (the eviction end).
fn attach_lru(bc: &mut BCache, i: usize) {
    let p = bc.prev[HEAD];
    bc.prev[i] = p;
    bc.next[i] = HEAD;
    bc.next[p] = i;
    bc.prev[HEAD] = i;
}

pub fn binit() {
    let bc = cache();
    bc.next[HEAD] = HEAD;
    bc.prev[HEAD] = HEAD;
    for i in 0..NBUF {
        attach_mru(bc, i);
    }
}

// Return a locked buf with the contents of the indicated block.
// A cached block is handed out as-is; otherwise the least recently
// used free buffer is recycled, its old block written back, and the
// new block read from disk.
pub fn bread(dev: u32, blockno: u32) -> &'static mut Buf {
    let bc = cache();
    bc.lock.acquire();

    // Is the block already cached?
    let mut i = bc.next[HEAD];
    while i != HEAD {
        if bc.buf[i].dev == dev && bc.buf[i].blockno == blockno {
            bc.buf[i].refcnt += 1;
            detach(bc, i);
            attach_mru(bc, i);
            bc.lock.release();
            bc.buf[i].lock.acquire_sleep();
            return &mut bc.buf[i];
        }
        i = bc.next[i];
    }

    // Not cached. Recycle a free buffer. Released buffers park at
    // the tail newest-first, so the least recently released one is
    // the deepest buffer of the contiguous free run ending at the
    // tail; that is the eviction candidate.
    let mut i = bc.prev[HEAD];
    if i == HEAD {
        panic!("bread: no buffers");
    }
    while bc.prev[i] != HEAD && bc.buf[bc.prev[i]].refcnt == 0 {
        i = bc.prev[i];
    }
    if bc.buf[i].refcnt != 0 {
        panic!("bread: no buffers");
    }

    // pin it before dropping the cache lock so nobody else can
    // recycle the same slot.
    bc.buf[i].refcnt = 1;
    detach(bc, i);
    attach_mru(bc, i);
    bc.lock.release();

    bc.buf[i].lock.acquire_sleep();

    // lazy write-back: the slot's previous block leaves memory now,
    // so its bytes must reach the disk before they are overwritten.
    if bc.buf[i].blockno != BLOCKNO_NONE {
        bwrite(&mut bc.buf[i]);
    }

    bc.lock.acquire();
    bc.buf[i].dev = dev;
    bc.buf[i].blockno = blockno;
    bc.lock.release();

    virtio_disk_rw(&mut bc.buf[i], false);
    &mut bc.buf[i]
}

// Write b's contents to disk. Must be locked.
pub fn bwrite(b: &mut Buf) {
    if !b.lock.holding_sleep() {
        panic!("bwrite");
    }
    virtio_disk_rw(b, true);
}

// Release a locked buffer.
// A buffer nobody references moves to the eviction end of the list.
pub fn brelse(b: &mut Buf) {
    if !b.lock.holding_sleep() {
        panic!("brelse");
    }
    b.lock.release_sleep();

    let i = buf_handle(b);
    let bc = cache();
    bc.lock.acquire();
    bc.buf[i].refcnt -= 1;
    if bc.buf[i].refcnt == 0 {
        detach(bc, i);
        attach_lru(bc, i);
    }
    bc.lock.release();
}

// The buffer's stable index in the cache, handed to user space as an
// opaque handle by the block syscalls.
pub fn buf_handle(b: &Buf) -> usize {
    let bc = cache();
    let base = bc.buf.as_ptr() as usize;
    (b as *const Buf as usize - base) / core::mem::size_of::<Buf>()
}

pub fn buf_lookup(handle: usize) -> Option<&'static mut Buf> {
    if handle >= NBUF {
        return None;
    }
    Some(&mut cache().buf[handle])
}

// Dump the cache, most recently used first.
// for debug
pub fn bprint() {
    use crate::printf;

    let bc = cache();
    bc.lock.acquire();
    printf!("\nbuf cache:\n");
    let mut i = bc.next[HEAD];
    while i != HEAD {
        let b = &bc.buf[i];
        if b.blockno != BLOCKNO_NONE {
            printf!("buf {}: ref = {}, blockno = {}, data = [", i, b.refcnt, b.blockno);
            for k in 0..8 {
                printf!("{} ", b.data[k]);
            }
            printf!("]\n");
        }
        i = bc.next[i];
    }
    bc.lock.release();
}
